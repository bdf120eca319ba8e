//! # Quibble Reasoning
//!
//! Everything between a validated message and the reply text: the generative
//! backend seam and its providers, the retry policy, the response composer,
//! and the [`SessionOrchestrator`] that sequences the whole pipeline.

pub mod backend;
pub mod composer;
pub mod providers;
pub mod retry;
pub mod session;

pub use backend::{GenerationRequest, GenerativeBackend};
pub use composer::{ComposeRequest, Composition, ReplySource, ResponseComposer};
pub use providers::{build_backend, MockBackend, OpenAiBackend};
pub use retry::{with_retry, RetryConfig};
pub use session::{LifecycleState, Reply, ReplyOutcome, SessionOrchestrator};
