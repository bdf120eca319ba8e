pub mod analysis;
pub mod config;
pub mod error;
pub mod lexical;
pub mod message;
pub mod profile;
pub mod sentiment;

pub use analysis::{Intent, NlpAnalysis};
pub use config::QuibbleConfig;
pub use error::{
    BackendError, ConfigError, GenerationError, RateLimitExceeded, StorageError, ValidationError,
};
pub use lexical::{Analyzer, KeywordAnalyzer};
pub use message::{InboundMessage, Message, MAX_CONTENT_CHARS};
pub use profile::{InteractionRecord, UserProfile};
