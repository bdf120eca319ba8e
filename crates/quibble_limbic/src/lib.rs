//! # Quibble Limbic
//!
//! The fast, process-wide half of the engine: a bounded mood value and the
//! personality trait set that every reply is flavored by.
//!
//! Both live in one owned [`SessionState`] that callers thread explicitly.
//! Only the [`PersonalitySelector`] (per message) and the drift functions
//! (per maintenance tick) mutate it.

pub mod drift;
mod mood;
mod personality;
mod selector;
mod session;

pub use drift::{apply_drift, effectiveness, EffectivenessSample};
pub use mood::Mood;
pub use personality::{default_traits, PersonalityTrait, TraitConditions};
pub use selector::{MoodPolicy, PersonalitySelector, Selection};
pub use session::SessionState;
