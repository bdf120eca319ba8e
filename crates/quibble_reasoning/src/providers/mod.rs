pub mod mock;
pub mod openai;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;

use crate::backend::GenerativeBackend;
use quibble_core::config::LlmConfig;
use quibble_core::ConfigError;
use std::sync::Arc;

/// Build the backend named by `llm.provider`.
pub fn build_backend(config: &LlmConfig) -> Result<Arc<dyn GenerativeBackend>, ConfigError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiBackend::new(config)?)),
        "mock" => {
            tracing::warn!("Using the mock generative backend");
            Ok(Arc::new(MockBackend::echo()))
        }
        other => Err(ConfigError::Invalid(format!(
            "unknown llm provider '{}'",
            other
        ))),
    }
}
