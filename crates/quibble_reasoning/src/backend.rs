use async_trait::async_trait;
use quibble_core::BackendError;

/// One call to the generative backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Opaque text generator: prompt in, text out.
///
/// Implementations make exactly one attempt per call and classify failures
/// into [`BackendError`]; retrying is the caller's business.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError>;
}
