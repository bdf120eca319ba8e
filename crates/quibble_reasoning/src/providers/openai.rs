//! OpenAI-compatible chat completions provider.
//!
//! Works with any endpoint that speaks `/chat/completions` (OpenAI, DeepSeek,
//! local gateways) via `llm.base_url`.

use crate::backend::{GenerationRequest, GenerativeBackend};
use async_trait::async_trait;
use quibble_core::config::LlmConfig;
use quibble_core::{BackendError, ConfigError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential("OPENAI_API_KEY".to_string()))?
            .to_string();

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }
}

#[async_trait]
impl GenerativeBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let payload = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(format!("invalid JSON body: {}", e)))?;
        extract_text(&body)
    }
}

/// Map a non-success HTTP status onto the backend error taxonomy.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> BackendError {
    let message: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited {
            retry_after,
            message,
        },
        StatusCode::REQUEST_TIMEOUT => BackendError::Transient(format!("{}: {}", status, message)),
        s if s.is_server_error() => BackendError::Transient(format!("{}: {}", s, message)),
        s => BackendError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn extract_text(body: &Value) -> Result<String, BackendError> {
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| BackendError::Malformed("missing choices[0].message.content".to_string()))?;
    if text.trim().is_empty() {
        return Err(BackendError::Malformed("empty completion".to_string()));
    }
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(2)), "slow"),
            BackendError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(2)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, ""),
            BackendError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, None, ""),
            BackendError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "bad key"),
            BackendError::Rejected { status: 401, .. }
        ));
    }

    #[test]
    fn test_long_error_bodies_truncated() {
        let body = "x".repeat(5000);
        match classify_status(StatusCode::BAD_REQUEST, None, &body) {
            BackendError::Rejected { message, .. } => assert_eq!(message.len(), 200),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_extract_text() {
        let ok = json!({"choices": [{"message": {"content": "  hello  "}}]});
        assert_eq!(extract_text(&ok).unwrap(), "hello");

        let empty = json!({"choices": [{"message": {"content": "   "}}]});
        assert!(matches!(extract_text(&empty), Err(BackendError::Malformed(_))));

        let missing = json!({"choices": []});
        assert!(matches!(extract_text(&missing), Err(BackendError::Malformed(_))));
    }

    #[test]
    fn test_requires_api_key() {
        let cfg = LlmConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiBackend::new(&cfg),
            Err(ConfigError::MissingCredential(_))
        ));
    }
}
