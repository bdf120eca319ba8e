//! Error taxonomy shared by every crate in the workspace.
//!
//! Only `ConfigError` is fatal (at startup). Everything else is mapped to a
//! best-effort textual reply by the session orchestrator.

use std::time::Duration;
use thiserror::Error;

/// Malformed inbound input. Never crashes the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("message content is {len} characters, limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("message has no user id")]
    MissingUserId,
}

impl ValidationError {
    /// Text that is safe to show to the sender.
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::EmptyContent => {
                "I can't reply to an empty message. Try saying something!".to_string()
            }
            ValidationError::ContentTooLong { max, .. } => format!(
                "That message is a bit long for me. Please keep it to at most {} characters.",
                max
            ),
            ValidationError::MissingUserId => {
                "I couldn't tell who sent that message, so I'm skipping it.".to_string()
            }
        }
    }
}

/// A user went over the per-window request budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit exceeded for {user_id}: {limit} requests per {window_secs}s")]
pub struct RateLimitExceeded {
    pub user_id: String,
    pub limit: usize,
    pub window_secs: u64,
}

impl RateLimitExceeded {
    pub fn user_message(&self) -> String {
        format!(
            "Whoa, slow down! You can send up to {} messages every {} seconds. Give me a moment to catch up.",
            self.limit, self.window_secs
        )
    }
}

/// A single failed call to the generative backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// 429-class throttling by the provider.
    #[error("rate limited by provider: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// Network failure, timeout or 5xx.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Non-retryable client error (400, 401, 403, 404, ...).
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The provider answered but the payload was unusable.
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited { .. } | BackendError::Transient(_)
        )
    }

    /// Provider-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The generative call failed once the retry policy was applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: BackendError,
    },

    #[error("generation failed without retry: {0}")]
    NotRetryable(#[source] BackendError),
}

/// Durable key-value storage failure. Callers degrade instead of failing.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("wrong value type at {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("storage connection is closed")]
    Closed,
}

/// Missing or invalid startup configuration. The process refuses to start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required credential: {0}")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BackendError::Transient("timeout".into()).is_retryable());
        assert!(BackendError::RateLimited {
            retry_after: None,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(!BackendError::Rejected {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!BackendError::Malformed("no choices".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let limited = BackendError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
            message: String::new(),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(BackendError::Transient("x".into()).retry_after(), None);
    }

    #[test]
    fn test_user_messages_do_not_leak_internals() {
        let msg = ValidationError::ContentTooLong {
            len: 2001,
            max: 2000,
        }
        .user_message();
        assert!(msg.contains("at most 2000"));
        assert!(!msg.contains("2001"));

        let throttled = RateLimitExceeded {
            user_id: "u1".into(),
            limit: 5,
            window_secs: 60,
        };
        assert!(!throttled.user_message().contains("u1"));
    }
}
