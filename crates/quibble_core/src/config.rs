use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuibbleConfig {
    pub llm: LlmConfig,
    pub rate_limit: RateLimitConfig,
    pub profile: ProfileConfig,
    pub maintenance: MaintenanceConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

impl QuibbleConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: QuibbleConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(n) = v.parse() {
                self.llm.temperature = n;
            }
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("QUIBBLE_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Ok(v) = std::env::var("QUIBBLE_RATE_LIMIT") {
            if let Ok(n) = v.parse() {
                self.rate_limit.max_requests = n;
            }
        }
        if let Ok(v) = std::env::var("QUIBBLE_MAINTENANCE_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.maintenance.interval_secs = n;
            }
        }
    }

    /// Startup checks. A failure here means the process must not initialize.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match self.llm.provider.as_str() {
            "openai" => {
                let has_key = self
                    .llm
                    .api_key
                    .as_deref()
                    .map(|k| !k.trim().is_empty())
                    .unwrap_or(false);
                if !has_key {
                    return Err(ConfigError::MissingCredential("OPENAI_API_KEY".to_string()));
                }
            }
            "mock" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown llm provider '{}'",
                    other
                )))
            }
        }
        match self.storage.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown storage backend '{}'",
                    other
                )))
            }
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_secs must be at least 1".to_string(),
            ));
        }
        if self.profile.history_cap == 0 {
            return Err(ConfigError::Invalid(
                "profile.history_cap must be at least 1".to_string(),
            ));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "maintenance.interval_secs must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.maintenance.drift_alpha) {
            return Err(ConfigError::Invalid(
                "maintenance.drift_alpha must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai" (any OpenAI-compatible endpoint) or "mock"
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Attempts per generation, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            max_tokens: 300,
            temperature: 0.8,
            timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Sliding-window admission control. In-memory, per user.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Inactivity period after which a stored profile expires.
    pub ttl_days: i64,
    pub history_cap: usize,
    /// Number of recent turns fed to the generative backend as context.
    pub context_turns: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            history_cap: crate::profile::DEFAULT_HISTORY_CAP,
            context_turns: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    /// EMA weight of new effectiveness observations when drifting trait levels.
    pub drift_alpha: f32,
    /// Fraction of the mood pulled back toward neutral on each tick.
    pub mood_decay: f32,
    pub metrics_retention_days: i64,
    pub event_buffer: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            drift_alpha: 0.2,
            mood_decay: 0.1,
            metrics_retention_days: 7,
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "sqlite" or "memory"
    pub backend: String,
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            db_path: "quibble.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on waiting for in-flight messages during shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = QuibbleConfig::default();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.window_secs, 60);
        assert_eq!(cfg.profile.ttl_days, 30);
        assert_eq!(cfg.maintenance.interval_secs, 3600);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[llm]
provider = "mock"
model = "tiny"
"#;
        let cfg: QuibbleConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.model, "tiny");
        // Defaults for unspecified fields
        assert_eq!(cfg.llm.max_attempts, 3);
        assert_eq!(cfg.storage.backend, "sqlite");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[llm]
provider = "openai"
model = "gpt-4o"
base_url = "http://localhost:11434/v1"
api_key = "sk-test"
max_tokens = 512
temperature = 0.5
max_attempts = 5

[rate_limit]
max_requests = 50
window_secs = 60

[profile]
ttl_days = 7
history_cap = 10
context_turns = 3

[maintenance]
interval_secs = 600
drift_alpha = 0.3

[storage]
backend = "memory"
db_path = "data/q.db"

[session]
shutdown_timeout_secs = 2
"#;
        let cfg: QuibbleConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.max_tokens, 512);
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.rate_limit.max_requests, 50);
        assert_eq!(cfg.profile.history_cap, 10);
        assert_eq!(cfg.maintenance.interval_secs, 600);
        assert_eq!(cfg.storage.backend, "memory");
        assert_eq!(cfg.session.shutdown_timeout_secs, 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_is_fatal() {
        let cfg = QuibbleConfig::default();
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MissingCredential("OPENAI_API_KEY".to_string()))
        );
    }

    #[test]
    fn test_mock_provider_needs_no_credentials() {
        let mut cfg = QuibbleConfig::default();
        cfg.llm.provider = "mock".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut cfg = QuibbleConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg.rate_limit.max_requests = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = QuibbleConfig::default();
        cfg.llm.provider = "carrier-pigeon".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        // Part 1: env overrides
        std::env::set_var("QUIBBLE_RATE_LIMIT", "50");
        std::env::set_var("QUIBBLE_DB_PATH", "/tmp/override.db");

        let mut cfg = QuibbleConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.rate_limit.max_requests, 50);
        assert_eq!(cfg.storage.db_path, "/tmp/override.db");

        // Clean up env vars before testing defaults
        std::env::remove_var("QUIBBLE_RATE_LIMIT");
        std::env::remove_var("QUIBBLE_DB_PATH");

        // Part 2: nonexistent path returns defaults (no env interference)
        let cfg = QuibbleConfig::load_or_default("/nonexistent/path.toml");
        assert_eq!(cfg.rate_limit.max_requests, 5);
    }
}
