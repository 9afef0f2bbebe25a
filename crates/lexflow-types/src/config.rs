//! Engine configuration, loaded from `lexflow.toml` by the infra layer.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration with serde-backed defaults, so a partial
/// (or missing) config file still yields a fully usable config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Seconds between scheduler polls for pending instances.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to back off after a failed scheduler cycle.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// Maximum pending instances dispatched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Running instances older than this are force-failed by the reaper.
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: u32,

    #[serde(default)]
    pub llm: LlmConfig,
}

/// Connection settings for the OpenAI-compatible model endpoint.
///
/// The API key is intentionally absent: it is read from the
/// `LEXFLOW_LLM_API_KEY` environment variable, never from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_database_url() -> String {
    "sqlite://lexflow.db".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_error_backoff_secs() -> u64 {
    30
}

fn default_batch_size() -> u32 {
    10
}

fn default_stale_after_hours() -> u32 {
    24
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            batch_size: default_batch_size(),
            stale_after_hours: default_stale_after_hours(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_scheduler_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.error_backoff_secs, 30);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.stale_after_hours, 24);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"poll_interval_secs": 5}"#).unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }
}
