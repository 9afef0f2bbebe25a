//! Engine configuration loader.
//!
//! Reads `lexflow.toml` from the data directory and deserializes it into
//! [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed. The LLM API key never lives in the file; it comes from the
//! `LEXFLOW_LLM_API_KEY` environment variable.

use std::path::Path;

use lexflow_types::config::EngineConfig;
use secrecy::SecretString;

/// Environment variable holding the language model API key.
pub const LLM_API_KEY_ENV: &str = "LEXFLOW_LLM_API_KEY";

/// Load engine configuration from `{data_dir}/lexflow.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the
///   default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("lexflow.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                "No lexflow.toml found at {}, using defaults",
                config_path.display()
            );
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Read the language model API key from the environment, if set.
pub fn llm_api_key_from_env() -> Option<SecretString> {
    std::env::var(LLM_API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.error_backoff_secs, 30);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.stale_after_hours, 24);
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("lexflow.toml"),
            r#"
database_url = "sqlite:///var/lib/lexflow/workflows.db"
poll_interval_secs = 5
batch_size = 25

[llm]
base_url = "http://localhost:11434/v1"
model = "llama3.1"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.database_url, "sqlite:///var/lib/lexflow/workflows.db");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.batch_size, 25);
        // Unspecified fields keep their defaults.
        assert_eq!(config.error_backoff_secs, 30);
        assert_eq!(config.llm.base_url, "http://localhost:11434/v1");
        assert_eq!(config.llm.model, "llama3.1");
        assert_eq!(config.llm.max_tokens, 1024);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("lexflow.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.poll_interval_secs, 10);
    }
}
