use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transfer::{DispatcherConfig, LedgerConfig};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// "never", "hourly" or "daily"
    pub rotation: String,
    pub dispatcher: DispatcherConfig,
    pub ledger: LedgerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "batch-sender.log".to_string(),
            use_json: false,
            rotation: "never".to_string(),
            dispatcher: DispatcherConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = AppConfig::from_yaml(
            r#"
log_level: debug
use_json: true
dispatcher:
  source_account: "Treasury"
  concurrency: 4
  retry_error: true
ledger:
  rpc_url: "http://ledger:8899"
"#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert!(config.use_json);
        assert_eq!(config.rotation, "never");
        assert_eq!(config.dispatcher.source_account, "Treasury");
        assert_eq!(config.dispatcher.concurrency, 4);
        assert!(config.dispatcher.retry_error);
        assert!(!config.dispatcher.verify_confirm);
        assert_eq!(config.dispatcher.error_threshold, 3);
        assert_eq!(config.ledger.rpc_url, "http://ledger:8899");
        assert_eq!(config.ledger.timeout_ms, 30_000);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.log_file, "batch-sender.log");
        assert_eq!(config.dispatcher.slot_count(), 1);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = AppConfig::from_file("config/does-not-exist.yaml").unwrap_err();
        assert!(err.to_string().contains("config/does-not-exist.yaml"));
    }

    #[test]
    fn test_dev_config_parses() {
        let config = AppConfig::load("dev").unwrap();
        assert_eq!(config.dispatcher.concurrency, 1);
        assert!(config.dispatcher.poll_max_attempts.is_none());
    }
}
