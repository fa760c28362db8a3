//! Configuration management for hmcs.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Command line flags and environment variables (HMCS_STORE, OPENAI_API_KEY)
//! 2. Config file (~/.hmcs/config.toml, or the path in HMCS_CONFIG)
//! 3. Default values

use std::path::PathBuf;

use anyhow::{Context, Result};
use hmcs_core::client::ClientConfig;
use hmcs_core::memory::MemoryConfig;
use hmcs_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Consolidation settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Summarization and embedding provider
    #[serde(default)]
    pub provider: ClientConfig,

    /// Backoff for provider calls
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Paths
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Memory store file; the extension picks the backend
    #[serde(default = "default_store_path")]
    pub store: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            store: default_store_path(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hmcs")
}

fn default_store_path() -> PathBuf {
    default_data_dir().join("memories.json")
}

impl Config {
    /// Load configuration from file, falling back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            Self::parse(&content).with_context(|| format!("Invalid config file {}", config_path.display()))?
        } else {
            Config::default()
        };

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("HMCS_CONFIG") {
            PathBuf::from(path)
        } else {
            default_data_dir().join("config.toml")
        }
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        self.provider.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.memory, MemoryConfig::default());
        assert_eq!(config.provider, ClientConfig::default());
        assert!(config.paths.store.ends_with(".hmcs/memories.json"));
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [memory]
            window_size = 4
            model = "gpt-4o-mini"

            [provider]
            base_url = "http://localhost:11434/v1"

            [retry]
            max_retries = 2

            [paths]
            store = "/tmp/hmcs/memory.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.memory.window_size, 4);
        assert_eq!(config.memory.n_nearest, 2);
        assert_eq!(config.memory.model, "gpt-4o-mini");
        assert_eq!(config.provider.base_url, "http://localhost:11434/v1");
        assert_eq!(config.provider.embedding_model, "text-embedding-ada-002");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.paths.store, PathBuf::from("/tmp/hmcs/memory.db"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::parse("[memory]\nwindow_size = 0").is_err());
        assert!(Config::parse("[provider]\nbase_url = \"localhost\"").is_err());
        assert!(Config::parse("[retry]\nmultiplier = 0.5").is_err());
        assert!(Config::parse("memory = 3").is_err());
    }
}
