//! Configuration management for chatstream
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ChatError, Result};
use crate::model::DEFAULT_CATEGORY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for chatstream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote chat service settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Submission and streaming behavior
    #[serde(default)]
    pub chat: ChatConfig,
    /// Image attachment limits
    #[serde(default)]
    pub attachments: AttachmentConfig,
    /// Local thread history
    #[serde(default)]
    pub storage: StorageConfig,
    /// Public transcript links
    #[serde(default)]
    pub share: ShareConfig,
}

/// Remote chat service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the chat API (the `/messages` endpoint lives below it)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,

    /// Timeout for connecting and for the response head; the streamed body is not bounded (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl ServerConfig {
    /// Connect and response-head timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Chat behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Maximum characters of the first message used as a thread title
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,

    /// Category assigned to new threads
    #[serde(default = "default_category")]
    pub default_category: String,

    /// Pause after each streamed chunk, purely cosmetic (milliseconds)
    #[serde(default)]
    pub chunk_delay_ms: u64,
}

fn default_title_max_chars() -> usize {
    30
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            title_max_chars: default_title_max_chars(),
            default_category: default_category(),
            chunk_delay_ms: 0,
        }
    }
}

/// Image attachment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentConfig {
    /// Largest accepted image file (bytes)
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

fn default_max_image_bytes() -> u64 {
    5 * 1024 * 1024 // 5 MB
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

/// Thread history configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; the platform data directory is used when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Share link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Public origin that serves `/shared/<thread id>`
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ChatError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("CHATSTREAM_BASE_URL") {
            self.server.base_url = base_url;
        }

        if let Ok(token) = std::env::var("CHATSTREAM_API_TOKEN") {
            self.server.api_token = Some(token);
        }

        if let Ok(timeout) = std::env::var("CHATSTREAM_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.server.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid CHATSTREAM_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(delay) = std::env::var("CHATSTREAM_CHUNK_DELAY_MS") {
            if let Ok(value) = delay.parse() {
                self.chat.chunk_delay_ms = value;
            } else {
                tracing::warn!("Invalid CHATSTREAM_CHUNK_DELAY_MS: {}", delay);
            }
        }

        if let Ok(public) = std::env::var("CHATSTREAM_PUBLIC_URL") {
            self.share.public_base_url = public;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(server) = &cli.server {
            tracing::debug!(server = %server, "CLI override: server base URL");
            self.server.base_url = server.clone();
        }
        if let Some(db_path) = &cli.storage_path {
            self.storage.db_path = Some(PathBuf::from(db_path));
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Config` describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.server.base_url).map_err(|e| {
            ChatError::Config(format!(
                "Invalid server.base_url '{}': {}",
                self.server.base_url, e
            ))
        })?;

        url::Url::parse(&self.share.public_base_url).map_err(|e| {
            ChatError::Config(format!(
                "Invalid share.public_base_url '{}': {}",
                self.share.public_base_url, e
            ))
        })?;

        if self.server.timeout_seconds == 0 {
            return Err(
                ChatError::Config("server.timeout_seconds must be greater than 0".into()).into(),
            );
        }

        if self.chat.title_max_chars == 0 {
            return Err(
                ChatError::Config("chat.title_max_chars must be greater than 0".into()).into(),
            );
        }

        if self.chat.default_category.trim().is_empty() {
            return Err(ChatError::Config("chat.default_category must not be empty".into()).into());
        }

        if self.attachments.max_image_bytes == 0 {
            return Err(ChatError::Config(
                "attachments.max_image_bytes must be greater than 0".into(),
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.title_max_chars, 30);
        assert_eq!(config.chat.default_category, "General");
        assert_eq!(config.attachments.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(config.server.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_validation_rejects_bad_base_url() {
        let mut config = Config::default();
        config.server.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let mut config = Config::default();
        config.server.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_title_length() {
        let mut config = Config::default();
        config.chat.title_max_chars = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_image_limit() {
        let mut config = Config::default();
        config.attachments.max_image_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
server:
  base_url: https://chat.example.com/api
  api_token: secret
  timeout_seconds: 30
chat:
  title_max_chars: 40
  chunk_delay_ms: 30
attachments:
  max_image_bytes: 1024
share:
  public_base_url: https://chat.example.com
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.base_url, "https://chat.example.com/api");
        assert_eq!(config.server.api_token.as_deref(), Some("secret"));
        assert_eq!(config.chat.title_max_chars, 40);
        assert_eq!(config.chat.default_category, "General");
        assert_eq!(config.chat.chunk_delay_ms, 30);
        assert_eq!(config.attachments.max_image_bytes, 1024);
        assert!(config.storage.db_path.is_none());
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let cli = crate::cli::Cli::default();
        let config = Config::load("nonexistent.yaml", &cli).unwrap();
        assert_eq!(config.server.base_url, "http://localhost:3000/api");
    }

    #[test]
    #[serial]
    fn test_env_and_cli_overrides() {
        std::env::set_var("CHATSTREAM_TIMEOUT_SECONDS", "15");
        std::env::set_var("CHATSTREAM_BASE_URL", "http://env.example/api");

        let cli = crate::cli::Cli {
            server: Some("http://cli.example/api".to_string()),
            storage_path: Some("/tmp/chatstream-test.db".to_string()),
            ..Default::default()
        };
        let config = Config::load("nonexistent.yaml", &cli).unwrap();

        std::env::remove_var("CHATSTREAM_TIMEOUT_SECONDS");
        std::env::remove_var("CHATSTREAM_BASE_URL");

        assert_eq!(config.server.timeout_seconds, 15);
        assert_eq!(config.server.base_url, "http://cli.example/api");
        assert_eq!(
            config.storage.db_path,
            Some(PathBuf::from("/tmp/chatstream-test.db"))
        );
    }

    #[test]
    #[serial]
    fn test_invalid_env_timeout_is_ignored() {
        std::env::set_var("CHATSTREAM_TIMEOUT_SECONDS", "soon");
        let config = Config::load("nonexistent.yaml", &crate::cli::Cli::default()).unwrap();
        std::env::remove_var("CHATSTREAM_TIMEOUT_SECONDS");
        assert_eq!(config.server.timeout_seconds, 120);
    }

    #[test]
    #[serial]
    fn test_shipped_config_matches_defaults() {
        let path = format!("{}/config/config.yaml", env!("CARGO_MANIFEST_DIR"));
        let config = Config::load(&path, &crate::cli::Cli::default()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.base_url, default_base_url());
        assert_eq!(config.chat.title_max_chars, 30);
        assert_eq!(config.attachments.max_image_bytes, 5 * 1024 * 1024);
        assert!(config.storage.db_path.is_none());
    }
}
