//! Test utilities for chatstream
//!
//! This module provides temporary directories, error assertions, and
//! builders for stream lines and configuration used across unit tests.

use crate::config::Config;
use crate::error::Result;
use std::path::PathBuf;
use tempfile::TempDir;

/// Create a temporary directory for testing
///
/// # Returns
///
/// Returns a TempDir that will be cleaned up when dropped
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Path of a history database inside `dir`
pub fn temp_db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("history.db")
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: Result<T>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = format!("{:#}", e);
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// A `chunk` event line
pub fn chunk_line(text: &str) -> String {
    format!(
        "data: {}",
        serde_json::json!({ "type": "chunk", "content": text })
    )
}

/// A `done` event line
pub fn done_line(text: &str) -> String {
    format!(
        "data: {}",
        serde_json::json!({ "type": "done", "content": text })
    )
}

/// An `error` event line
pub fn error_line(message: &str) -> String {
    format!(
        "data: {}",
        serde_json::json!({ "type": "error", "error": message })
    )
}

/// Create a test configuration with default values
pub fn test_config() -> Config {
    Config::default()
}

/// Create a test configuration YAML string
pub fn test_config_yaml() -> String {
    r#"
server:
  base_url: http://127.0.0.1:9/api
  timeout_seconds: 5
chat:
  title_max_chars: 20
  default_category: Testing
attachments:
  max_image_bytes: 65536
share:
  public_base_url: http://127.0.0.1:9
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::stream::{interpret_line, LineOutcome, StreamEvent};

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
        assert!(temp_db_path(&dir).starts_with(dir.path()));
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: Result<()> = Err(ChatError::Config("test error message".to_string()).into());
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        assert_error_contains(Ok(()), "error");
    }

    #[test]
    #[should_panic(expected = "does not contain")]
    fn test_assert_error_contains_wrong_message() {
        let result: Result<()> = Err(ChatError::Config("different error".to_string()).into());
        assert_error_contains(result, "not present");
    }

    #[test]
    fn test_event_line_builders_escape_content() {
        assert_eq!(
            interpret_line(&chunk_line("say \"hi\"\n")),
            LineOutcome::Event(StreamEvent::Chunk("say \"hi\"\n".into()))
        );
        assert_eq!(
            interpret_line(&done_line("ok")),
            LineOutcome::Event(StreamEvent::Done {
                content: "ok".into(),
                images: vec![]
            })
        );
        assert_eq!(
            interpret_line(&error_line("boom")),
            LineOutcome::Event(StreamEvent::Error("boom".into()))
        );
    }

    #[test]
    fn test_test_config_yaml() {
        let config: Config = serde_yaml::from_str(&test_config_yaml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.default_category, "Testing");
        assert!(test_config().validate().is_ok());
    }
}
