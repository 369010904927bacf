//! Error types for chatstream
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for chatstream operations
///
/// This enum covers configuration loading, submission validation, the
/// remote chat service, the local thread store, and attachment handling.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A submission or edit was rejected before any request was made
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another submission is still streaming for the same thread
    #[error("A message is already in progress for thread {0}")]
    SubmissionInProgress(String),

    /// The referenced thread is not known to the context or the store
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    /// The referenced message does not exist in the thread
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Network failures and non-success HTTP statuses
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error event sent by the chat service inside the stream
    #[error("Server error: {0}")]
    Server(String),

    /// Image attachment errors (missing file, size, unknown format)
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// Thread storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ChatError {
    /// Returns true for refusals caused by the input itself or by a busy
    /// thread, which are reported as warnings rather than errors
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::error::ChatError;
    ///
    /// assert!(ChatError::Validation("empty".into()).is_rejection());
    /// assert!(!ChatError::Transport("refused".into()).is_rejection());
    /// ```
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::SubmissionInProgress(_)
        )
    }
}

/// Result type alias for chatstream operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
