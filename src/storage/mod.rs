//! Thread storage
//!
//! The session state machine talks to storage only through [`ChatStore`].
//! Two implementations are provided:
//!
//! - [`SqliteStore`] -- the on-disk history used by the CLI
//! - [`MemoryStore`] -- process-local storage for tests and `--ephemeral`

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Message, MessageId, Thread, ThreadId};

pub mod memory;
pub mod sqlite;
pub mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::ThreadSummary;

/// Persistence operations for chat threads
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a new, empty thread and return it with its assigned id
    async fn create_thread(&self, title: &str, category: &str) -> Result<Thread>;

    /// Append a message to a persisted thread and advance its `last_update`
    ///
    /// # Errors
    ///
    /// Returns `ChatError::ThreadNotFound` if the thread does not exist.
    async fn append_message(&self, thread_id: &ThreadId, message: &Message) -> Result<()>;

    /// Overwrite a stored message with the same id
    ///
    /// # Errors
    ///
    /// Returns `ChatError::MessageNotFound` if no such message is stored.
    async fn replace_message(&self, thread_id: &ThreadId, message: &Message) -> Result<()>;

    /// Remove one stored message
    ///
    /// # Errors
    ///
    /// Returns `ChatError::MessageNotFound` if no such message is stored.
    async fn delete_message(&self, thread_id: &ThreadId, message_id: MessageId) -> Result<()>;

    /// All threads with their messages, most recently updated first
    async fn list_threads(&self) -> Result<Vec<Thread>>;

    /// Remove a thread and its messages. Deleting a missing thread is not an error.
    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<()>;

    /// Load one thread by full id or unique prefix
    async fn load_thread(&self, id_or_prefix: &str) -> Result<Option<Thread>>;
}
