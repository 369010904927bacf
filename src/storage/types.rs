use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Thread;

/// Listing metadata for a stored thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    /// Thread identifier
    pub id: String,
    /// User-friendly title
    pub title: String,
    /// Thread category
    pub category: String,
    /// When the thread was created
    pub created_at: DateTime<Utc>,
    /// When the thread last changed
    pub last_update: DateTime<Utc>,
    /// Number of messages in the thread
    pub message_count: usize,
}

impl From<&Thread> for ThreadSummary {
    fn from(thread: &Thread) -> Self {
        Self {
            id: thread.id.to_string(),
            title: thread.title.clone(),
            category: thread.category.clone(),
            created_at: thread.created_at,
            last_update: thread.last_update,
            message_count: thread.messages.len(),
        }
    }
}
