//! Chat threads and messages
//!
//! These types are shared by the stream interpreter, the session state
//! machine, the thread store and the transcript renderer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChatError;

/// Prefix marking a client-local thread that has not been persisted yet
const TEMP_PREFIX: &str = "temp-";

/// Default category assigned to new threads
pub const DEFAULT_CATEGORY: &str = "General";

/// Opaque thread identifier
///
/// Temporary identifiers are minted on the client for a "new chat" and are
/// replaced by a store-assigned identifier on first submission. Persisted
/// identifiers never change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Wraps a store-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh client-local identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::model::ThreadId;
    ///
    /// let id = ThreadId::temporary();
    /// assert!(id.is_temporary());
    /// ```
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Returns true if this identifier has never been persisted
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX)
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Per-thread message identifier, monotonic within a thread
pub type MessageId = u64;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Typed by the person using the client
    User,
    /// Generated by the remote chat service
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ChatError::Storage(format!("unknown message role: {}", other))),
        }
    }
}

/// A single message within a thread
///
/// The role is fixed at construction. Content only changes through an
/// explicit edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, unique within the owning thread
    pub id: MessageId,
    /// Author of the message
    pub role: Role,
    /// Text content, possibly empty when an image is attached
    pub content: String,
    /// Attached image references (data URLs or remote URLs)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a user message with an optional attached image
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::model::{Message, Role};
    ///
    /// let msg = Message::user(1, "hi", None);
    /// assert_eq!(msg.role, Role::User);
    /// assert!(msg.images.is_empty());
    /// ```
    pub fn user(id: MessageId, content: impl Into<String>, image: Option<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            images: image.into_iter().collect(),
            created_at: Utc::now(),
        }
    }

    /// Creates an assistant message
    pub fn assistant(id: MessageId, content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            images,
            created_at: Utc::now(),
        }
    }
}

/// A chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Thread identifier
    pub id: ThreadId,
    /// Display title, empty until the first submission sets it
    pub title: String,
    /// Free-form category
    pub category: String,
    /// Messages in creation order
    pub messages: Vec<Message>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last appended or edited message
    pub last_update: DateTime<Utc>,
}

impl Thread {
    /// Creates an empty thread with a client-local identifier
    pub fn temporary(category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ThreadId::temporary(),
            title: String::new(),
            category: category.into(),
            messages: Vec::new(),
            created_at: now,
            last_update: now,
        }
    }

    /// Returns true if this thread has never been persisted
    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }

    /// Next identifier for a message appended to this thread
    pub fn next_message_id(&self) -> MessageId {
        self.messages.iter().map(|m| m.id).max().unwrap_or(0) + 1
    }

    /// Index of the message with the given identifier
    pub fn position_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Merge the metadata of a server snapshot into this thread
    ///
    /// Messages are never taken from the snapshot. The identifier is only
    /// adopted while this thread is still temporary.
    pub fn merge_snapshot(&mut self, snapshot: &ThreadSnapshot) {
        if let Some(id) = &snapshot.id {
            if self.is_temporary() {
                self.id = ThreadId::new(id.clone());
            } else if id != self.id.as_str() {
                tracing::warn!(
                    thread_id = %self.id,
                    snapshot_id = %id,
                    "Ignoring identifier change for persisted thread"
                );
            }
        }
        if let Some(title) = &snapshot.title {
            self.title = title.clone();
        }
        if let Some(category) = &snapshot.category {
            self.category = category.clone();
        }
        if let Some(last_update) = snapshot.last_update {
            self.last_update = last_update;
        }
    }
}

/// Thread metadata carried by an `init` stream event
///
/// Any `messages` field in the payload is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// Server identifier of the thread
    #[serde(default)]
    pub id: Option<String>,
    /// Server-side title
    #[serde(default)]
    pub title: Option<String>,
    /// Server-side category
    #[serde(default)]
    pub category: Option<String>,
    /// Server-side last update time
    #[serde(default, alias = "lastUpdate")]
    pub last_update: Option<DateTime<Utc>>,
}

/// Derive a thread title from the first submitted text
///
/// The text is trimmed and cut to `max_chars` characters; `...` is appended
/// when the input was longer.
///
/// # Examples
///
/// ```
/// use chatstream::model::derive_title;
///
/// assert_eq!(derive_title("  hello  ", 30), "hello");
/// assert_eq!(derive_title("abcdef", 3), "abc...");
/// ```
pub fn derive_title(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let mut title: String = trimmed.chars().take(max_chars).collect();
    if trimmed.chars().count() > max_chars {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_thread_id() {
        let id = ThreadId::temporary();
        assert!(id.is_temporary());
        assert!(!ThreadId::new("9f1c").is_temporary());
    }

    #[test]
    fn test_next_message_id_is_monotonic() {
        let mut thread = Thread::temporary(DEFAULT_CATEGORY);
        assert_eq!(thread.next_message_id(), 1);
        thread.messages.push(Message::user(1, "a", None));
        thread.messages.push(Message::assistant(2, "b", vec![]));
        assert_eq!(thread.next_message_id(), 3);
    }

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_derive_title_truncates_on_char_boundary() {
        assert_eq!(derive_title("héllo wörld", 4), "héll...");
        assert_eq!(derive_title("", 30), "");
        assert_eq!(derive_title(&"x".repeat(30), 30), "x".repeat(30));
    }

    #[test]
    fn test_merge_snapshot_adopts_id_only_when_temporary() {
        let mut thread = Thread::temporary(DEFAULT_CATEGORY);
        let snapshot = ThreadSnapshot {
            id: Some("srv-1".into()),
            title: Some("Greeting".into()),
            category: None,
            last_update: None,
        };
        thread.merge_snapshot(&snapshot);
        assert_eq!(thread.id.as_str(), "srv-1");
        assert_eq!(thread.title, "Greeting");

        let other = ThreadSnapshot {
            id: Some("srv-2".into()),
            ..Default::default()
        };
        thread.merge_snapshot(&other);
        assert_eq!(thread.id.as_str(), "srv-1");
    }

    #[test]
    fn test_snapshot_accepts_camel_case_last_update() {
        let json = r#"{"id":"c1","title":"t","lastUpdate":"2024-05-01T10:00:00Z","messages":[{"id":1}]}"#;
        let snapshot: ThreadSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.id.as_deref(), Some("c1"));
        assert!(snapshot.last_update.is_some());
    }
}
