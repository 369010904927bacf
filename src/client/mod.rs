//! Completion backends
//!
//! A backend sends one submission or regeneration request to the chat
//! service and hands back the raw response body as a byte stream. Decoding
//! the body is left to [`crate::stream`], so every backend shares one
//! interpretation of the wire format.

pub mod fake;
pub mod http;

pub use fake::ScriptedBackend;
pub use http::HttpBackend;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;

use crate::error::Result;
use crate::model::{Message, MessageId, Role};

/// Response body of a completion request, as it arrives
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Earlier message sent along as conversation context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Author
    pub role: Role,
    /// Text content
    pub content: String,
    /// Attached images
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            images: message.images.clone(),
        }
    }
}

/// Body of a new-message request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Thread the message belongs to
    pub chat_id: String,
    /// User text
    pub content: String,
    /// Attached image reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Messages preceding this one
    pub history: Vec<HistoryEntry>,
}

/// Body of an edit-and-regenerate request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    /// Thread the message belongs to
    pub chat_id: String,
    /// Edited message
    pub message_id: MessageId,
    /// Replacement text
    pub new_content: String,
    /// Messages preceding the edited one
    pub history: Vec<HistoryEntry>,
}

/// A request that produces a streamed assistant reply
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionRequest {
    /// Reply to a newly submitted user message
    Submit(SubmitRequest),
    /// Reply again to an edited user message
    Regenerate(RegenerateRequest),
}

impl CompletionRequest {
    /// Thread the request is for
    pub fn chat_id(&self) -> &str {
        match self {
            Self::Submit(r) => &r.chat_id,
            Self::Regenerate(r) => &r.chat_id,
        }
    }
}

/// Sends completion requests to a chat service
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Start a request and return its body as a byte stream
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Transport` if the request cannot be sent or the
    /// service answers with a non-success status
    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream>;
}
