//! Interpretation of single stream lines into typed events
//!
//! A line is `data: <json>` where the JSON object carries a `type`
//! discriminant. Lines without the `data:` prefix are ignored; malformed
//! payloads are reported as [`LineOutcome::Malformed`] so the caller can warn
//! and keep reading.

use serde::Deserialize;
use serde_json::Value;

use crate::model::ThreadSnapshot;
use crate::stream::line_parser::SENTINEL;

/// Prefix identifying a line with a structured payload
pub const DATA_PREFIX: &str = "data:";

/// Semantic event carried by one stream line
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The server created or identified the thread
    Init(ThreadSnapshot),
    /// Incremental assistant text
    Chunk(String),
    /// Stream finished; `content` is the complete assistant text
    Done {
        /// Final assistant text
        content: String,
        /// Image references produced with the reply
        images: Vec<String>,
    },
    /// The server reported a failure
    Error(String),
    /// A payload with an unknown `type`, kept for logging
    Unrecognized(String),
}

impl StreamEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &str {
        match self {
            Self::Init(_) => "init",
            Self::Chunk(_) => "chunk",
            Self::Done { .. } => "done",
            Self::Error(_) => "error",
            Self::Unrecognized(kind) => kind.as_str(),
        }
    }
}

/// Result of interpreting one line
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// The line carried an event
    Event(StreamEvent),
    /// The line had no structured payload
    Ignored,
    /// The structured payload could not be parsed
    Malformed {
        /// Parser diagnostic
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedPayload {
    Init {
        #[serde(alias = "thread")]
        chat: ThreadSnapshot,
    },
    Chunk {
        content: String,
    },
    Done {
        content: String,
        #[serde(default)]
        images: Vec<String>,
        #[serde(default)]
        image: Option<String>,
    },
    Error {
        error: String,
    },
}

impl From<TypedPayload> for StreamEvent {
    fn from(payload: TypedPayload) -> Self {
        match payload {
            TypedPayload::Init { chat } => Self::Init(chat),
            TypedPayload::Chunk { content } => Self::Chunk(content),
            TypedPayload::Done {
                content,
                mut images,
                image,
            } => {
                images.extend(image);
                Self::Done { content, images }
            }
            TypedPayload::Error { error } => Self::Error(error),
        }
    }
}

/// Interpret one complete line
///
/// # Examples
///
/// ```
/// use chatstream::stream::event::{interpret_line, LineOutcome, StreamEvent};
///
/// let outcome = interpret_line(r#"data: {"type":"chunk","content":"Hel"}"#);
/// assert_eq!(outcome, LineOutcome::Event(StreamEvent::Chunk("Hel".into())));
///
/// assert_eq!(interpret_line(": keep-alive"), LineOutcome::Ignored);
/// ```
pub fn interpret_line(line: &str) -> LineOutcome {
    let Some(payload) = line.trim_start().strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Ignored;
    };
    let payload = payload.trim();
    if payload == SENTINEL {
        return LineOutcome::Ignored;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            return LineOutcome::Malformed {
                reason: e.to_string(),
            }
        }
    };

    let Some(object) = value.as_object() else {
        return LineOutcome::Malformed {
            reason: "payload is not a JSON object".to_string(),
        };
    };

    let kind = match object.get("type") {
        Some(Value::String(kind)) => Some(kind.clone()),
        Some(_) => {
            return LineOutcome::Malformed {
                reason: "type discriminant is not a string".to_string(),
            }
        }
        None => None,
    };

    match kind.as_deref() {
        Some(kind @ ("init" | "chunk" | "done" | "error")) => {
            match serde_json::from_value::<TypedPayload>(value) {
                Ok(typed) => LineOutcome::Event(typed.into()),
                Err(e) => LineOutcome::Malformed {
                    reason: format!("invalid {} payload: {}", kind, e),
                },
            }
        }
        Some(other) => LineOutcome::Event(StreamEvent::Unrecognized(other.to_string())),
        // Untyped payloads from older servers: {"content": ...} / {"error": ...}
        None => {
            if let Some(Value::String(error)) = object.get("error") {
                LineOutcome::Event(StreamEvent::Error(error.clone()))
            } else if let Some(Value::String(content)) = object.get("content") {
                LineOutcome::Event(StreamEvent::Chunk(content.clone()))
            } else {
                LineOutcome::Event(StreamEvent::Unrecognized("<untyped>".to_string()))
            }
        }
    }
}
