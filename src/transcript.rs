//! Rendering threads for reading and sharing
//!
//! Message content is plain text with optional fenced code blocks. This
//! module splits it into segments, renders whole threads as Markdown, builds
//! public share links and formats relative timestamps for listings.

use chrono::{DateTime, Utc};

use crate::attachment::is_data_url;
use crate::error::{ChatError, Result};
use crate::model::{Role, Thread, ThreadId};

const FENCE: &str = "```";

/// A run of message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Prose
    Text(String),
    /// A fenced code block
    Code {
        /// Info string after the opening fence, if any
        language: Option<String>,
        /// Block body without the fences
        code: String,
    },
}

/// Split message content into text and fenced code segments
///
/// An unterminated fence runs to the end of the content. Empty text
/// segments are dropped.
///
/// # Examples
///
/// ```
/// use chatstream::transcript::{segments, Segment};
///
/// let parts = segments("Try:\n```rust\nfn main() {}\n```\nDone.");
/// assert_eq!(parts.len(), 3);
/// assert_eq!(
///     parts[1],
///     Segment::Code { language: Some("rust".into()), code: "fn main() {}".into() }
/// );
/// ```
pub fn segments(content: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut text = String::new();
    let mut code: Option<(Option<String>, Vec<&str>)> = None;

    for line in content.lines() {
        let trimmed = line.trim_start();
        match code.take() {
            Some((language, body)) if trimmed.starts_with(FENCE) => {
                out.push(Segment::Code {
                    language,
                    code: body.join("\n"),
                });
            }
            Some((language, mut body)) => {
                body.push(line);
                code = Some((language, body));
            }
            None if trimmed.starts_with(FENCE) => {
                push_text(&mut out, &mut text);
                let info = trimmed[FENCE.len()..].trim();
                let language = (!info.is_empty()).then(|| info.to_string());
                code = Some((language, Vec::new()));
            }
            None => {
                text.push_str(line);
                text.push('\n');
            }
        }
    }

    if let Some((language, body)) = code {
        out.push(Segment::Code {
            language,
            code: body.join("\n"),
        });
    }
    push_text(&mut out, &mut text);
    out
}

fn push_text(out: &mut Vec<Segment>, text: &mut String) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(Segment::Text(trimmed.to_string()));
    }
    text.clear();
}

/// Render a thread as a Markdown document
pub fn render_markdown(thread: &Thread) -> String {
    let title = if thread.title.trim().is_empty() {
        "Untitled chat"
    } else {
        thread.title.trim()
    };

    let mut out = format!("# {}\n\n", title);
    out.push_str(&format!(
        "_{} · {} messages · updated {}_\n",
        thread.category,
        thread.messages.len(),
        thread.last_update.format("%Y-%m-%d %H:%M UTC")
    ));

    for message in &thread.messages {
        let author = match message.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
        };
        out.push_str(&format!("\n## {}\n\n", author));

        for segment in segments(&message.content) {
            match segment {
                Segment::Text(text) => {
                    out.push_str(&text);
                    out.push_str("\n\n");
                }
                Segment::Code { language, code } => {
                    out.push_str(&format!(
                        "{}{}\n{}\n{}\n\n",
                        FENCE,
                        language.unwrap_or_default(),
                        code,
                        FENCE
                    ));
                }
            }
        }

        for (n, image) in message.images.iter().enumerate() {
            if is_data_url(image) {
                out.push_str(&format!("_[attached image {}]_\n\n", n + 1));
            } else {
                out.push_str(&format!("![image {}]({})\n\n", n + 1, image));
            }
        }
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out.push('\n');
    out
}

/// Public URL of a thread's shared transcript
///
/// # Errors
///
/// Returns `ChatError::Validation` for unsaved threads and
/// `ChatError::Config` if the resulting URL is invalid
///
/// # Examples
///
/// ```
/// use chatstream::model::ThreadId;
/// use chatstream::transcript::share_link;
///
/// let link = share_link("https://chat.example.com/", &ThreadId::new("abc")).unwrap();
/// assert_eq!(link, "https://chat.example.com/shared/abc");
/// ```
pub fn share_link(public_base_url: &str, thread_id: &ThreadId) -> Result<String> {
    if thread_id.is_temporary() {
        return Err(ChatError::Validation(
            "Only saved threads can be shared".to_string(),
        )
        .into());
    }
    let link = format!(
        "{}/shared/{}",
        public_base_url.trim_end_matches('/'),
        thread_id
    );
    url::Url::parse(&link)
        .map_err(|e| ChatError::Config(format!("Invalid share link '{}': {}", link, e)))?;
    Ok(link)
}

/// Relative age of `then` as seen at `now`, e.g. `3 hours ago`
pub fn time_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);

    let (n, unit) = if secs < 60 {
        return "just now".to_string();
    } else if secs < 60 * 60 {
        (secs / 60, "minute")
    } else if secs < 60 * 60 * 24 {
        (secs / 3600, "hour")
    } else if secs < 60 * 60 * 24 * 30 {
        (secs / (60 * 60 * 24), "day")
    } else if secs < 60 * 60 * 24 * 365 {
        (secs / (60 * 60 * 24 * 30), "month")
    } else {
        (secs / (60 * 60 * 24 * 365), "year")
    };

    if n == 1 {
        format!("{} {} ago", n, unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}
