//! Per-thread streaming session state

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::model::ThreadId;

/// Phase of the submission state machine for one thread
///
/// `Idle -> Submitting -> Streaming -> Sealing -> Idle` on success and
/// `Submitting | Streaming -> Failed -> Idle` on error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// No request in flight
    Idle,
    /// Request prepared, nothing received yet
    Submitting,
    /// At least one `init` or `chunk` event has arrived
    Streaming,
    /// The final assistant message is being recorded
    Sealing,
    /// The request failed; the thread returns to `Idle` immediately after
    Failed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Streaming => "streaming",
            Self::Sealing => "sealing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Generation number of a streaming session
///
/// Every submission gets a fresh id, so events read for a session that was
/// cancelled or already finished can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Where the sealed assistant text goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealTarget {
    /// Append a new assistant message
    Append,
    /// Overwrite the assistant message at this index, keeping its id
    Replace {
        /// Position in the thread's message list
        index: usize,
    },
}

/// An in-flight submission for one thread
#[derive(Debug)]
pub struct StreamingSession {
    /// Generation id
    pub id: SessionId,
    /// Owning thread
    pub thread_id: ThreadId,
    /// Current phase, never `Idle` while the session exists
    pub phase: SessionPhase,
    /// Assistant text received so far
    pub buffer: String,
    /// Destination of the sealed reply
    pub target: SealTarget,
    /// Cancels the underlying request
    pub cancel: CancellationToken,
}

impl StreamingSession {
    /// Creates a session in the `Submitting` phase
    pub fn new(id: SessionId, thread_id: ThreadId, target: SealTarget) -> Self {
        Self {
            id,
            thread_id,
            phase: SessionPhase::Submitting,
            buffer: String::new(),
            target,
            cancel: CancellationToken::new(),
        }
    }

    /// Append a chunk, moving to `Streaming`; returns the whole buffer
    pub fn push_chunk(&mut self, text: &str) -> &str {
        self.phase = SessionPhase::Streaming;
        self.buffer.push_str(text);
        &self.buffer
    }

    /// Clear the live buffer, returning the text it held
    pub fn take_buffer(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_submitting_and_empty() {
        let session = StreamingSession::new(SessionId(1), ThreadId::new("t"), SealTarget::Append);
        assert_eq!(session.phase, SessionPhase::Submitting);
        assert!(session.buffer.is_empty());
        assert!(!session.cancel.is_cancelled());
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let mut session =
            StreamingSession::new(SessionId(1), ThreadId::new("t"), SealTarget::Append);
        assert_eq!(session.push_chunk("Hel"), "Hel");
        assert_eq!(session.push_chunk("lo!"), "Hello!");
        assert_eq!(session.phase, SessionPhase::Streaming);
        assert_eq!(session.take_buffer(), "Hello!");
        assert!(session.buffer.is_empty());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::Streaming.to_string(), "streaming");
        assert_eq!(SessionId(7).to_string(), "s7");
    }
}
