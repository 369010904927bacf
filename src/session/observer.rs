//! Hooks through which a front end watches a [`ChatSession`](super::ChatSession)

use std::sync::Mutex;

use crate::model::ThreadId;
use crate::session::state::SessionPhase;

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational
    Info,
    /// Something finished
    Success,
    /// Rejected input or a skipped stream line
    Warning,
    /// A submission failed
    Error,
}

/// A user-visible message raised by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity
    pub level: NoticeLevel,
    /// Human-readable text
    pub message: String,
}

impl Notice {
    /// Creates a notice
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Receives session updates as they happen
///
/// Callbacks run synchronously while the session applies an event, in
/// arrival order. Implementations must not block.
pub trait ChatObserver: Send + Sync {
    /// The thread entered a new phase
    fn phase_changed(&self, _thread_id: &ThreadId, _phase: SessionPhase) {}

    /// The live assistant text changed; `text` is the whole buffer
    fn live_text(&self, _thread_id: &ThreadId, _text: &str) {}

    /// Something the user should see
    fn notice(&self, _thread_id: Option<&ThreadId>, _notice: &Notice) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ChatObserver for NoopObserver {}

/// One recorded observer callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// From [`ChatObserver::phase_changed`]
    Phase(ThreadId, SessionPhase),
    /// From [`ChatObserver::live_text`]
    Live(ThreadId, String),
    /// From [`ChatObserver::notice`]
    Notice(Notice),
}

/// Observer that keeps every callback, for tests and scripted runs
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    /// Creates an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<Observed> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Successive live-buffer values for a thread
    pub fn live_texts(&self, thread_id: &ThreadId) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Live(id, text) if &id == thread_id => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Successive phases for a thread
    pub fn phases(&self, thread_id: &ThreadId) -> Vec<SessionPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Phase(id, phase) if &id == thread_id => Some(phase),
                _ => None,
            })
            .collect()
    }

    /// Notices of the given level
    pub fn notices(&self, level: NoticeLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Notice(n) if n.level == level => Some(n.message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Observed) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ChatObserver for RecordingObserver {
    fn phase_changed(&self, thread_id: &ThreadId, phase: SessionPhase) {
        self.record(Observed::Phase(thread_id.clone(), phase));
    }

    fn live_text(&self, thread_id: &ThreadId, text: &str) {
        self.record(Observed::Live(thread_id.clone(), text.to_string()));
    }

    fn notice(&self, _thread_id: Option<&ThreadId>, notice: &Notice) {
        self.record(Observed::Notice(notice.clone()));
    }
}
