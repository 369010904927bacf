//! Submission and streaming state machine
//!
//! A [`ChatSession`] owns the in-memory thread list ([`ChatContext`]) and at
//! most one [`StreamingSession`] per thread. Submitting a message moves the
//! thread through
//!
//! ```text
//! Idle -> Submitting -> Streaming -> Sealing -> Idle
//!              \             \
//!               `-> Failed <-'  -> Idle
//! ```
//!
//! Each step is exposed on its own ([`ChatSession::begin_submission`],
//! [`ChatSession::apply_event`], [`ChatSession::fail`]) and
//! [`ChatSession::submit`] chains them over a [`CompletionBackend`] response.
//! Every failure ends at the submission boundary as a [`SubmitOutcome`] and a
//! single [`Notice`]; nothing is retried.

pub mod context;
pub mod observer;
pub mod state;

pub use context::ChatContext;
pub use observer::{
    ChatObserver, NoopObserver, Notice, NoticeLevel, Observed, RecordingObserver,
};
pub use state::{SealTarget, SessionId, SessionPhase, StreamingSession};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::{
    CompletionBackend, CompletionRequest, HistoryEntry, RegenerateRequest, SubmitRequest,
};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::model::{derive_title, Message, MessageId, Role, Thread, ThreadId, DEFAULT_CATEGORY};
use crate::storage::ChatStore;
use crate::stream::{EventDecoder, LineOutcome, StreamEvent};

/// Tunables for a [`ChatSession`]
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Characters of the first message kept as the thread title
    pub title_max_chars: usize,
    /// Category for new threads
    pub default_category: String,
    /// Pause after each applied chunk
    pub chunk_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            title_max_chars: 30,
            default_category: DEFAULT_CATEGORY.to_string(),
            chunk_delay: Duration::ZERO,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            title_max_chars: config.chat.title_max_chars,
            default_category: config.chat.default_category.clone(),
            chunk_delay: Duration::from_millis(config.chat.chunk_delay_ms),
        }
    }
}

/// What the user sends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// Message text
    pub text: String,
    /// Attached image reference
    pub image: Option<String>,
}

impl Submission {
    /// Text-only submission
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    /// Attach an image reference
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// How a submission or edit ended
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The reply was sealed into the thread
    Completed {
        /// Thread, with its persisted id
        thread_id: ThreadId,
        /// Sealed assistant message
        message: Message,
    },
    /// The edit was saved and no reply needed regenerating
    Edited {
        /// Edited thread
        thread_id: ThreadId,
    },
    /// Nothing was sent: empty input, unknown target, or a request in flight
    Rejected(ChatError),
    /// The request failed; the user message was kept
    Failed {
        /// Thread the request was for
        thread_id: ThreadId,
        /// Cause
        error: ChatError,
    },
    /// The request was abandoned before it finished
    Cancelled,
}

impl SubmitOutcome {
    /// Returns true if a reply was sealed
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Thread the outcome refers to, when known
    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            Self::Completed { thread_id, .. }
            | Self::Edited { thread_id }
            | Self::Failed { thread_id, .. } => Some(thread_id),
            Self::Rejected(_) | Self::Cancelled => None,
        }
    }
}

/// A request admitted by [`ChatSession::begin_submission`] or
/// [`ChatSession::begin_edit`], ready to be sent
#[derive(Debug)]
pub struct ActiveRequest {
    /// Generation id of the streaming session
    pub session_id: SessionId,
    /// Thread the reply belongs to
    pub thread_id: ThreadId,
    /// Body to send
    pub request: CompletionRequest,
    /// Fires when the thread is deleted or the request abandoned
    pub cancel: CancellationToken,
}

/// Effect of one event on its session
#[derive(Debug)]
pub enum EventFlow {
    /// Keep reading
    Continue,
    /// The session reached a terminal state
    Finished(SubmitOutcome),
    /// The session no longer exists; the event was dropped
    Stale,
}

#[derive(Debug, Default)]
struct SessionState {
    context: ChatContext,
    active: HashMap<ThreadId, StreamingSession>,
    next_session: u64,
}

impl SessionState {
    fn admit(
        &mut self,
        thread_id: &ThreadId,
        target: SealTarget,
    ) -> std::result::Result<(SessionId, CancellationToken), ChatError> {
        if self.active.contains_key(thread_id) {
            return Err(ChatError::SubmissionInProgress(thread_id.to_string()));
        }
        self.next_session += 1;
        let id = SessionId(self.next_session);
        let session = StreamingSession::new(id, thread_id.clone(), target);
        let cancel = session.cancel.clone();
        self.active.insert(thread_id.clone(), session);
        Ok((id, cancel))
    }

    fn thread_of(&self, session_id: SessionId) -> Option<ThreadId> {
        self.active
            .values()
            .find(|s| s.id == session_id)
            .map(|s| s.thread_id.clone())
    }
}

/// Front-end independent chat client state
///
/// Cloning is cheap; clones share the same threads and sessions.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use chatstream::client::ScriptedBackend;
/// use chatstream::session::{ChatSession, NoopObserver, SessionSettings, Submission};
/// use chatstream::storage::MemoryStore;
///
/// # #[tokio::main]
/// # async fn main() {
/// let backend = Arc::new(ScriptedBackend::new());
/// backend.push_lines(&[r#"data: {"type":"done","content":"Hello!"}"#, "data: [DONE]"]);
///
/// let session = ChatSession::new(
///     Arc::new(MemoryStore::new()),
///     backend,
///     Arc::new(NoopObserver),
///     SessionSettings::default(),
/// );
/// let thread = session.new_chat().await;
/// let outcome = session.submit(&thread, Submission::text("hi")).await;
/// assert!(outcome.is_completed());
/// # }
/// ```
#[derive(Clone)]
pub struct ChatSession {
    store: Arc<dyn ChatStore>,
    backend: Arc<dyn CompletionBackend>,
    observer: Arc<dyn ChatObserver>,
    settings: SessionSettings,
    state: Arc<Mutex<SessionState>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Create a session with an empty thread list
    pub fn new(
        store: Arc<dyn ChatStore>,
        backend: Arc<dyn CompletionBackend>,
        observer: Arc<dyn ChatObserver>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            backend,
            observer,
            settings,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Settings in effect
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Seed the thread list from the store
    ///
    /// Unsaved temporary threads are kept. Returns the number of stored
    /// threads.
    pub async fn load_threads(&self) -> Result<usize> {
        let mut threads = self.store.list_threads().await?;
        let count = threads.len();

        let mut state = self.state.lock().await;
        threads.extend(
            state
                .context
                .threads()
                .iter()
                .filter(|t| t.is_temporary())
                .cloned(),
        );
        state.context.seed(threads);
        tracing::info!("Loaded {} threads", count);
        Ok(count)
    }

    /// Start a new temporary thread and select it
    pub async fn new_chat(&self) -> ThreadId {
        let thread = Thread::temporary(self.settings.default_category.clone());
        let id = thread.id.clone();
        self.state.lock().await.context.open_thread(thread);
        tracing::debug!(thread_id = %id, "Started new chat");
        id
    }

    /// Select a thread by id or unique prefix, loading it from the store if needed
    ///
    /// # Errors
    ///
    /// Returns `ChatError::ThreadNotFound` if no thread matches, or
    /// `ChatError::Validation` if the prefix is ambiguous
    pub async fn select_thread(&self, id_or_prefix: &str) -> Result<Thread> {
        {
            let mut state = self.state.lock().await;
            if let Some(thread) = state.context.find(id_or_prefix)?.cloned() {
                state.context.select(&thread.id)?;
                return Ok(thread);
            }
        }

        let thread = self
            .store
            .load_thread(id_or_prefix)
            .await?
            .ok_or_else(|| ChatError::ThreadNotFound(id_or_prefix.to_string()))?;
        self.state.lock().await.context.open_thread(thread.clone());
        Ok(thread)
    }

    /// Delete a thread from the store and the thread list
    ///
    /// A request in flight for the thread is cancelled first.
    pub async fn delete_thread(&self, thread_id: &ThreadId) -> Result<()> {
        self.cancel(thread_id).await;

        if !thread_id.is_temporary() {
            self.store.delete_thread(thread_id).await?;
        }

        let removed = self.state.lock().await.context.remove_thread(thread_id);
        if removed.is_none() && thread_id.is_temporary() {
            return Err(ChatError::ThreadNotFound(thread_id.to_string()).into());
        }
        tracing::info!(thread_id = %thread_id, "Deleted thread");
        Ok(())
    }

    /// Abandon the request in flight for a thread
    ///
    /// Returns false if nothing was in flight. Events that arrive for the
    /// abandoned session afterwards are dropped.
    pub async fn cancel(&self, thread_id: &ThreadId) -> bool {
        let Some(mut session) = self.state.lock().await.active.remove(thread_id) else {
            return false;
        };
        session.cancel.cancel();
        session.take_buffer();
        tracing::info!(thread_id = %thread_id, session = %session.id, "Cancelled request");
        self.observer.live_text(thread_id, "");
        self.observer.phase_changed(thread_id, SessionPhase::Idle);
        self.observer.notice(
            Some(thread_id),
            &Notice::new(NoticeLevel::Warning, "Request cancelled"),
        );
        true
    }

    /// Delete one message from a thread
    ///
    /// Nothing is regenerated; the rest of the thread is left as it is.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::SubmissionInProgress` while a request is in flight
    /// for the thread, `ChatError::ThreadNotFound` or
    /// `ChatError::MessageNotFound` for unknown targets
    pub async fn delete_message(
        &self,
        thread_id: &ThreadId,
        message_id: MessageId,
    ) -> Result<Message> {
        let mut state = self.state.lock().await;
        if state.active.contains_key(thread_id) {
            return Err(ChatError::SubmissionInProgress(thread_id.to_string()).into());
        }
        let thread = state
            .context
            .thread(thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;
        if thread.position_of(message_id).is_none() {
            return Err(ChatError::MessageNotFound(format!(
                "{} in thread {}",
                message_id, thread_id
            ))
            .into());
        }

        if !thread.is_temporary() {
            self.store.delete_message(thread_id, message_id).await?;
        }
        let removed = state.context.remove_message(thread_id, message_id)?;
        tracing::info!(thread_id = %thread_id, message_id, "Deleted message");
        Ok(removed)
    }

    /// Snapshot of all threads, most recently updated first
    pub async fn threads(&self) -> Vec<Thread> {
        self.state.lock().await.context.threads().to_vec()
    }

    /// Snapshot of one thread
    pub async fn thread(&self, thread_id: &ThreadId) -> Option<Thread> {
        self.state.lock().await.context.thread(thread_id).cloned()
    }

    /// Currently selected thread
    pub async fn selected(&self) -> Option<ThreadId> {
        self.state.lock().await.context.selected().cloned()
    }

    /// Current phase of a thread
    pub async fn phase(&self, thread_id: &ThreadId) -> SessionPhase {
        self.state
            .lock()
            .await
            .active
            .get(thread_id)
            .map(|s| s.phase)
            .unwrap_or(SessionPhase::Idle)
    }

    /// Assistant text streamed so far for a thread
    pub async fn live_text(&self, thread_id: &ThreadId) -> String {
        self.state
            .lock()
            .await
            .active
            .get(thread_id)
            .map(|s| s.buffer.clone())
            .unwrap_or_default()
    }

    /// Submit a message and stream the reply into the thread
    pub async fn submit(&self, thread_id: &ThreadId, submission: Submission) -> SubmitOutcome {
        match self.begin_submission(thread_id, submission).await {
            Ok(active) => self.drive(active).await,
            Err(outcome) => outcome,
        }
    }

    /// Edit a message and regenerate the assistant reply right after it
    ///
    /// The reply is only regenerated when the message directly following the
    /// edited one is an assistant message; otherwise the edit is saved and
    /// no request is made.
    pub async fn edit_message(
        &self,
        thread_id: &ThreadId,
        message_id: MessageId,
        new_content: &str,
    ) -> SubmitOutcome {
        match self.begin_edit(thread_id, message_id, new_content).await {
            Ok(active) => self.drive(active).await,
            Err(outcome) => outcome,
        }
    }

    /// Validate a submission, persist the thread if it is new, and append
    /// the user message
    ///
    /// On success the thread is `Submitting` and the returned request is
    /// ready for [`drive`](Self::drive). `Err` carries the terminal outcome:
    /// `Rejected` if nothing changed, `Failed` if saving failed after the
    /// thread was claimed.
    pub async fn begin_submission(
        &self,
        thread_id: &ThreadId,
        submission: Submission,
    ) -> std::result::Result<ActiveRequest, SubmitOutcome> {
        let text = submission.text.trim().to_string();
        let image = submission.image.filter(|i| !i.trim().is_empty());

        let (session_id, cancel, thread) = {
            let mut state = self.state.lock().await;
            if text.is_empty() && image.is_none() {
                return Err(self.reject(
                    thread_id,
                    ChatError::Validation("Message is empty".to_string()),
                ));
            }
            let Some(thread) = state.context.thread(thread_id).cloned() else {
                return Err(self.reject(thread_id, ChatError::ThreadNotFound(thread_id.to_string())));
            };
            match state.admit(thread_id, SealTarget::Append) {
                Ok((session_id, cancel)) => (session_id, cancel, thread),
                Err(e) => return Err(self.reject(thread_id, e)),
            }
        };

        match self
            .prepare_submission(thread, text, image)
            .await
        {
            Ok((thread_id, request)) => {
                tracing::info!(thread_id = %thread_id, session = %session_id, "Submitting message");
                self.observer
                    .phase_changed(&thread_id, SessionPhase::Submitting);
                self.observer.live_text(&thread_id, "");
                Ok(ActiveRequest {
                    session_id,
                    thread_id,
                    request,
                    cancel,
                })
            }
            Err(e) => Err(self.fail(session_id, e).await),
        }
    }

    async fn prepare_submission(
        &self,
        thread: Thread,
        text: String,
        image: Option<String>,
    ) -> Result<(ThreadId, CompletionRequest)> {
        let mut thread_id = thread.id.clone();

        if thread.is_temporary() {
            let title = derive_title(&text, self.settings.title_max_chars);
            let created = self.store.create_thread(&title, &thread.category).await?;
            tracing::info!(
                temp_id = %thread_id,
                thread_id = %created.id,
                "Persisted new thread"
            );

            let mut state = self.state.lock().await;
            state.context.rekey(&thread_id, created.clone())?;
            if let Some(mut session) = state.active.remove(&thread_id) {
                session.thread_id = created.id.clone();
                state.active.insert(created.id.clone(), session);
            }
            thread_id = created.id;
        }

        let (message, history) = {
            let mut state = self.state.lock().await;
            let thread = state
                .context
                .thread(&thread_id)
                .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;
            let history: Vec<HistoryEntry> =
                thread.messages.iter().map(HistoryEntry::from).collect();
            let message = Message::user(thread.next_message_id(), text.clone(), image.clone());

            state.context.append_message(&thread_id, message.clone())?;
            (message, history)
        };

        self.store.append_message(&thread_id, &message).await?;

        let request = CompletionRequest::Submit(SubmitRequest {
            chat_id: thread_id.to_string(),
            content: text,
            image,
            history,
        });
        Ok((thread_id, request))
    }

    /// Save an edit and, when a reply follows it, claim the thread for
    /// regeneration
    ///
    /// `Err` carries the terminal outcome: `Edited` when there is nothing to
    /// regenerate, `Rejected` or `Failed` otherwise.
    pub async fn begin_edit(
        &self,
        thread_id: &ThreadId,
        message_id: MessageId,
        new_content: &str,
    ) -> std::result::Result<ActiveRequest, SubmitOutcome> {
        let content = new_content.trim();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if content.is_empty() {
            return Err(self.reject(
                thread_id,
                ChatError::Validation("Edited message is empty".to_string()),
            ));
        }
        if state.active.contains_key(thread_id) {
            return Err(self.reject(
                thread_id,
                ChatError::SubmissionInProgress(thread_id.to_string()),
            ));
        }
        let Some(thread) = state.context.thread(thread_id) else {
            return Err(self.reject(thread_id, ChatError::ThreadNotFound(thread_id.to_string())));
        };
        let Some(index) = thread.position_of(message_id) else {
            return Err(self.reject(
                thread_id,
                ChatError::MessageNotFound(format!("{} in thread {}", message_id, thread_id)),
            ));
        };

        if thread.messages[index].content == content {
            tracing::debug!(thread_id = %thread_id, message_id, "Edit leaves message unchanged");
            return Err(SubmitOutcome::Edited {
                thread_id: thread_id.clone(),
            });
        }

        let edited = Message {
            content: content.to_string(),
            ..thread.messages[index].clone()
        };
        let history: Vec<HistoryEntry> = thread.messages[..index]
            .iter()
            .map(HistoryEntry::from)
            .collect();
        let regenerate = thread
            .messages
            .get(index + 1)
            .is_some_and(|m| m.role == Role::Assistant);
        let persisted = !thread.is_temporary();

        let admitted = if regenerate {
            match state.admit(thread_id, SealTarget::Replace { index: index + 1 }) {
                Ok(admitted) => Some(admitted),
                Err(e) => return Err(self.reject(thread_id, e)),
            }
        } else {
            None
        };

        if let Err(e) = state
            .context
            .replace_message_at(thread_id, index, edited.clone())
        {
            return Err(match admitted {
                Some((session_id, _)) => self.fail_locked(state, session_id, e),
                None => self.reject(thread_id, into_chat_error(e)),
            });
        }
        if persisted {
            if let Err(e) = self.store.replace_message(thread_id, &edited).await {
                return Err(match admitted {
                    Some((session_id, _)) => self.fail_locked(state, session_id, e),
                    None => self.report_failure(thread_id, into_chat_error(e)),
                });
            }
        }

        let Some((session_id, cancel)) = admitted else {
            tracing::info!(thread_id = %thread_id, message_id, "Saved edit without regeneration");
            self.observer.notice(
                Some(thread_id),
                &Notice::new(NoticeLevel::Info, "Message updated"),
            );
            return Err(SubmitOutcome::Edited {
                thread_id: thread_id.clone(),
            });
        };
        drop(guard);

        tracing::info!(thread_id = %thread_id, session = %session_id, message_id, "Regenerating reply");
        self.observer
            .phase_changed(thread_id, SessionPhase::Submitting);
        self.observer.live_text(thread_id, "");

        Ok(ActiveRequest {
            session_id,
            thread_id: thread_id.clone(),
            request: CompletionRequest::Regenerate(RegenerateRequest {
                chat_id: thread_id.to_string(),
                message_id,
                new_content: content.to_string(),
                history,
            }),
            cancel,
        })
    }

    /// Send an admitted request and apply its events until a terminal state
    pub async fn drive(&self, active: ActiveRequest) -> SubmitOutcome {
        let ActiveRequest {
            session_id,
            thread_id,
            request,
            cancel,
        } = active;

        let opened = tokio::select! {
            _ = cancel.cancelled() => return SubmitOutcome::Cancelled,
            opened = self.backend.open(&request) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(e) => return self.fail(session_id, e).await,
        };

        let mut decoder = EventDecoder::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return SubmitOutcome::Cancelled,
                next = body.next() => next,
            };
            let outcomes = match next {
                Some(Ok(bytes)) => decoder.feed(&bytes),
                Some(Err(e)) => return self.fail(session_id, e).await,
                None => break,
            };
            if let Some(outcome) = self.consume(&thread_id, session_id, outcomes).await {
                return outcome;
            }
            if decoder.saw_sentinel() {
                break;
            }
        }

        let rest = decoder.finish();
        if let Some(outcome) = self.consume(&thread_id, session_id, rest).await {
            return outcome;
        }
        self.finish_without_done(session_id).await
    }

    async fn consume(
        &self,
        thread_id: &ThreadId,
        session_id: SessionId,
        outcomes: Vec<LineOutcome>,
    ) -> Option<SubmitOutcome> {
        for outcome in outcomes {
            match outcome {
                LineOutcome::Event(event) => {
                    let is_chunk = matches!(event, StreamEvent::Chunk(_));
                    match self.apply_event(session_id, event).await {
                        EventFlow::Continue => {
                            if is_chunk && !self.settings.chunk_delay.is_zero() {
                                tokio::time::sleep(self.settings.chunk_delay).await;
                            }
                        }
                        EventFlow::Finished(outcome) => return Some(outcome),
                        EventFlow::Stale => return Some(SubmitOutcome::Cancelled),
                    }
                }
                LineOutcome::Malformed { reason } => {
                    tracing::warn!(thread_id = %thread_id, "Skipping malformed stream line: {}", reason);
                    self.observer.notice(
                        Some(thread_id),
                        &Notice::new(
                            NoticeLevel::Warning,
                            format!("Skipped malformed stream line: {}", reason),
                        ),
                    );
                }
                LineOutcome::Ignored => {}
            }
        }
        None
    }

    /// Apply one stream event to the session with the given id
    ///
    /// Events for a session that was cancelled or already finished return
    /// [`EventFlow::Stale`] and change nothing.
    pub async fn apply_event(&self, session_id: SessionId, event: StreamEvent) -> EventFlow {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(session) = state.active.values_mut().find(|s| s.id == session_id) else {
            tracing::debug!(session = %session_id, kind = event.kind(), "Dropping event for finished session");
            return EventFlow::Stale;
        };

        match event {
            StreamEvent::Init(snapshot) => {
                let entered = session.phase == SessionPhase::Submitting;
                session.phase = SessionPhase::Streaming;
                let thread_id = session.thread_id.clone();
                if let Ok(thread) = state.context.thread_mut(&thread_id) {
                    thread.merge_snapshot(&snapshot);
                }
                if entered {
                    self.observer
                        .phase_changed(&thread_id, SessionPhase::Streaming);
                }
                EventFlow::Continue
            }
            StreamEvent::Chunk(text) => {
                let entered = session.phase == SessionPhase::Submitting;
                session.push_chunk(&text);
                if entered {
                    self.observer
                        .phase_changed(&session.thread_id, SessionPhase::Streaming);
                }
                self.observer.live_text(&session.thread_id, &session.buffer);
                EventFlow::Continue
            }
            StreamEvent::Done { content, images } => {
                EventFlow::Finished(self.seal_locked(state, session_id, content, images).await)
            }
            StreamEvent::Error(message) => EventFlow::Finished(self.fail_locked(
                state,
                session_id,
                ChatError::Server(message).into(),
            )),
            StreamEvent::Unrecognized(kind) => {
                tracing::warn!(session = %session_id, "Ignoring unrecognized event type: {}", kind);
                EventFlow::Continue
            }
        }
    }

    /// Fail the session with the given id
    ///
    /// The user message stays in the thread, the live buffer is cleared and
    /// a single error notice is raised.
    pub async fn fail(&self, session_id: SessionId, error: anyhow::Error) -> SubmitOutcome {
        let mut guard = self.state.lock().await;
        self.fail_locked(&mut guard, session_id, error)
    }

    async fn finish_without_done(&self, session_id: SessionId) -> SubmitOutcome {
        let mut guard = self.state.lock().await;
        if let Some(session) = guard.active.values().find(|s| s.id == session_id) {
            tracing::warn!(
                session = %session_id,
                streamed = session.buffer.len(),
                "Stream ended without a done event"
            );
        }
        self.fail_locked(
            &mut guard,
            session_id,
            ChatError::Transport("stream ended before completion".to_string()).into(),
        )
    }

    async fn seal_locked(
        &self,
        state: &mut SessionState,
        session_id: SessionId,
        content: String,
        images: Vec<String>,
    ) -> SubmitOutcome {
        let Some(session) = state.active.values_mut().find(|s| s.id == session_id) else {
            return SubmitOutcome::Cancelled;
        };
        session.phase = SessionPhase::Sealing;
        let streamed = session.take_buffer();
        let thread_id = session.thread_id.clone();
        let target = session.target;

        if streamed != content {
            tracing::debug!(
                session = %session_id,
                streamed = streamed.len(),
                sealed = content.len(),
                "Final content differs from streamed text"
            );
        }
        self.observer.phase_changed(&thread_id, SessionPhase::Sealing);
        self.observer.live_text(&thread_id, "");

        match self
            .record_reply(state, &thread_id, target, content, images)
            .await
        {
            Ok(message) => {
                state.active.remove(&thread_id);
                tracing::info!(
                    thread_id = %thread_id,
                    session = %session_id,
                    message_id = message.id,
                    "Reply sealed"
                );
                self.observer.phase_changed(&thread_id, SessionPhase::Idle);
                SubmitOutcome::Completed { thread_id, message }
            }
            Err(e) => self.fail_locked(state, session_id, e),
        }
    }

    async fn record_reply(
        &self,
        state: &mut SessionState,
        thread_id: &ThreadId,
        target: SealTarget,
        content: String,
        images: Vec<String>,
    ) -> Result<Message> {
        let thread = state
            .context
            .thread(thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;

        match target {
            SealTarget::Append => {
                let message = Message::assistant(thread.next_message_id(), content, images);
                state.context.append_message(thread_id, message.clone())?;
                self.store.append_message(thread_id, &message).await?;
                Ok(message)
            }
            SealTarget::Replace { index } => {
                let existing = thread.messages.get(index).ok_or_else(|| {
                    ChatError::MessageNotFound(format!("index {} in thread {}", index, thread_id))
                })?;
                let message = Message {
                    content,
                    images,
                    ..existing.clone()
                };
                state
                    .context
                    .replace_message_at(thread_id, index, message.clone())?;
                self.store.replace_message(thread_id, &message).await?;
                Ok(message)
            }
        }
    }

    fn fail_locked(
        &self,
        state: &mut SessionState,
        session_id: SessionId,
        error: anyhow::Error,
    ) -> SubmitOutcome {
        let error = into_chat_error(error);
        let Some(thread_id) = state.thread_of(session_id) else {
            tracing::debug!(session = %session_id, "Failure for finished session ignored: {}", error);
            return SubmitOutcome::Cancelled;
        };
        if let Some(mut session) = state.active.remove(&thread_id) {
            session.phase = SessionPhase::Failed;
            session.take_buffer();
        }

        tracing::error!(thread_id = %thread_id, session = %session_id, "Submission failed: {}", error);
        self.observer.live_text(&thread_id, "");
        self.observer.phase_changed(&thread_id, SessionPhase::Failed);
        self.report_failure(&thread_id, error)
    }

    fn report_failure(&self, thread_id: &ThreadId, error: ChatError) -> SubmitOutcome {
        self.observer.notice(
            Some(thread_id),
            &Notice::new(NoticeLevel::Error, error.to_string()),
        );
        self.observer.phase_changed(thread_id, SessionPhase::Idle);
        SubmitOutcome::Failed {
            thread_id: thread_id.clone(),
            error,
        }
    }

    fn reject(&self, thread_id: &ThreadId, error: ChatError) -> SubmitOutcome {
        tracing::warn!(thread_id = %thread_id, "Submission rejected: {}", error);
        let level = if error.is_rejection() {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Error
        };
        self.observer
            .notice(Some(thread_id), &Notice::new(level, error.to_string()));
        SubmitOutcome::Rejected(error)
    }
}

fn into_chat_error(error: anyhow::Error) -> ChatError {
    match error.downcast::<ChatError>() {
        Ok(chat_error) => chat_error,
        Err(other) => ChatError::Transport(format!("{:#}", other)),
    }
}
