//! In-memory thread list and selection for one client session

use chrono::Utc;

use crate::error::{ChatError, Result};
use crate::model::{Message, MessageId, Thread, ThreadId};

/// Thread cache owned by a [`ChatSession`](super::ChatSession)
///
/// Threads are kept most recently updated first. Every mutation goes through
/// one of the update functions: [`append_message`](Self::append_message),
/// [`replace_message_at`](Self::replace_message_at),
/// [`remove_message`](Self::remove_message),
/// [`remove_thread`](Self::remove_thread) or [`upsert`](Self::upsert).
/// Writes are last-write-wins.
#[derive(Debug, Default)]
pub struct ChatContext {
    threads: Vec<Thread>,
    selected: Option<ThreadId>,
}

impl ChatContext {
    /// Creates an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the thread list with `threads`, keeping a still-present selection
    pub fn seed(&mut self, threads: Vec<Thread>) {
        self.threads = threads;
        self.sort();
        if self
            .selected
            .as_ref()
            .is_some_and(|id| self.thread(id).is_none())
        {
            self.selected = None;
        }
    }

    /// All threads, most recently updated first
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Look up a thread by exact id
    pub fn thread(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| &t.id == id)
    }

    /// Look up a thread by exact id or unique id prefix
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Validation` when the prefix matches several threads
    pub fn find(&self, id_or_prefix: &str) -> Result<Option<&Thread>> {
        if let Some(exact) = self.threads.iter().find(|t| t.id.as_str() == id_or_prefix) {
            return Ok(Some(exact));
        }
        let mut matches = self
            .threads
            .iter()
            .filter(|t| t.id.as_str().starts_with(id_or_prefix));
        match (matches.next(), matches.next()) {
            (None, _) => Ok(None),
            (Some(one), None) => Ok(Some(one)),
            (Some(_), Some(_)) => Err(ChatError::Validation(format!(
                "Thread id prefix '{}' is ambiguous",
                id_or_prefix
            ))
            .into()),
        }
    }

    /// Currently selected thread id
    pub fn selected(&self) -> Option<&ThreadId> {
        self.selected.as_ref()
    }

    /// Select a thread that is present in the list
    pub fn select(&mut self, id: &ThreadId) -> Result<()> {
        if self.thread(id).is_none() {
            return Err(ChatError::ThreadNotFound(id.to_string()).into());
        }
        self.selected = Some(id.clone());
        Ok(())
    }

    /// Insert a thread, or overwrite the entry with the same id
    pub fn upsert(&mut self, thread: Thread) {
        match self.threads.iter_mut().find(|t| t.id == thread.id) {
            Some(slot) => *slot = thread,
            None => self.threads.push(thread),
        }
        self.sort();
    }

    /// Insert or overwrite a thread and select it
    pub fn open_thread(&mut self, thread: Thread) {
        self.selected = Some(thread.id.clone());
        self.upsert(thread);
    }

    /// Swap the entry for `old` with `thread`, following the selection
    ///
    /// Used when a temporary thread is persisted and receives its real id.
    pub fn rekey(&mut self, old: &ThreadId, thread: Thread) -> Result<()> {
        let slot = self
            .threads
            .iter_mut()
            .find(|t| &t.id == old)
            .ok_or_else(|| ChatError::ThreadNotFound(old.to_string()))?;
        if self.selected.as_ref() == Some(old) {
            self.selected = Some(thread.id.clone());
        }
        *slot = thread;
        self.sort();
        Ok(())
    }

    /// Append a message and advance the thread's `last_update`
    pub fn append_message(&mut self, id: &ThreadId, message: Message) -> Result<()> {
        let thread = self.thread_mut(id)?;
        thread.last_update = message.created_at;
        thread.messages.push(message);
        self.sort();
        Ok(())
    }

    /// Overwrite the message at `index`
    ///
    /// # Errors
    ///
    /// Returns `ChatError::MessageNotFound` if `index` is out of range
    pub fn replace_message_at(
        &mut self,
        id: &ThreadId,
        index: usize,
        message: Message,
    ) -> Result<()> {
        let thread = self.thread_mut(id)?;
        let slot = thread.messages.get_mut(index).ok_or_else(|| {
            ChatError::MessageNotFound(format!("index {} in thread {}", index, id))
        })?;
        *slot = message;
        thread.last_update = Utc::now();
        self.sort();
        Ok(())
    }

    /// Remove the message with the given id, returning it
    ///
    /// # Errors
    ///
    /// Returns `ChatError::MessageNotFound` if the thread has no such message
    pub fn remove_message(&mut self, id: &ThreadId, message_id: MessageId) -> Result<Message> {
        let thread = self.thread_mut(id)?;
        let index = thread.position_of(message_id).ok_or_else(|| {
            ChatError::MessageNotFound(format!("{} in thread {}", message_id, id))
        })?;
        let removed = thread.messages.remove(index);
        thread.last_update = Utc::now();
        self.sort();
        Ok(removed)
    }

    /// Remove a thread, clearing the selection if it pointed at it
    pub fn remove_thread(&mut self, id: &ThreadId) -> Option<Thread> {
        let index = self.threads.iter().position(|t| &t.id == id)?;
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        Some(self.threads.remove(index))
    }

    /// Mutable access to a thread
    pub fn thread_mut(&mut self, id: &ThreadId) -> Result<&mut Thread> {
        self.threads
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| ChatError::ThreadNotFound(id.to_string()).into())
    }

    fn sort(&mut self) {
        self.threads.sort_by(|a, b| b.last_update.cmp(&a.last_update));
    }
}
