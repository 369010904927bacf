use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{ChatError, Result};
use crate::model::{Message, MessageId, Thread, ThreadId};
use crate::storage::ChatStore;

/// Process-local thread store
///
/// Nothing survives the process. Used by tests and `--ephemeral` sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    threads: Mutex<Vec<Thread>>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_thread(&self, title: &str, category: &str) -> Result<Thread> {
        let mut thread = Thread::temporary(category);
        thread.id = ThreadId::new(uuid::Uuid::new_v4().to_string());
        thread.title = title.to_string();
        self.threads.lock().await.push(thread.clone());
        Ok(thread)
    }

    async fn append_message(&self, thread_id: &ThreadId, message: &Message) -> Result<()> {
        let mut threads = self.threads.lock().await;
        let thread = threads
            .iter_mut()
            .find(|t| &t.id == thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;
        thread.messages.push(message.clone());
        thread.last_update = message.created_at;
        Ok(())
    }

    async fn replace_message(&self, thread_id: &ThreadId, message: &Message) -> Result<()> {
        let mut threads = self.threads.lock().await;
        let thread = threads
            .iter_mut()
            .find(|t| &t.id == thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;
        let slot = thread
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| {
                ChatError::MessageNotFound(format!("{} in thread {}", message.id, thread_id))
            })?;
        *slot = message.clone();
        thread.last_update = Utc::now();
        Ok(())
    }

    async fn delete_message(&self, thread_id: &ThreadId, message_id: MessageId) -> Result<()> {
        let mut threads = self.threads.lock().await;
        let thread = threads
            .iter_mut()
            .find(|t| &t.id == thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;
        let index = thread.position_of(message_id).ok_or_else(|| {
            ChatError::MessageNotFound(format!("{} in thread {}", message_id, thread_id))
        })?;
        thread.messages.remove(index);
        thread.last_update = Utc::now();
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<Thread>> {
        let mut threads = self.threads.lock().await.clone();
        threads.sort_by(|a, b| b.last_update.cmp(&a.last_update));
        Ok(threads)
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<()> {
        self.threads.lock().await.retain(|t| &t.id != thread_id);
        Ok(())
    }

    async fn load_thread(&self, id_or_prefix: &str) -> Result<Option<Thread>> {
        let threads = self.threads.lock().await;
        if let Some(exact) = threads.iter().find(|t| t.id.as_str() == id_or_prefix) {
            return Ok(Some(exact.clone()));
        }
        let matches: Vec<&Thread> = threads
            .iter()
            .filter(|t| t.id.as_str().starts_with(id_or_prefix))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some((*one).clone())),
            many => Err(ChatError::Validation(format!(
                "Thread id prefix '{}' is ambiguous ({} matches)",
                id_or_prefix,
                many.len()
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let thread = store.create_thread("t", "General").await.unwrap();
        assert!(!thread.is_temporary());

        store
            .append_message(&thread.id, &Message::user(1, "hi", None))
            .await
            .unwrap();
        let loaded = store.load_thread(thread.id.as_str()).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);

        store.delete_thread(&thread.id).await.unwrap();
        assert!(store.list_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_delete_message() {
        let store = MemoryStore::new();
        let thread = store.create_thread("t", "General").await.unwrap();
        store
            .append_message(&thread.id, &Message::user(1, "hi", None))
            .await
            .unwrap();
        store
            .append_message(&thread.id, &Message::assistant(2, "hello", vec![]))
            .await
            .unwrap();

        store.delete_message(&thread.id, 1).await.unwrap();
        let loaded = store.load_thread(thread.id.as_str()).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].id, 2);
        assert!(store.delete_message(&thread.id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_missing_thread() {
        let store = MemoryStore::new();
        let err = store
            .append_message(&ThreadId::new("nope"), &Message::user(1, "hi", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::ThreadNotFound(_))
        ));
    }
}
