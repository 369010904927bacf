use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use crate::error::{ChatError, Result};
use crate::model::{Message, MessageId, Role, Thread, ThreadId};
use crate::storage::ChatStore;

/// Environment variable overriding the history database location
pub const HISTORY_DB_ENV: &str = "CHATSTREAM_HISTORY_DB";

/// Length of a full hyphenated UUID
const FULL_ID_LEN: usize = 36;

/// SQLite-backed thread history
///
/// Each call opens its own connection on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

fn storage_error(e: anyhow::Error) -> ChatError {
    ChatError::Storage(format!("{:#}", e))
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now()) // Fallback if parsing fails
}

impl SqliteStore {
    /// Create a store in the user's data directory
    ///
    /// Honors `CHATSTREAM_HISTORY_DB` when set.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var(HISTORY_DB_ENV) {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("dev", "chatstream", "chatstream")
            .ok_or_else(|| ChatError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(storage_error)?;

        Self::new_with_path(data_dir.join("history.db"))
    }

    /// Create a store that uses the specified database path
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::storage::SqliteStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteStore::new_with_path(dir.path().join("history.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(storage_error)?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Path of the backing database file
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(storage_error)?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_update TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                thread_id TEXT NOT NULL,
                id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                images JSON NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, id)
            );",
        )
        .context("Failed to create tables")
        .map_err(storage_error)?;
        Ok(())
    }

    /// Run a storage operation on the blocking thread pool
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .context("Storage task failed")
            .map_err(storage_error)?
    }

    fn resolve_id(&self, conn: &Connection, id_or_prefix: &str) -> Result<Option<String>> {
        if id_or_prefix.len() == FULL_ID_LEN {
            let found: Option<String> = conn
                .query_row(
                    "SELECT id FROM threads WHERE id = ?",
                    params![id_or_prefix],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to query thread")
                .map_err(storage_error)?;
            return Ok(found);
        }

        let mut stmt = conn
            .prepare("SELECT id FROM threads WHERE id LIKE ? ESCAPE '\\'")
            .context("Failed to prepare statement")
            .map_err(storage_error)?;
        let ids: Vec<String> = stmt
            .query_map(params![format!("{}%", escape_like(id_or_prefix))], |row| {
                row.get(0)
            })
            .context("Failed to query threads")
            .map_err(storage_error)?
            .flatten()
            .collect();

        match ids.len() {
            0 => Ok(None),
            1 => Ok(ids.into_iter().next()),
            n => Err(ChatError::Validation(format!(
                "Thread id prefix '{}' is ambiguous ({} matches)",
                id_or_prefix, n
            ))
            .into()),
        }
    }

    fn messages_for(&self, conn: &Connection, thread_id: &str) -> Result<Vec<Message>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, role, content, images, created_at
                FROM messages WHERE thread_id = ? ORDER BY id ASC",
            )
            .context("Failed to prepare statement")
            .map_err(storage_error)?;

        let rows = stmt
            .query_map(params![thread_id], |row| {
                let id: i64 = row.get(0)?;
                let role: String = row.get(1)?;
                let content: String = row.get(2)?;
                let images: String = row.get(3)?;
                let created_at: String = row.get(4)?;
                Ok((id, role, content, images, created_at))
            })
            .context("Failed to query messages")
            .map_err(storage_error)?;

        let mut messages = Vec::new();
        for (id, role, content, images, created_at) in rows.flatten() {
            let role: Role = role.parse()?;
            let images: Vec<String> = serde_json::from_str(&images).unwrap_or_default();
            messages.push(Message {
                id: id as u64,
                role,
                content,
                images,
                created_at: parse_timestamp(&created_at),
            });
        }
        Ok(messages)
    }

    fn thread_row(&self, conn: &Connection, id: &str) -> Result<Option<Thread>> {
        let row = conn
            .query_row(
                "SELECT id, title, category, created_at, last_update FROM threads WHERE id = ?",
                params![id],
                |row| {
                    let id: String = row.get(0)?;
                    let title: String = row.get(1)?;
                    let category: String = row.get(2)?;
                    let created_at: String = row.get(3)?;
                    let last_update: String = row.get(4)?;
                    Ok((id, title, category, created_at, last_update))
                },
            )
            .optional()
            .context("Failed to query thread")
            .map_err(storage_error)?;

        match row {
            Some((id, title, category, created_at, last_update)) => {
                let messages = self.messages_for(conn, &id)?;
                Ok(Some(Thread {
                    id: ThreadId::new(id),
                    title,
                    category,
                    messages,
                    created_at: parse_timestamp(&created_at),
                    last_update: parse_timestamp(&last_update),
                }))
            }
            None => Ok(None),
        }
    }

    fn insert_thread(&self, title: &str, category: &str) -> Result<Thread> {
        let conn = self.open()?;
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO threads (id, title, category, created_at, last_update)
            VALUES (?, ?, ?, ?, ?)",
            params![id, title, category, format_timestamp(now), format_timestamp(now)],
        )
        .context("Failed to insert thread")
        .map_err(storage_error)?;

        tracing::debug!(thread_id = %id, "Created thread");

        Ok(Thread {
            id: ThreadId::new(id),
            title: title.to_string(),
            category: category.to_string(),
            messages: Vec::new(),
            created_at: now,
            last_update: now,
        })
    }

    fn insert_message(&self, thread_id: &ThreadId, message: &Message) -> Result<()> {
        let mut conn = self.open()?;
        let images = serde_json::to_string(&message.images)
            .context("Failed to serialize images")
            .map_err(storage_error)?;

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(storage_error)?;

        let updated = tx
            .execute(
                "UPDATE threads SET last_update = ? WHERE id = ?",
                params![format_timestamp(message.created_at), thread_id.as_str()],
            )
            .context("Failed to update thread")
            .map_err(storage_error)?;
        if updated == 0 {
            return Err(ChatError::ThreadNotFound(thread_id.to_string()).into());
        }

        tx.execute(
            "INSERT INTO messages (thread_id, id, role, content, images, created_at)
            VALUES (?, ?, ?, ?, ?, ?)",
            params![
                thread_id.as_str(),
                message.id as i64,
                message.role.to_string(),
                message.content,
                images,
                format_timestamp(message.created_at)
            ],
        )
        .context("Failed to insert message")
        .map_err(storage_error)?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(storage_error)?;

        Ok(())
    }

    fn update_message(&self, thread_id: &ThreadId, message: &Message) -> Result<()> {
        let mut conn = self.open()?;
        let images = serde_json::to_string(&message.images)
            .context("Failed to serialize images")
            .map_err(storage_error)?;

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(storage_error)?;

        let updated = tx
            .execute(
                "UPDATE messages SET content = ?, images = ? WHERE thread_id = ? AND id = ?",
                params![
                    message.content,
                    images,
                    thread_id.as_str(),
                    message.id as i64
                ],
            )
            .context("Failed to update message")
            .map_err(storage_error)?;
        if updated == 0 {
            return Err(ChatError::MessageNotFound(format!(
                "{} in thread {}",
                message.id, thread_id
            ))
            .into());
        }

        touch_thread(&tx, thread_id)?;
        tx.commit()
            .context("Failed to commit transaction")
            .map_err(storage_error)?;

        Ok(())
    }

    fn remove_message(&self, thread_id: &ThreadId, message_id: MessageId) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(storage_error)?;

        let deleted = tx
            .execute(
                "DELETE FROM messages WHERE thread_id = ? AND id = ?",
                params![thread_id.as_str(), message_id as i64],
            )
            .context("Failed to delete message")
            .map_err(storage_error)?;
        if deleted == 0 {
            return Err(ChatError::MessageNotFound(format!(
                "{} in thread {}",
                message_id, thread_id
            ))
            .into());
        }

        touch_thread(&tx, thread_id)?;
        tx.commit()
            .context("Failed to commit transaction")
            .map_err(storage_error)?;

        tracing::debug!(thread_id = %thread_id, message_id, "Deleted message");
        Ok(())
    }

    fn all_threads(&self) -> Result<Vec<Thread>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT id FROM threads ORDER BY last_update DESC")
            .context("Failed to prepare statement")
            .map_err(storage_error)?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query threads")
            .map_err(storage_error)?
            .flatten()
            .collect();

        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(thread) = self.thread_row(&conn, &id)? {
                threads.push(thread);
            }
        }
        Ok(threads)
    }

    fn remove_thread(&self, thread_id: &ThreadId) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(storage_error)?;

        tx.execute(
            "DELETE FROM messages WHERE thread_id = ?",
            params![thread_id.as_str()],
        )
        .context("Failed to delete messages")
        .map_err(storage_error)?;
        tx.execute(
            "DELETE FROM threads WHERE id = ?",
            params![thread_id.as_str()],
        )
        .context("Failed to delete thread")
        .map_err(storage_error)?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(storage_error)?;

        tracing::debug!(thread_id = %thread_id, "Deleted thread");
        Ok(())
    }

    fn find_thread(&self, id_or_prefix: &str) -> Result<Option<Thread>> {
        let conn = self.open()?;
        match self.resolve_id(&conn, id_or_prefix)? {
            Some(id) => self.thread_row(&conn, &id),
            None => Ok(None),
        }
    }
}

/// Escape `LIKE` wildcards so user input only matches literally
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn touch_thread(conn: &Connection, thread_id: &ThreadId) -> Result<()> {
    conn.execute(
        "UPDATE threads SET last_update = ? WHERE id = ?",
        params![format_timestamp(Utc::now()), thread_id.as_str()],
    )
    .context("Failed to update thread")
    .map_err(storage_error)?;
    Ok(())
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_thread(&self, title: &str, category: &str) -> Result<Thread> {
        let (title, category) = (title.to_string(), category.to_string());
        self.blocking(move |store| store.insert_thread(&title, &category))
            .await
    }

    async fn append_message(&self, thread_id: &ThreadId, message: &Message) -> Result<()> {
        let (thread_id, message) = (thread_id.clone(), message.clone());
        self.blocking(move |store| store.insert_message(&thread_id, &message))
            .await
    }

    async fn replace_message(&self, thread_id: &ThreadId, message: &Message) -> Result<()> {
        let (thread_id, message) = (thread_id.clone(), message.clone());
        self.blocking(move |store| store.update_message(&thread_id, &message))
            .await
    }

    async fn delete_message(&self, thread_id: &ThreadId, message_id: MessageId) -> Result<()> {
        let thread_id = thread_id.clone();
        self.blocking(move |store| store.remove_message(&thread_id, message_id))
            .await
    }

    async fn list_threads(&self) -> Result<Vec<Thread>> {
        self.blocking(|store| store.all_threads()).await
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<()> {
        let thread_id = thread_id.clone();
        self.blocking(move |store| store.remove_thread(&thread_id))
            .await
    }

    async fn load_thread(&self, id_or_prefix: &str) -> Result<Option<Thread>> {
        let id_or_prefix = id_or_prefix.to_string();
        self.blocking(move |store| store.find_thread(&id_or_prefix))
            .await
    }
}
