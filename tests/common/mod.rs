use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use chatstream::client::CompletionBackend;
use chatstream::session::{ChatObserver, ChatSession, RecordingObserver, SessionSettings};
use chatstream::storage::{ChatStore, SqliteStore};

#[allow(dead_code)]
pub fn create_temp_store() -> (SqliteStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("history.db");
    let store = SqliteStore::new_with_path(db_path).expect("failed to create sqlite store with path");
    (store, tmp)
}

#[allow(dead_code)]
pub fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("history.db")
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    std::fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Session over the given store and backend with a recording observer
#[allow(dead_code)]
pub fn session_with(
    store: Arc<dyn ChatStore>,
    backend: Arc<dyn CompletionBackend>,
) -> (ChatSession, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let session = ChatSession::new(
        store,
        backend,
        observer.clone() as Arc<dyn ChatObserver>,
        SessionSettings::default(),
    );
    (session, observer)
}

/// A complete `data:` stream body ending with the sentinel
#[allow(dead_code)]
pub fn sse_body(chunks: &[&str], done: &str) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({ "type": "chunk", "content": chunk })
        ));
    }
    body.push_str(&format!(
        "data: {}\n\n",
        json!({ "type": "done", "content": done })
    ));
    body.push_str("data: [DONE]\n\n");
    body
}
