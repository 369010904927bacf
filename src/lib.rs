//! chatstream - streaming chat client library
//!
//! This library provides the core of a terminal chat client that talks to a
//! remote chat service, streams assistant replies as they are generated, and
//! keeps a local history of threads.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `stream`: Line splitting and event decoding for the `data:` wire format
//! - `client`: Completion backends (HTTP and a scripted fake for tests)
//! - `session`: The submission and streaming state machine
//! - `storage`: Thread persistence (SQLite and in-memory)
//! - `model`: Threads, messages and ids
//! - `attachment`: Image attachments
//! - `transcript`: Markdown export, share links and relative timestamps
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatstream::client::HttpBackend;
//! use chatstream::session::{NoopObserver, SessionSettings, Submission};
//! use chatstream::storage::MemoryStore;
//! use chatstream::{ChatSession, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let session = ChatSession::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(HttpBackend::new(&config.server)?),
//!         Arc::new(NoopObserver),
//!         SessionSettings::from(&config),
//!     );
//!     let thread = session.new_chat().await;
//!     let outcome = session.submit(&thread, Submission::text("Hello")).await;
//!     println!("completed: {}", outcome.is_completed());
//!     Ok(())
//! }
//! ```

pub mod attachment;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod model;
pub mod session;
pub mod storage;
pub mod stream;
pub mod transcript;

// Re-export commonly used types
pub use config::Config;
pub use error::{ChatError, Result};
pub use model::{Message, Role, Thread, ThreadId};
pub use session::{ChatSession, SubmitOutcome, Submission};

#[cfg(test)]
pub mod test_utils;
