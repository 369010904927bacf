//! In-process scripted backend for tests
//!
//! [`ScriptedBackend`] answers each request with the next queued response.
//! A response is either a fixed list of body fragments, a refusal, or a live
//! channel the test feeds while the session is streaming.
//!
//! ```
//! use chatstream::client::ScriptedBackend;
//!
//! let backend = ScriptedBackend::new();
//! backend.push_lines(&[r#"data: {"type":"done","content":"ok"}"#, "data: [DONE]"]);
//! assert_eq!(backend.pending(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tokio::sync::mpsc;

use crate::client::{ByteStream, CompletionBackend, CompletionRequest};
use crate::error::{ChatError, Result};

enum Scripted {
    Body(Vec<Result<Bytes>>),
    Refuse(String),
    Live(mpsc::UnboundedReceiver<Result<Bytes>>),
}

/// Backend that replays queued responses and records every request
#[derive(Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("pending", &self.pending())
            .finish()
    }
}

impl ScriptedBackend {
    /// Creates a backend with nothing queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a body delivered as the given fragments
    pub fn push_fragments<I, B>(&self, fragments: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let body: Vec<Result<Bytes>> = fragments.into_iter().map(|b| Ok(b.into())).collect();
        self.push(Scripted::Body(body));
    }

    /// Queue a body made of whole lines, one fragment per line
    pub fn push_lines(&self, lines: &[&str]) {
        self.push_fragments(lines.iter().map(|line| format!("{}\n", line)));
    }

    /// Queue a body that fails after delivering `fragments`
    pub fn push_broken<I, B>(&self, fragments: I, error: &str)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let mut body: Vec<Result<Bytes>> = fragments.into_iter().map(|b| Ok(b.into())).collect();
        body.push(Err(ChatError::Transport(error.to_string()).into()));
        self.push(Scripted::Body(body));
    }

    /// Queue a refusal, as if the service answered with an error status
    pub fn push_refusal(&self, reason: &str) {
        self.push(Scripted::Refuse(reason.to_string()));
    }

    /// Queue a body fed through the returned sender; dropping it ends the body
    pub fn push_live(&self) -> mpsc::UnboundedSender<Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Scripted::Live(rx));
        tx
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of queued responses not yet used
    pub fn pending(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn push(&self, scripted: Scripted) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(scripted);
        }
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| ChatError::Transport("scripted backend poisoned".into()))?
            .pop_front();

        match next {
            Some(Scripted::Body(body)) => Ok(Box::pin(stream::iter(body))),
            Some(Scripted::Refuse(reason)) => Err(ChatError::Transport(reason).into()),
            Some(Scripted::Live(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
            None => Err(ChatError::Transport("no scripted response queued".into()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SubmitRequest;
    use futures::StreamExt;

    fn request() -> CompletionRequest {
        CompletionRequest::Submit(SubmitRequest {
            chat_id: "t".into(),
            content: "hi".into(),
            image: None,
            history: vec![],
        })
    }

    #[tokio::test]
    async fn test_body_is_replayed_in_order() {
        let backend = ScriptedBackend::new();
        backend.push_fragments(["ab", "cd"]);
        let mut body = backend.open(&request()).await.unwrap();
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from("ab"));
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from("cd"));
        assert!(body.next().await.is_none());
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_refusal_and_empty_queue_fail() {
        let backend = ScriptedBackend::new();
        backend.push_refusal("HTTP 500");
        assert!(backend.open(&request()).await.is_err());
        assert!(backend.open(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_live_body_ends_when_sender_drops() {
        let backend = ScriptedBackend::new();
        let tx = backend.push_live();
        let mut body = backend.open(&request()).await.unwrap();
        tx.send(Ok(Bytes::from("x"))).unwrap();
        drop(tx);
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from("x"));
        assert!(body.next().await.is_none());
    }
}
