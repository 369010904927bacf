//! End-to-end submissions against a mock chat service
//!
//! A `ChatSession` talks to wiremock through the real `HttpBackend`, so
//! these tests cover the request body, headers, status handling and the
//! decoding of a streamed response.

mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatstream::client::HttpBackend;
use chatstream::config::ServerConfig;
use chatstream::error::ChatError;
use chatstream::session::{NoticeLevel, SessionPhase, SubmitOutcome, Submission};
use chatstream::storage::{ChatStore, MemoryStore};

fn backend_for(server: &MockServer, token: Option<&str>) -> Arc<HttpBackend> {
    let config = ServerConfig {
        base_url: format!("{}/api", server.uri()),
        api_token: token.map(str::to_string),
        timeout_seconds: 5,
    };
    Arc::new(HttpBackend::new(&config).unwrap())
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn test_submit_streams_reply_into_new_thread() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .and(header("authorization", "Bearer secret"))
        .and(header("accept", "text/event-stream"))
        .respond_with(event_stream(common::sse_body(&["Hel", "lo!"], "Hello!")))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (session, observer) = common::session_with(store.clone(), backend_for(&server, Some("secret")));

    let temp = session.new_chat().await;
    let outcome = session.submit(&temp, Submission::text("  Hi there  ")).await;

    let SubmitOutcome::Completed { thread_id, message } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert!(!thread_id.is_temporary());
    assert_eq!(message.content, "Hello!");

    let thread = session.thread(&thread_id).await.unwrap();
    assert_eq!(thread.title, "Hi there");
    assert_eq!(thread.messages.len(), 2);
    assert_eq!(thread.messages[0].content, "Hi there");

    let stored = store.list_threads().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].messages.len(), 2);

    let phases = observer.phases(&thread_id);
    assert_eq!(phases.first(), Some(&SessionPhase::Submitting));
    assert_eq!(phases.last(), Some(&SessionPhase::Idle));
    assert_eq!(session.phase(&thread_id).await, SessionPhase::Idle);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["chatId"], json!(thread_id.as_str()));
    assert_eq!(body["content"], "Hi there");
    assert_eq!(body["history"], json!([]));
}

#[tokio::test]
async fn test_follow_up_sends_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .respond_with(event_stream(common::sse_body(&["ok"], "ok")))
        .expect(2)
        .mount(&server)
        .await;

    let (session, _observer) =
        common::session_with(Arc::new(MemoryStore::new()), backend_for(&server, None));

    let temp = session.new_chat().await;
    let first = session.submit(&temp, Submission::text("first")).await;
    let thread_id = first.thread_id().cloned().unwrap();
    assert!(session
        .submit(&thread_id, Submission::text("second"))
        .await
        .is_completed());

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(
        body["history"],
        json!([
            { "role": "user", "content": "first" },
            { "role": "assistant", "content": "ok" }
        ])
    );
}

#[tokio::test]
async fn test_server_error_status_fails_submission() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let (session, observer) =
        common::session_with(Arc::new(MemoryStore::new()), backend_for(&server, None));

    let temp = session.new_chat().await;
    let outcome = session.submit(&temp, Submission::text("hello")).await;

    let SubmitOutcome::Failed { thread_id, error } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(matches!(&error, ChatError::Transport(msg) if msg.contains("500") && msg.contains("overloaded")));

    // The user message stays in the thread and the thread is usable again.
    let thread = session.thread(&thread_id).await.unwrap();
    assert_eq!(thread.messages.len(), 1);
    assert_eq!(session.phase(&thread_id).await, SessionPhase::Idle);
    assert_eq!(observer.notices(NoticeLevel::Error).len(), 1);
}

#[tokio::test]
async fn test_error_event_in_stream_fails_submission() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: {}\n\n",
        json!({ "type": "chunk", "content": "partial" }),
        json!({ "type": "error", "error": "model unavailable" })
    );
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let (session, _observer) =
        common::session_with(Arc::new(MemoryStore::new()), backend_for(&server, None));

    let temp = session.new_chat().await;
    let outcome = session.submit(&temp, Submission::text("hello")).await;
    assert!(matches!(
        outcome,
        SubmitOutcome::Failed { error: ChatError::Server(ref msg), .. } if msg == "model unavailable"
    ));
}

#[tokio::test]
async fn test_edit_regenerates_with_put() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .respond_with(event_stream(common::sse_body(&["Paris"], "Paris")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/messages"))
        .respond_with(event_stream(common::sse_body(&["Ber", "lin"], "Berlin")))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _observer) =
        common::session_with(Arc::new(MemoryStore::new()), backend_for(&server, None));

    let temp = session.new_chat().await;
    let thread_id = session
        .submit(&temp, Submission::text("Capital of France?"))
        .await
        .thread_id()
        .cloned()
        .unwrap();
    let user_id = session.thread(&thread_id).await.unwrap().messages[0].id;

    let outcome = session
        .edit_message(&thread_id, user_id, "Capital of Germany?")
        .await;
    assert!(outcome.is_completed());

    let thread = session.thread(&thread_id).await.unwrap();
    assert_eq!(thread.messages.len(), 2);
    assert_eq!(thread.messages[0].content, "Capital of Germany?");
    assert_eq!(thread.messages[1].content, "Berlin");

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.to_string() == "PUT")
        .unwrap();
    let body: Value = serde_json::from_slice(&put.body).unwrap();
    assert_eq!(body["messageId"], json!(user_id));
    assert_eq!(body["newContent"], "Capital of Germany?");
    assert_eq!(body["history"], json!([]));
}

#[tokio::test]
async fn test_unreachable_server_fails_with_transport_error() {
    let config = ServerConfig {
        base_url: "http://127.0.0.1:9/api".to_string(),
        api_token: None,
        timeout_seconds: 2,
    };
    let backend = Arc::new(HttpBackend::new(&config).unwrap());
    let (session, _observer) = common::session_with(Arc::new(MemoryStore::new()), backend);

    let temp = session.new_chat().await;
    let outcome = session.submit(&temp, Submission::text("anyone?")).await;
    assert!(matches!(
        outcome,
        SubmitOutcome::Failed {
            error: ChatError::Transport(_),
            ..
        }
    ));
}

/// Serve one request with a reply whose body keeps streaming for `pause`
/// after the headers were sent
async fn slow_stream_server(pause: std::time::Duration) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        // Read the head and the JSON body (one object, so it ends in '}').
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if n == 0 || request.ends_with(b"}") {
                break;
            }
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        socket
            .write_all(b"data: {\"type\":\"chunk\",\"content\":\"slow \"}\n\n")
            .await
            .unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(pause).await;
        socket
            .write_all(b"data: {\"type\":\"done\",\"content\":\"slow reply\"}\n\ndata: [DONE]\n\n")
            .await
            .unwrap();
        let _ = socket.shutdown().await;
    });
    format!("http://{}/api", addr)
}

#[tokio::test]
async fn test_reply_streaming_longer_than_timeout_completes() {
    let base_url = slow_stream_server(std::time::Duration::from_millis(1500)).await;
    let config = ServerConfig {
        base_url,
        api_token: None,
        timeout_seconds: 1,
    };
    let backend = Arc::new(HttpBackend::new(&config).unwrap());
    let (session, _observer) = common::session_with(Arc::new(MemoryStore::new()), backend);

    let temp = session.new_chat().await;
    let outcome = session.submit(&temp, Submission::text("take your time")).await;
    let SubmitOutcome::Completed { message, .. } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(message.content, "slow reply");
}

#[tokio::test]
async fn test_slow_response_head_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .respond_with(
            event_stream(common::sse_body(&["late"], "late"))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let config = ServerConfig {
        base_url: format!("{}/api", server.uri()),
        api_token: None,
        timeout_seconds: 1,
    };
    let backend = Arc::new(HttpBackend::new(&config).unwrap());
    let (session, _observer) = common::session_with(Arc::new(MemoryStore::new()), backend);

    let temp = session.new_chat().await;
    let outcome = session.submit(&temp, Submission::text("hello?")).await;
    let SubmitOutcome::Failed { error, .. } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(error.to_string().contains("No response"));
}
