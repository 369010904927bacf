//! HTTP backend for the chat service's `/messages` endpoint
//!
//! New messages are sent with `POST {base}/messages` and edits with
//! `PUT {base}/messages`. Both answer with a `text/event-stream` body of
//! `data:` lines.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;

use crate::client::{ByteStream, CompletionBackend, CompletionRequest};
use crate::config::ServerConfig;
use crate::error::{ChatError, Result};

/// Backend talking to the chat service over HTTP
///
/// # Examples
///
/// ```no_run
/// use chatstream::client::HttpBackend;
/// use chatstream::config::ServerConfig;
///
/// let backend = HttpBackend::new(&ServerConfig::default()).unwrap();
/// assert_eq!(backend.endpoint(), "http://localhost:3000/api/messages");
/// ```
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpBackend {
    /// Build a backend from the server settings
    ///
    /// `timeout_seconds` bounds connecting and waiting for the response
    /// head. A body that keeps streaming is never cut off.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Config` if the HTTP client cannot be built
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/messages", config.base_url.trim_end_matches('/')),
            api_token: config.api_token.clone(),
            timeout: config.timeout(),
        })
    }

    /// URL that requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream> {
        let builder = match request {
            CompletionRequest::Submit(body) => self.client.post(&self.endpoint).json(body),
            CompletionRequest::Regenerate(body) => self.client.put(&self.endpoint).json(body),
        };
        let builder = builder.header("Accept", "text/event-stream");
        let builder = match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            chat_id = %request.chat_id(),
            "Opening completion stream"
        );

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| {
                tracing::error!("Chat service did not answer within {:?}", self.timeout);
                ChatError::Transport(format!(
                    "No response from {} within {}s",
                    self.endpoint,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                tracing::error!("Chat request failed: {}", e);
                ChatError::Transport(format!("Request to {} failed: {}", self.endpoint, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Chat service returned error {}: {}", status, error_text);
            let detail = if error_text.trim().is_empty() {
                status.to_string()
            } else {
                format!("{}: {}", status, error_text.trim())
            };
            return Err(ChatError::Transport(format!("HTTP {}", detail)).into());
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                anyhow::Error::from(ChatError::Transport(format!("Stream read failed: {}", e)))
            })
        });
        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let config = ServerConfig {
            base_url: "https://chat.example.com/api/".to_string(),
            ..Default::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.endpoint(), "https://chat.example.com/api/messages");
    }
}
