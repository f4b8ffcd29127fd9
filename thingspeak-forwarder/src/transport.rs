//! HTTP delivery of update requests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// Longest response body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 256;

/// Errors raised while sending values.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Refusing to send empty values")]
    EmptyValues,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ThingSpeak responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Invalid response from ThingSpeak: {0}")]
    InvalidResponse(String),
}

/// Delivers an update request body to the remote API.
pub trait UpdateTransport: Send + Sync + 'static {
    /// POST `body` and succeed only on a successful JSON response.
    fn post_update(&self, body: &Value) -> impl Future<Output = Result<(), SendError>> + Send;
}

impl<T: UpdateTransport> UpdateTransport for Arc<T> {
    fn post_update(&self, body: &Value) -> impl Future<Output = Result<(), SendError>> + Send {
        (**self).post_update(body)
    }
}

/// `reqwest`-backed transport posting JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport for `endpoint`, with an optional request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self, SendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl UpdateTransport for HttpTransport {
    async fn post_update(&self, body: &Value) -> Result<(), SendError> {
        let response = self.client.post(&self.endpoint).json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let mut text = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("<unreadable body: {}>", e),
            };
            truncate_at_char_boundary(&mut text, MAX_ERROR_BODY);
            return Err(SendError::Status { status, body: text });
        }

        let bytes = response.bytes().await?;
        let reply: Value = serde_json::from_slice(&bytes)
            .map_err(|e| SendError::InvalidResponse(e.to_string()))?;

        trace!(endpoint = %self.endpoint, %reply, "Update accepted");
        Ok(())
    }
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
