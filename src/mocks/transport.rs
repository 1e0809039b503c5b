//! Scripted transport.

use crate::errors::TransportError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A canned response
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

impl MockResponse {
    /// Empty response with the given status
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Empty 200 response
    pub fn ok() -> Self {
        Self::status(200)
    }

    /// 200 response with a JSON body
    pub fn json(body: impl serde::Serialize) -> Self {
        Self {
            status: 200,
            headers: vec![(CONTENT_TYPE.to_string(), "application/json".to_string())],
            body: Bytes::from(serde_json::to_vec(&body).unwrap_or_default()),
        }
    }

    /// Response with a plain-text body
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![(CONTENT_TYPE.to_string(), "text/plain".to_string())],
            body: Bytes::from(body.into()),
        }
    }

    /// Convert into an [`HttpResponse`]; invalid headers are skipped
    pub fn into_response(self) -> HttpResponse {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        HttpResponse::new(status, headers, self.body)
    }
}

/// What the transport does for one call
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Settle with a response
    Response(MockResponse),
    /// Fail with a connection error carrying this message
    ConnectionError(String),
    /// Never settle on its own; only cancellation ends the call
    Hang,
}

#[derive(Default)]
struct MockState {
    outcomes: VecDeque<MockOutcome>,
    requests: Vec<HttpRequest>,
    tokens: Vec<CancellationToken>,
    default_outcome: Option<MockOutcome>,
}

/// Transport that replays queued outcomes in order and records every request.
///
/// Clones share the queue and the log, so a test can keep one handle while the
/// client owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Transport with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome
    pub fn push(&self, outcome: MockOutcome) -> &Self {
        self.state.lock().outcomes.push_back(outcome);
        self
    }

    /// Queue a response
    pub fn push_response(&self, response: MockResponse) -> &Self {
        self.push(MockOutcome::Response(response))
    }

    /// Queue a connection failure
    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.push(MockOutcome::ConnectionError(message.into()))
    }

    /// Queue a call that hangs until cancelled
    pub fn push_hang(&self) -> &Self {
        self.push(MockOutcome::Hang)
    }

    /// Outcome used once the queue is empty
    pub fn with_default(self, outcome: MockOutcome) -> Self {
        self.state.lock().default_outcome = Some(outcome);
        self
    }

    /// All requests received, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }

    /// Last request received
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.state.lock().requests.last().cloned()
    }

    /// Number of calls made
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of calls whose cancellation token has fired
    pub fn cancelled_count(&self) -> usize {
        self.state
            .lock()
            .tokens
            .iter()
            .filter(|t| t.is_cancelled())
            .count()
    }

    /// Queued outcomes not yet consumed
    pub fn remaining(&self) -> usize {
        self.state.lock().outcomes.len()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("queued", &state.outcomes.len())
            .field("requests", &state.requests.len())
            .finish()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let outcome = {
            let mut state = self.state.lock();
            state.requests.push(request);
            state.tokens.push(cancel.clone());
            match state.outcomes.pop_front() {
                Some(outcome) => Some(outcome),
                None => state.default_outcome.clone(),
            }
        };

        match outcome {
            Some(MockOutcome::Response(response)) => Ok(response.into_response()),
            Some(MockOutcome::ConnectionError(message)) => Err(TransportError::connection(message)),
            Some(MockOutcome::Hang) => {
                cancel.cancelled().await;
                Err(TransportError::Cancelled)
            }
            None => Err(TransportError::Other("no mock outcome queued".to_string())),
        }
    }
}
