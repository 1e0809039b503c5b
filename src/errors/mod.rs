//! Error types for the resilient fetch layer.
//!
//! Every failure a caller can observe is one of four kinds: the transport
//! failed, the attempt ran past its deadline, the circuit breaker rejected the
//! call without dispatching it, or the request could not be built at all.
//! HTTP status codes are not errors here; a non-2xx answer is returned as a
//! normal [`HttpResponse`](crate::transport::HttpResponse).

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Machine-readable classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network, DNS or connection failure from the underlying transport
    Transport,
    /// The attempt did not settle before its deadline
    Timeout,
    /// The circuit breaker rejected the call
    CircuitOpen,
    /// The request could not be built (bad URL, bad header, invalid settings)
    Configuration,
}

/// Root error type for the fetch layer
#[derive(Error, Debug)]
pub enum FetchError {
    /// Failure reported by the transport
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The attempt exceeded its deadline and was cancelled
    #[error("Request to {url} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Target URL of the timed-out attempt
        url: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// The breaker for `circuit_key` is open
    #[error("Circuit breaker open for {circuit_key}; retry at {retry_at}")]
    CircuitOpen {
        /// Breaker key that rejected the call
        circuit_key: String,
        /// Earliest time a probe will be let through
        retry_at: DateTime<Utc>,
    },

    /// Invalid request or client configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl FetchError {
    /// Creates a timeout error
    pub fn timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            url: url.into(),
            timeout,
        }
    }

    /// Creates a circuit-open error
    pub fn circuit_open(circuit_key: impl Into<String>, retry_at: DateTime<Utc>) -> Self {
        Self::CircuitOpen {
            circuit_key: circuit_key.into(),
            retry_at,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Stable error code for logs and metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "FETCH_TRANSPORT",
            Self::Timeout { .. } => "FETCH_TIMEOUT",
            Self::CircuitOpen { .. } => "FETCH_CIRCUIT_OPEN",
            Self::Configuration(_) => "FETCH_CONFIG",
        }
    }

    /// Whether the retry controller may re-attempt after this error.
    ///
    /// Transport failures and timeouts are retryable. A breaker rejection is
    /// never retried internally; the caller decides whether to wait until
    /// [`retry_at`](Self::retry_at).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }

    /// Whether this error counts toward the circuit breaker's failure tally
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }

    /// Whether this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this is a breaker rejection
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// When the rejecting breaker will admit a probe, if this is a breaker rejection
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::CircuitOpen { retry_at, .. } => Some(*retry_at),
            _ => None,
        }
    }
}

/// Errors raised by an [`HttpTransport`](crate::transport::HttpTransport)
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection could not be established or was reset
    #[error("Connection failed: {message}")]
    Connection {
        /// Error message
        message: String,
    },

    /// The underlying HTTP client failed
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The call was cancelled through its cancellation token
    #[error("Request cancelled")]
    Cancelled,

    /// Any other transport-level failure
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Creates a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

/// Configuration and request-building errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// URL could not be parsed
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parser message
        message: String,
    },

    /// Header name or value is not valid HTTP
    #[error("Invalid header '{name}': {message}")]
    InvalidHeader {
        /// Header name
        name: String,
        /// Error message
        message: String,
    },

    /// A setting has an unusable value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Logging could not be initialised
    #[error("Logging initialisation failed: {0}")]
    Logging(String),
}
