//! Error types for the market relay

use thiserror::Error;

/// Errors produced while resolving a request against the proxy, upstream or a relay
///
/// Cloneable so a single in-flight fetch can hand the same outcome to every waiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream (or a relay) answered with a non-2xx status
    #[error("Upstream error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },

    /// No response at all: connection refused, DNS failure, timeout
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// HTTP 429
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Cross-origin rejection reported by a relay or the browser layer
    #[error("Blocked by origin policy: {0}")]
    OriginBlocked(String),

    /// Request parameters could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Malformed response or local fault
    #[error("Internal error: {0}")]
    Internal(String),

    /// The request was superseded by a newer one for the same slot
    #[error("Request was superseded")]
    Cancelled,
}

impl FetchError {
    /// Creates an Upstream error
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Creates a ServiceUnavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Creates an InvalidRequest error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Creates an Internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status that best represents this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::RateLimited => 429,
            Self::ServiceUnavailable(_) | Self::OriginBlocked(_) => 503,
            Self::InvalidRequest(_) => 400,
            Self::Internal(_) | Self::Cancelled => 500,
        }
    }

    /// Whether the orchestrator may back off and try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServiceUnavailable(_) | Self::OriginBlocked(_)
        )
    }

    /// Whether a relay attempt that failed this way should rotate to the next relay
    pub fn is_relay_failure(&self) -> bool {
        match self {
            Self::Upstream { status, .. } => *status >= 500,
            other => other.is_retryable(),
        }
    }

    /// "Try again later" as opposed to "this will not succeed"
    pub fn is_transient(&self) -> bool {
        self.is_relay_failure()
    }

    /// Whether this is the rate-limit flavour, which uses the longer backoff
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::ServiceUnavailable(format!("request timed out: {}", err))
        } else if err.is_connect() || err.is_request() {
            Self::ServiceUnavailable(err.to_string())
        } else if let Some(status) = err.status() {
            Self::upstream(status.as_u16(), err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("malformed JSON: {}", err))
    }
}
