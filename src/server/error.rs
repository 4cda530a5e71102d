//! JSON error responses of the proxy

use crate::error::FetchError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// An error rendered as `{ "error": message }` with a matching status
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Upstream { status, message } => Self::new(
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                message,
            ),
            FetchError::ServiceUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "CoinGecko API is unavailable",
            ),
            FetchError::RateLimited => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "CoinGecko rate limit exceeded, please try again later",
            ),
            FetchError::InvalidRequest(message) => Self::new(StatusCode::BAD_REQUEST, message),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (FetchError::upstream(404, "coin not found"), 404),
            (FetchError::unavailable("connection refused"), 503),
            (FetchError::RateLimited, 429),
            (FetchError::invalid("per_page must be a number"), 400),
            (FetchError::internal("malformed JSON"), 500),
            (FetchError::upstream(1000, "nonsense"), 500),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status().as_u16(), status);
        }
    }

    #[test]
    fn test_messages() {
        let err = ApiError::from(FetchError::unavailable("dns failure"));
        assert_eq!(err.message(), "CoinGecko API is unavailable");

        let err = ApiError::from(FetchError::upstream(404, "coin not found"));
        assert_eq!(err.message(), "coin not found");
    }
}
