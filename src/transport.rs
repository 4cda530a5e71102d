//! HTTP transport abstraction
//!
//! Every network call in the crate (proxy calls, direct upstream calls,
//! relay calls, health probes, the proxy's own upstream fetches) goes through
//! [`HttpTransport`]. This is the only place where raw HTTP failures are
//! classified into [`FetchError`].

use crate::{constants::USER_AGENT, error::FetchError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Trait for fetching JSON documents over HTTP
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues a GET and decodes the body as JSON
    ///
    /// # Arguments
    /// * `url` - Fully built URL, query string included
    /// * `timeout` - Upper bound for the whole call; exceeding it aborts the
    ///   request and yields `FetchError::ServiceUnavailable`
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, FetchError>;

    /// Returns the name of this transport
    fn transport_name(&self) -> &'static str;
}

/// Calls `transport` and drops the call once `timeout` has passed
///
/// Holds the deadline even for transports that ignore the timeout they are given.
pub async fn get_json_within(
    transport: &dyn HttpTransport,
    url: &str,
    timeout: Duration,
) -> Result<Value, FetchError> {
    match tokio::time::timeout(timeout, transport.get_json(url, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::unavailable(format!(
            "request timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Transport backed by a shared `reqwest` client
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a new transport
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wraps an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, FetchError> {
        tracing::trace!(url = %url, timeout_ms = timeout.as_millis() as u64, "GET");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            FetchError::internal(format!(
                "failed to parse response: {}. Response: {}",
                e,
                truncate(&body, 200)
            ))
        })
    }

    fn transport_name(&self) -> &'static str {
        "reqwest"
    }
}

/// Maps a non-2xx response onto the error taxonomy
pub fn classify_status(status: StatusCode, body: &str) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return FetchError::RateLimited;
    }

    let message = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });

    let lowered = body.to_ascii_lowercase();
    if status == StatusCode::FORBIDDEN && (lowered.contains("cors") || lowered.contains("origin")) {
        return FetchError::OriginBlocked(message);
    }

    FetchError::upstream(status.as_u16(), message)
}

/// Extracts the upstream's own error message from a JSON error body
///
/// CoinGecko uses either `{"error": "..."}` or
/// `{"status": {"error_code": 429, "error_message": "..."}}`.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| value.pointer("/status/error_message").and_then(Value::as_str))
        .map(str::to_string)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err, FetchError::RateLimited);
    }

    #[test]
    fn test_classify_uses_upstream_message() {
        let err = classify_status(StatusCode::NOT_FOUND, r#"{"error":"coin not found"}"#);
        assert_eq!(err, FetchError::upstream(404, "coin not found"));

        let err = classify_status(
            StatusCode::UNAUTHORIZED,
            r#"{"status":{"error_code":10002,"error_message":"API key missing"}}"#,
        );
        assert_eq!(err, FetchError::upstream(401, "API key missing"));
    }

    #[test]
    fn test_classify_falls_back_to_reason() {
        let err = classify_status(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(err, FetchError::upstream(502, "Bad Gateway"));
    }

    #[test]
    fn test_classify_origin_block() {
        let err = classify_status(StatusCode::FORBIDDEN, "Origin not allowed (CORS)");
        assert!(matches!(err, FetchError::OriginBlocked(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_holds_for_slow_transport() {
        let mock = mock::MockTransport::new();
        mock.respond_after("http://slow.test/", Duration::from_secs(25), Ok(Value::Null))
            .respond_after("http://quick.test/", Duration::from_secs(1), Ok(Value::Bool(true)));

        let started = tokio::time::Instant::now();
        let err = get_json_within(&mock, "http://slow.test/x", Duration::from_secs(20))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(started.elapsed(), Duration::from_secs(20));

        let ok = get_json_within(&mock, "http://quick.test/x", Duration::from_secs(20)).await;
        assert_eq!(ok, Ok(Value::Bool(true)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
