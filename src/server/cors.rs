//! Cross-origin policy
//!
//! The allow-list holds exact origins plus regular expressions (Vercel
//! preview deployments). Requests without an `Origin` header are let through;
//! browsers from any other origin get a 403.

use crate::{config::ProxyConfig, error::FetchError};
use axum::{
    extract::{Request, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use regex::Regex;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::error::ApiError;

/// Origins allowed to call the proxy from a browser
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl OriginPolicy {
    pub fn new(exact: Vec<String>, patterns: Vec<Regex>) -> Self {
        Self { exact, patterns }
    }

    /// Builds the policy from the configured origins and patterns
    pub fn from_config(config: &ProxyConfig) -> Result<Self, FetchError> {
        let patterns = config
            .allowed_origin_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    FetchError::internal(format!("invalid origin pattern {}: {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(config.allowed_origins.clone(), patterns))
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.exact.iter().any(|allowed| allowed == origin)
            || self.patterns.iter().any(|pattern| pattern.is_match(origin))
    }

    fn allows_header(&self, origin: &HeaderValue) -> bool {
        origin.to_str().map(|o| self.allows(o)).unwrap_or(false)
    }
}

/// `tower-http` layer that emits the CORS response headers for allowed origins
pub fn cors_layer(policy: Arc<OriginPolicy>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| policy.allows_header(origin),
        ))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Rejects requests whose `Origin` is not on the allow-list
pub async fn reject_disallowed(
    State(policy): State<Arc<OriginPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        if !policy.allows_header(origin) {
            tracing::warn!(origin = ?origin, "CORS blocked origin");
            return ApiError::new(StatusCode::FORBIDDEN, "Not allowed by CORS").into_response();
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PREVIEW_ORIGIN_PATTERN;

    #[test]
    fn test_default_origins() {
        let policy = OriginPolicy::from_config(&ProxyConfig::default()).unwrap();
        assert!(policy.allows("http://localhost:5173"));
        assert!(policy.allows("http://localhost:3000"));
        assert!(!policy.allows("http://localhost:8080"));
        assert!(!policy.allows("https://crypto-dash.vercel.app"));
    }

    #[test]
    fn test_preview_pattern() {
        let config = ProxyConfig::default()
            .with_allowed_origin("https://dash.example.com/")
            .with_origin_pattern(PREVIEW_ORIGIN_PATTERN);
        let policy = OriginPolicy::from_config(&config).unwrap();

        assert!(policy.allows("https://dash.example.com"));
        assert!(policy.allows("https://crypto-dash-git-main.vercel.app"));
        assert!(!policy.allows("http://crypto-dash.vercel.app"));
        assert!(!policy.allows("https://vercel.app.evil.com"));
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let config = ProxyConfig::default().with_origin_pattern("(unclosed");
        assert!(OriginPolicy::from_config(&config).is_err());
    }
}
