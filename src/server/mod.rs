//! Backend cache proxy
//!
//! An axum application that fronts the upstream market-data API with three
//! TTL caches (markets, coin detail, chart), a per-IP rate limiter and a
//! CORS allow-list. All routes live under `/api`.

pub mod cors;
pub mod error;
pub mod handlers;
pub mod rate_limit;

use crate::{
    cache::ProxyCaches,
    config::ProxyConfig,
    error::FetchError,
    transport::{get_json_within, HttpTransport},
    types::LogicalRequest,
    upstream::UpstreamApi,
};
use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use cors::OriginPolicy;
pub use error::ApiError;
pub use rate_limit::RateLimiter;

/// Shared state of the proxy handlers
#[derive(Clone)]
pub struct AppState {
    pub caches: ProxyCaches,
    upstream: Arc<UpstreamApi>,
    transport: Arc<dyn HttpTransport>,
    upstream_timeout: Duration,
}

impl AppState {
    pub fn new(config: &ProxyConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, FetchError> {
        let upstream = UpstreamApi::new(&config.upstream_base_url, config.api_key.clone())?;

        Ok(Self {
            caches: ProxyCaches::new(config.markets_ttl, config.coin_ttl, config.chart_ttl)
                .with_capacity(config.cache_max_entries),
            upstream: Arc::new(upstream),
            transport,
            upstream_timeout: config.upstream_timeout,
        })
    }

    /// Answers a request from its cache, fetching upstream on a miss
    pub async fn serve(&self, request: LogicalRequest) -> Result<Value, FetchError> {
        let cache = self.caches.for_kind(request.kind());
        let url = self.upstream.url_for(&request)?;
        let transport = self.transport.clone();
        let timeout = self.upstream_timeout;

        cache
            .get_or_fetch(request.cache_key(), move || async move {
                get_json_within(transport.as_ref(), url.as_str(), timeout).await
            })
            .await
    }
}

/// Builds the proxy application
pub fn router(config: &ProxyConfig, transport: Arc<dyn HttpTransport>) -> Result<Router, FetchError> {
    let state = AppState::new(config, transport)?;
    let origins = Arc::new(OriginPolicy::from_config(config)?);
    let limiter = Arc::new(
        RateLimiter::new(config.rate_limit_window, config.rate_limit_max_requests)
            .with_trusted_proxy(config.trust_proxy),
    );

    // The limiter wraps the api fallback too, so unknown /api paths are counted
    let api = Router::new()
        .route("/markets", get(handlers::markets))
        .route("/coins/:coin_id", get(handlers::coin))
        .route("/coins/:coin_id/market_chart", get(handlers::market_chart))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/clear", delete(handlers::cache_clear))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(limiter, rate_limit::limit_by_ip))
        .with_state(state);

    Ok(Router::new()
        .nest("/api", api)
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            origins.clone(),
            cors::reject_disallowed,
        ))
        .layer(cors::cors_layer(origins))
        .layer(TraceLayer::new_for_http()))
}

/// Serves `app` until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Proxy listening");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
}
