//! Runtime configuration
//!
//! Defaults come from `constants`. The orchestrator can additionally be
//! tuned through environment variables, the proxy through its CLI.

use crate::{
    constants::{
        CHART_MAX_RETRY_ATTEMPTS, CHART_TIMEOUT_MS, CHART_TTL_SECS, COINGECKO_API_URL,
        COIN_TTL_SECS, DEFAULT_ALLOWED_ORIGINS, DEFAULT_BACKEND_URL, MARKETS_TTL_SECS,
        MAX_RETRY_ATTEMPTS, MIN_REQUEST_SPACING_MS, PROBE_INTERVAL_SECS, PROBE_TIMEOUT_MS,
        MAX_CACHE_ENTRIES, RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_MS, REQUEST_TIMEOUT_MS,
    },
    relay::Relay,
    types::RequestKind,
};
use std::time::Duration;

/// Settings of the client-side fetch orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Backend cache proxy root (e.g. `http://localhost:5000/api`); `None` skips the proxy
    pub backend_url: Option<String>,
    pub upstream_base_url: String,
    pub api_key: Option<String>,
    /// Route direct calls through the relay pool from the first attempt
    pub use_relays: bool,
    pub request_timeout: Duration,
    pub chart_timeout: Duration,
    pub probe_timeout: Duration,
    pub probe_interval: Duration,
    /// Retry budget of the direct path.
    ///
    /// With relays configured, a retryable direct failure moves on to the
    /// relay pass instead of retrying direct, so the budget only decides
    /// whether that pass happens: `0` fails after the first direct attempt
    /// and never touches the relays. Without relays it counts direct retries.
    pub max_retries: u32,
    /// Same as `max_retries` for chart requests; the larger of the two wins
    pub chart_max_retries: u32,
    /// Minimum gap between outbound attempt starts within one request kind
    pub min_spacing: Duration,
    pub relays: Vec<Relay>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend_url: Some(DEFAULT_BACKEND_URL.to_string()),
            upstream_base_url: COINGECKO_API_URL.to_string(),
            api_key: None,
            use_relays: false,
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            chart_timeout: Duration::from_millis(CHART_TIMEOUT_MS),
            probe_timeout: Duration::from_millis(PROBE_TIMEOUT_MS),
            probe_interval: Duration::from_secs(PROBE_INTERVAL_SECS),
            max_retries: MAX_RETRY_ATTEMPTS,
            chart_max_retries: CHART_MAX_RETRY_ATTEMPTS,
            min_spacing: Duration::from_millis(MIN_REQUEST_SPACING_MS),
            relays: Relay::defaults(),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by environment variables
    ///
    /// Recognized: `MARKET_RELAY_BACKEND_URL` (empty disables the proxy),
    /// `MARKET_RELAY_USE_RELAYS`, `MARKET_RELAY_MAX_RETRIES`,
    /// `MARKET_RELAY_REQUEST_TIMEOUT_MS`, `MARKET_RELAY_MIN_SPACING_MS`,
    /// `COINGECKO_API_KEY`. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("MARKET_RELAY_BACKEND_URL") {
            config.backend_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(use_relays) = env_parse::<bool>("MARKET_RELAY_USE_RELAYS") {
            config.use_relays = use_relays;
        }
        if let Some(retries) = env_parse::<u32>("MARKET_RELAY_MAX_RETRIES") {
            config.max_retries = retries;
        }
        if let Some(ms) = env_parse::<u64>("MARKET_RELAY_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("MARKET_RELAY_MIN_SPACING_MS") {
            config.min_spacing = Duration::from_millis(ms);
        }
        if let Ok(key) = std::env::var("COINGECKO_API_KEY") {
            config.api_key = Some(key).filter(|k| !k.is_empty());
        }

        config
    }

    pub fn with_backend_url(mut self, url: Option<&str>) -> Self {
        self.backend_url = url.map(str::to_string);
        self
    }

    pub fn with_upstream_base_url(mut self, url: &str) -> Self {
        self.upstream_base_url = url.to_string();
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn with_relays_first(mut self, use_relays: bool) -> Self {
        self.use_relays = use_relays;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = spacing;
        self
    }

    pub fn with_relays(mut self, relays: Vec<Relay>) -> Self {
        self.relays = relays;
        self
    }

    /// Per-call timeout for a request kind
    pub fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Chart => self.chart_timeout,
            _ => self.request_timeout,
        }
    }

    /// Direct-path retry budget for a request kind
    pub fn retries_for(&self, kind: RequestKind) -> u32 {
        match kind {
            RequestKind::Chart => self.chart_max_retries.max(self.max_retries),
            _ => self.max_retries,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

/// Settings of the backend cache proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub upstream_base_url: String,
    pub api_key: Option<String>,
    pub markets_ttl: Duration,
    pub coin_ttl: Duration,
    pub chart_ttl: Duration,
    /// Entries kept per cache before the least recently used is evicted
    pub cache_max_entries: usize,
    pub upstream_timeout: Duration,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    /// Key the rate limit on `X-Forwarded-For`; only behind a reverse proxy
    pub trust_proxy: bool,
    /// Exact origins allowed to call the API
    pub allowed_origins: Vec<String>,
    /// Regular expressions for additional allowed origins
    pub allowed_origin_patterns: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: COINGECKO_API_URL.to_string(),
            api_key: None,
            markets_ttl: Duration::from_secs(MARKETS_TTL_SECS),
            coin_ttl: Duration::from_secs(COIN_TTL_SECS),
            chart_ttl: Duration::from_secs(CHART_TTL_SECS),
            cache_max_entries: MAX_CACHE_ENTRIES,
            upstream_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            rate_limit_window: Duration::from_millis(RATE_LIMIT_WINDOW_MS),
            rate_limit_max_requests: RATE_LIMIT_MAX_REQUESTS,
            trust_proxy: false,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
            allowed_origin_patterns: Vec::new(),
        }
    }
}

impl ProxyConfig {
    pub fn with_ttls(mut self, markets: Duration, coin: Duration, chart: Duration) -> Self {
        self.markets_ttl = markets;
        self.coin_ttl = coin;
        self.chart_ttl = chart;
        self
    }

    pub fn with_rate_limit(mut self, window: Duration, max_requests: u32) -> Self {
        self.rate_limit_window = window;
        self.rate_limit_max_requests = max_requests;
        self
    }

    pub fn with_trusted_proxy(mut self, trusted: bool) -> Self {
        self.trust_proxy = trusted;
        self
    }

    pub fn with_cache_capacity(mut self, max_entries: usize) -> Self {
        self.cache_max_entries = max_entries;
        self
    }

    pub fn with_allowed_origin(mut self, origin: &str) -> Self {
        self.allowed_origins.push(origin.trim_end_matches('/').to_string());
        self
    }

    pub fn with_origin_pattern(mut self, pattern: &str) -> Self {
        self.allowed_origin_patterns.push(pattern.to_string());
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty());
        self
    }
}
