//! Constants for the market relay
//!
//! Every default lives here. Runtime overrides are applied on top of these
//! by `config::OrchestratorConfig::from_env` and the proxy CLI.

/// CoinGecko API base URL
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// Query parameter carrying the CoinGecko demo API key
pub const COINGECKO_API_KEY_PARAM: &str = "x_cg_demo_api_key";

/// Backend cache proxy base URL used by the orchestrator
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000/api";

/// Port the backend cache proxy listens on
pub const DEFAULT_PROXY_PORT: u16 = 5000;

/// Cache TTL for the market listing (in seconds)
pub const MARKETS_TTL_SECS: u64 = 120;

/// Cache TTL for coin details (in seconds)
pub const COIN_TTL_SECS: u64 = 600;

/// Cache TTL for historical charts (in seconds)
pub const CHART_TTL_SECS: u64 = 300;

/// Entries kept per response cache before the least recently used is evicted
pub const MAX_CACHE_ENTRIES: usize = 1_000;

/// Timeout for upstream and proxy calls (in milliseconds)
pub const REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Timeout for chart calls, which carry larger payloads (in milliseconds)
pub const CHART_TIMEOUT_MS: u64 = 20_000;

/// Timeout for the backend health probe (in milliseconds)
pub const PROBE_TIMEOUT_MS: u64 = 2_000;

/// How long a backend availability answer stays fresh (in seconds)
pub const PROBE_INTERVAL_SECS: u64 = 60;

/// Retry budget for the direct path
pub const MAX_RETRY_ATTEMPTS: u32 = 2;

/// Retry budget for chart requests
pub const CHART_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Backoff base after a rate-limit response (in milliseconds)
pub const RATE_LIMIT_BACKOFF_BASE_MS: u64 = 5_000;

/// Backoff cap after a rate-limit response (in milliseconds)
pub const RATE_LIMIT_BACKOFF_CAP_MS: u64 = 30_000;

/// Backoff base after any other retryable failure (in milliseconds)
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Backoff cap after any other retryable failure (in milliseconds)
pub const BACKOFF_CAP_MS: u64 = 5_000;

/// Minimum spacing between outbound attempt starts per request category (in milliseconds)
pub const MIN_REQUEST_SPACING_MS: u64 = 3_000;

/// Proxy rate limit window (in milliseconds)
pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000;

/// Proxy requests allowed per client address per window
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 100;

/// Origins always allowed by the proxy
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://localhost:5174",
];

/// Pattern matching preview deployments
pub const PREVIEW_ORIGIN_PATTERN: &str = r"^https://.*\.vercel\.app$";

/// Service name reported by the health endpoint
pub const SERVICE_NAME: &str = "market-relay proxy";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "market-relay/0.1.0";
