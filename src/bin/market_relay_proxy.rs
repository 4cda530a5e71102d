//! market-relay-proxy - caching proxy in front of the CoinGecko API.
//!
//! Serves `/api/markets`, `/api/coins/:id`, `/api/coins/:id/market_chart`,
//! `/api/cache/stats`, `/api/cache/clear` and `/api/health`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use market_relay::constants::{
    CHART_TTL_SECS, COIN_TTL_SECS, DEFAULT_PROXY_PORT, MARKETS_TTL_SECS, MAX_CACHE_ENTRIES,
    PREVIEW_ORIGIN_PATTERN,
    RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_MS,
};
use market_relay::{server, ProxyConfig, ReqwestTransport};

#[derive(Parser, Debug)]
#[command(name = "market-relay-proxy", author, version, about = "Caching proxy for the CoinGecko API")]
struct Args {
    // --- HTTP Server ---
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PROXY_PORT)]
    port: u16,

    // --- CORS ---
    /// Production frontend origin
    #[arg(long, env = "FRONTEND_URL")]
    frontend_url: Option<String>,

    /// Vercel deployment host; allowed as https://<host>
    #[arg(long, env = "VERCEL_URL")]
    vercel_url: Option<String>,

    /// Allow every https://*.vercel.app origin
    #[arg(long, env = "ALLOW_VERCEL_PREVIEWS", default_value_t = false)]
    allow_vercel_previews: bool,

    // --- Rate limiting ---
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = RATE_LIMIT_WINDOW_MS)]
    rate_limit_window_ms: u64,

    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = RATE_LIMIT_MAX_REQUESTS)]
    rate_limit_max_requests: u32,

    /// Key clients on X-Forwarded-For; set only behind a reverse proxy that rewrites it
    #[arg(long, env = "TRUST_PROXY", default_value_t = false)]
    trust_proxy: bool,

    // --- Caches (seconds) ---
    #[arg(long, env = "CACHE_TTL_MARKETS", default_value_t = MARKETS_TTL_SECS)]
    cache_ttl_markets: u64,

    #[arg(long, env = "CACHE_TTL_COIN", default_value_t = COIN_TTL_SECS)]
    cache_ttl_coin: u64,

    #[arg(long, env = "CACHE_TTL_CHART", default_value_t = CHART_TTL_SECS)]
    cache_ttl_chart: u64,

    /// Entries kept per cache
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = MAX_CACHE_ENTRIES)]
    cache_max_entries: usize,

    /// Demo API key appended to every upstream call
    #[arg(long, env = "COINGECKO_API_KEY", hide_env_values = true)]
    coingecko_api_key: Option<String>,

    // --- Logging ---
    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,

    /// Log format (text|json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,
}

impl Args {
    fn proxy_config(&self) -> ProxyConfig {
        let mut config = ProxyConfig::default()
            .with_ttls(
                Duration::from_secs(self.cache_ttl_markets),
                Duration::from_secs(self.cache_ttl_coin),
                Duration::from_secs(self.cache_ttl_chart),
            )
            .with_rate_limit(
                Duration::from_millis(self.rate_limit_window_ms),
                self.rate_limit_max_requests,
            )
            .with_cache_capacity(self.cache_max_entries)
            .with_trusted_proxy(self.trust_proxy)
            .with_api_key(self.coingecko_api_key.clone());

        if let Some(url) = self.frontend_url.as_deref().filter(|u| !u.is_empty()) {
            config = config.with_allowed_origin(url);
        }
        if let Some(host) = self.vercel_url.as_deref().filter(|h| !h.is_empty()) {
            config = config.with_allowed_origin(&format!("https://{}", host));
        }
        if self.allow_vercel_previews {
            config = config.with_origin_pattern(PREVIEW_ORIGIN_PATTERN);
        }
        config
    }
}

fn init_logging(log_format: &str, log_level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    if log_format.to_lowercase() == "json" {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_format, args.log_level);

    let config = args.proxy_config();
    tracing::info!(
        port = args.port,
        origins = ?config.allowed_origins,
        previews = args.allow_vercel_previews,
        trust_proxy = config.trust_proxy,
        api_key = config.api_key.is_some(),
        "Starting market-relay proxy"
    );

    let transport = Arc::new(ReqwestTransport::new()?);
    let app = server::router(&config, transport)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal, stopping proxy");
                signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Unable to listen for shutdown signal"),
        }
    });

    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], args.port))).await?;
    server::serve(listener, app, shutdown).await?;

    tracing::info!("Proxy stopped");
    Ok(())
}
