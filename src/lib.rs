//! # Market Relay
//!
//! Resilient access to CoinGecko market data for a price dashboard.
//!
//! Two halves live in this crate:
//!
//! - [`FetchOrchestrator`], the client-side resolver. A logical request goes
//!   to the backend cache proxy while it is believed up, then directly to the
//!   upstream API, then through a pool of public CORS relays, with
//!   exponential backoff, cancellation and a minimum spacing between attempts.
//! - [`server`], the backend cache proxy itself: three TTL caches in front of
//!   the upstream API, a per-IP rate limiter and a CORS allow-list.
//!
//! ## Usage
//!
//! The orchestrator uses a singleton pattern for easy access throughout the application:
//!
//! ```no_run
//! use market_relay::{ChartQuery, FetchOrchestrator, MarketsQuery};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = FetchOrchestrator::global().await?;
//!
//! // Top 50 coins by market cap
//! let markets = orchestrator.get_markets(MarketsQuery::default()).await?;
//!
//! // 30 days of bitcoin prices
//! let chart = orchestrator
//!     .get_market_chart("bitcoin", ChartQuery::new("usd", 30))
//!     .await?;
//! println!("{} coins, {} price points", markets.as_array().map(Vec::len).unwrap_or(0),
//!     chart["prices"].as_array().map(Vec::len).unwrap_or(0));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod relay;
pub mod server;
pub mod spacing;
pub mod transport;
pub mod types;
pub mod upstream;

// Re-export commonly used types
pub use cache::{CacheKey, ProxyCaches, ResponseCache};
pub use config::{OrchestratorConfig, ProxyConfig};
pub use error::FetchError;
pub use metrics::RouteMetrics;
pub use orchestrator::{FetchOrchestrator, FetchState, SlotOutcome};
pub use probe::{Availability, AvailabilityProber};
pub use relay::{Relay, RelayPool};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{ChartQuery, LogicalRequest, MarketsQuery, RequestKind};
