//! market-relay-fetch - resolve market data through the fetch orchestrator.
//!
//! Subcommands:
//! - `markets` - One page of the market listing
//! - `coin` - Detail record of one coin
//! - `chart` - Price history of one coin
//!
//! Routing follows the orchestrator's environment configuration
//! (`MARKET_RELAY_BACKEND_URL`, `MARKET_RELAY_USE_RELAYS`, ...).

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use market_relay::{ChartQuery, FetchOrchestrator, MarketsQuery, OrchestratorConfig};

#[derive(Parser, Debug)]
#[command(name = "market-relay-fetch", author, version, about = "Fetch market data with proxy and relay fallback")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Skip the backend proxy and go straight to the upstream API
    #[arg(long, global = true)]
    direct: bool,

    /// Start on the relay pool instead of calling upstream directly
    #[arg(long, global = true)]
    relays_first: bool,

    /// Print route metrics to stderr after the request
    #[arg(long, global = true)]
    metrics: bool,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value_t = Level::WARN)]
    log_level: Level,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// One page of coins ordered by market cap
    Markets {
        #[arg(long, default_value = "usd")]
        vs_currency: String,
        #[arg(long, default_value_t = 50)]
        per_page: u32,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Detail record of one coin
    Coin { coin_id: String },
    /// Price history of one coin
    Chart {
        coin_id: String,
        #[arg(long, default_value = "usd")]
        vs_currency: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

fn init_logging(log_level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut config = OrchestratorConfig::from_env();
    if cli.direct {
        config = config.with_backend_url(None);
    }
    if cli.relays_first {
        config = config.with_relays_first(true);
    }
    let orchestrator = FetchOrchestrator::new(config)?;

    let data = match cli.command {
        Commands::Markets {
            vs_currency,
            per_page,
            page,
        } => {
            let query = MarketsQuery {
                vs_currency: vs_currency.to_lowercase(),
                per_page,
                page,
                ..MarketsQuery::default()
            };
            orchestrator.get_markets(query).await?
        }
        Commands::Coin { coin_id } => orchestrator.get_coin(&coin_id).await?,
        Commands::Chart {
            coin_id,
            vs_currency,
            days,
        } => {
            orchestrator
                .get_market_chart(&coin_id, ChartQuery::new(&vs_currency, days))
                .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&data)?);

    if cli.metrics {
        for route in orchestrator.route_metrics().await {
            eprintln!(
                "{:<20} total={} failed={} p50={:.0}ms p99={:.0}ms",
                route.route,
                route.total_requests,
                route.failed_requests,
                route.latency_p50_ms,
                route.latency_p99_ms
            );
        }
    }

    Ok(())
}
