//! Types for the market relay

use crate::cache::CacheKey;
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Category of a logical request; also names the proxy cache that serves it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Paged market listing
    Markets,
    /// Detailed record for one coin
    Coin,
    /// Historical price chart for one coin
    Chart,
}

impl RequestKind {
    /// Short name used in cache keys, diagnostics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Markets => "markets",
            RequestKind::Coin => "coin",
            RequestKind::Chart => "chart",
        }
    }

    /// Get all request kinds
    pub fn all() -> &'static [RequestKind] {
        &[RequestKind::Markets, RequestKind::Coin, RequestKind::Chart]
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized parameters of a market listing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketsQuery {
    pub vs_currency: String,
    pub order: String,
    pub per_page: u32,
    pub page: u32,
    pub sparkline: bool,
}

impl Default for MarketsQuery {
    fn default() -> Self {
        Self {
            vs_currency: "usd".to_string(),
            order: "market_cap_desc".to_string(),
            per_page: 50,
            page: 1,
            sparkline: false,
        }
    }
}

impl MarketsQuery {
    /// Builds a query from raw request parameters, filling in defaults
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, FetchError> {
        let defaults = Self::default();
        Ok(Self {
            vs_currency: param(params, "vs_currency")
                .map(normalize_token)
                .unwrap_or(defaults.vs_currency),
            order: param(params, "order")
                .map(normalize_token)
                .unwrap_or(defaults.order),
            per_page: parse_param(params, "per_page")?.unwrap_or(defaults.per_page),
            page: parse_param(params, "page")?.unwrap_or(defaults.page),
            sparkline: parse_param(params, "sparkline")?.unwrap_or(defaults.sparkline),
        })
    }

    /// Query string parameters in canonical order
    pub fn params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("vs_currency".to_string(), self.vs_currency.clone()),
            ("order".to_string(), self.order.clone()),
            ("per_page".to_string(), self.per_page.to_string()),
            ("page".to_string(), self.page.to_string()),
            ("sparkline".to_string(), self.sparkline.to_string()),
        ])
    }
}

/// Normalized parameters of a chart request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartQuery {
    pub vs_currency: String,
    /// Number of days of history, or `max`
    pub days: String,
}

impl Default for ChartQuery {
    fn default() -> Self {
        Self {
            vs_currency: "usd".to_string(),
            days: "7".to_string(),
        }
    }
}

impl ChartQuery {
    /// Creates a chart query for the given currency and day range
    pub fn new(vs_currency: &str, days: u32) -> Self {
        Self {
            vs_currency: normalize_token(vs_currency),
            days: days.to_string(),
        }
    }

    /// Builds a query from raw request parameters, filling in defaults
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, FetchError> {
        let defaults = Self::default();
        let days = match param(params, "days").map(normalize_token) {
            None => defaults.days,
            Some(days) if days == "max" => days,
            Some(days) => days
                .parse::<u32>()
                .map_err(|_| FetchError::invalid(format!("invalid days value: {}", days)))?
                .to_string(),
        };

        Ok(Self {
            vs_currency: param(params, "vs_currency")
                .map(normalize_token)
                .unwrap_or(defaults.vs_currency),
            days,
        })
    }

    /// Query string parameters in canonical order
    pub fn params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("vs_currency".to_string(), self.vs_currency.clone()),
            ("days".to_string(), self.days.clone()),
        ])
    }
}

/// One semantic data need, independent of the route that ends up serving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalRequest {
    Markets(MarketsQuery),
    Coin { coin_id: String },
    Chart { coin_id: String, query: ChartQuery },
}

impl LogicalRequest {
    /// Market listing request
    pub fn markets(query: MarketsQuery) -> Self {
        Self::Markets(query)
    }

    /// Coin detail request; the identifier is validated and lower-cased
    pub fn coin(coin_id: &str) -> Result<Self, FetchError> {
        Ok(Self::Coin {
            coin_id: validate_coin_id(coin_id)?,
        })
    }

    /// Chart request; the identifier is validated and lower-cased
    pub fn chart(coin_id: &str, query: ChartQuery) -> Result<Self, FetchError> {
        Ok(Self::Chart {
            coin_id: validate_coin_id(coin_id)?,
            query,
        })
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Markets(_) => RequestKind::Markets,
            Self::Coin { .. } => RequestKind::Coin,
            Self::Chart { .. } => RequestKind::Chart,
        }
    }

    pub fn coin_id(&self) -> Option<&str> {
        match self {
            Self::Markets(_) => None,
            Self::Coin { coin_id } | Self::Chart { coin_id, .. } => Some(coin_id),
        }
    }

    /// Path segments below the upstream API root
    pub fn upstream_segments(&self) -> Vec<&str> {
        match self {
            Self::Markets(_) => vec!["coins", "markets"],
            Self::Coin { coin_id } => vec!["coins", coin_id],
            Self::Chart { coin_id, .. } => vec!["coins", coin_id, "market_chart"],
        }
    }

    /// Path segments below the backend proxy root
    pub fn proxy_segments(&self) -> Vec<&str> {
        match self {
            Self::Markets(_) => vec!["markets"],
            other => other.upstream_segments(),
        }
    }

    /// Query string parameters in canonical order
    pub fn query_params(&self) -> BTreeMap<String, String> {
        match self {
            Self::Markets(query) => query.params(),
            Self::Coin { .. } => BTreeMap::new(),
            Self::Chart { query, .. } => query.params(),
        }
    }

    /// Deterministic cache key for this request
    pub fn cache_key(&self) -> CacheKey {
        let mut params = self.query_params();
        if let Some(coin_id) = self.coin_id() {
            params.insert("id".to_string(), coin_id.to_string());
        }
        CacheKey::derive(self.kind(), params)
    }
}

impl std::fmt::Display for LogicalRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markets(query) => write!(
                f,
                "markets {} page {} ({} per page)",
                query.vs_currency, query.page, query.per_page
            ),
            Self::Coin { coin_id } => write!(f, "coin {}", coin_id),
            Self::Chart { coin_id, query } => {
                write!(f, "chart {} {}d in {}", coin_id, query.days, query.vs_currency)
            }
        }
    }
}

/// Body of the proxy health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
}

impl HealthResponse {
    pub fn ok(service: &str) -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            service: service.to_string(),
        }
    }
}

/// Counters for one named cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
    pub in_flight: usize,
}

/// Diagnostics for one named cache, as served by `/cache/stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheReport {
    pub keys: usize,
    pub stats: CacheCounters,
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_param<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, FetchError> {
    param(params, name)
        .map(|raw| {
            raw.to_ascii_lowercase()
                .parse::<T>()
                .map_err(|_| FetchError::invalid(format!("invalid {} value: {}", name, raw)))
        })
        .transpose()
}

fn normalize_token(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn validate_coin_id(coin_id: &str) -> Result<String, FetchError> {
    let id = normalize_token(coin_id);
    // A leading dot would let "." and ".." collapse as URL dot segments
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(id)
    } else {
        Err(FetchError::invalid(format!("invalid coin id: {:?}", coin_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_markets_defaults() {
        let query = MarketsQuery::from_params(&HashMap::new()).unwrap();
        assert_eq!(query, MarketsQuery::default());
        assert_eq!(query.params()["order"], "market_cap_desc");
    }

    #[test]
    fn test_markets_rejects_bad_numbers() {
        let err = MarketsQuery::from_params(&params(&[("page", "two")])).unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }

    #[test]
    fn test_markets_normalizes_currency() {
        let query = MarketsQuery::from_params(&params(&[("vs_currency", " USD ")])).unwrap();
        assert_eq!(query.vs_currency, "usd");
    }

    #[test]
    fn test_chart_days() {
        let query = ChartQuery::from_params(&params(&[("days", "MAX")])).unwrap();
        assert_eq!(query.days, "max");

        let query = ChartQuery::from_params(&params(&[("days", "030")])).unwrap();
        assert_eq!(query.days, "30");

        assert!(ChartQuery::from_params(&params(&[("days", "week")])).is_err());
    }

    #[test]
    fn test_coin_id_validation() {
        assert!(LogicalRequest::coin("Bitcoin").is_ok());
        assert!(LogicalRequest::coin("usd-coin").is_ok());
        assert!(LogicalRequest::coin("../admin").is_err());
        assert!(LogicalRequest::coin("").is_err());
        assert!(LogicalRequest::coin("wrapped.eth").is_ok());

        for id in [".", "..", "...", ".hidden", " .. "] {
            assert!(LogicalRequest::coin(id).is_err(), "{id:?} accepted");
            assert!(
                LogicalRequest::chart(id, ChartQuery::default()).is_err(),
                "{id:?} accepted"
            );
        }
    }

    #[test]
    fn test_segments() {
        let chart = LogicalRequest::chart("bitcoin", ChartQuery::default()).unwrap();
        assert_eq!(
            chart.upstream_segments(),
            vec!["coins", "bitcoin", "market_chart"]
        );
        let markets = LogicalRequest::markets(MarketsQuery::default());
        assert_eq!(markets.upstream_segments(), vec!["coins", "markets"]);
        assert_eq!(markets.proxy_segments(), vec!["markets"]);
    }
}
