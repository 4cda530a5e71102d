//! Upstream (CoinGecko) request building

use crate::{
    constants::{COINGECKO_API_KEY_PARAM, COINGECKO_API_URL},
    error::FetchError,
    types::LogicalRequest,
};
use std::collections::BTreeMap;
use url::Url;

/// Location and credentials of the upstream market-data API
#[derive(Debug, Clone)]
pub struct UpstreamApi {
    base_url: Url,
    api_key: Option<String>,
}

impl UpstreamApi {
    /// Creates an upstream description
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://api.coingecko.com/api/v3`
    /// * `api_key` - Optional demo key appended to every request
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FetchError::internal(format!("invalid upstream URL {}: {}", base_url, e)))?;
        Ok(Self {
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Builds the full upstream URL for a request
    pub fn url_for(&self, request: &LogicalRequest) -> Result<Url, FetchError> {
        let mut params = request.query_params();
        if let Some(key) = &self.api_key {
            params.insert(COINGECKO_API_KEY_PARAM.to_string(), key.clone());
        }
        build_url(&self.base_url, &request.upstream_segments(), &params)
    }
}

impl Default for UpstreamApi {
    fn default() -> Self {
        Self {
            base_url: Url::parse(COINGECKO_API_URL).expect("COINGECKO_API_URL is a valid URL"),
            api_key: None,
        }
    }
}

/// Appends path segments and query parameters to a base URL
///
/// Segments are percent-encoded individually and dot segments are refused,
/// so an identifier can never escape its path position.
pub fn build_url(
    base: &Url,
    segments: &[&str],
    params: &BTreeMap<String, String>,
) -> Result<Url, FetchError> {
    if let Some(segment) = segments.iter().find(|s| matches!(**s, "." | "..")) {
        return Err(FetchError::invalid(format!("invalid path segment: {:?}", segment)));
    }

    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FetchError::internal(format!("URL cannot be a base: {}", base)))?
        .pop_if_empty()
        .extend(segments);

    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }

    Ok(url)
}
