//! Cache key derivation

use crate::types::RequestKind;
use std::collections::BTreeMap;

/// Deterministic lookup key for a cached response
///
/// Built from the request kind and its parameters. Parameters are sorted by
/// name, so the order in which a caller supplied them never changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a request kind and its normalized parameters
    pub fn derive<I, K, V>(kind: RequestKind, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let sorted: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| {
                (
                    k.as_ref().trim().to_ascii_lowercase(),
                    v.as_ref().trim().to_string(),
                )
            })
            .collect();

        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(sorted.iter())
            .finish();

        Self(format!("{}:{}", kind.as_str(), encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
