//! Fallback relay transports
//!
//! Public CORS-bypass relays that forward a GET to the upstream API. Each
//! relay has its own URL convention; [`Relay::wrap`] keeps those quirks in
//! one pure function per variant.

use std::sync::atomic::{AtomicUsize, Ordering};

/// One relay service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relay {
    /// `https://api.allorigins.win/raw?url=<encoded>`
    AllOrigins,
    /// `https://corsproxy.io/?<encoded>`
    CorsProxyIo,
    /// `https://api.codetabs.com/v1/proxy?quest=<encoded>`
    CodeTabs,
    /// Any relay taking the encoded target URL appended to a fixed prefix
    Custom { name: String, prefix: String },
}

impl Relay {
    /// Short identifier used in logs and metrics
    pub fn name(&self) -> &str {
        match self {
            Relay::AllOrigins => "allorigins",
            Relay::CorsProxyIo => "corsproxy",
            Relay::CodeTabs => "codetabs",
            Relay::Custom { name, .. } => name,
        }
    }

    /// Builds the relay URL that fetches `target`
    pub fn wrap(&self, target: &str) -> String {
        let encoded = encode_component(target);
        match self {
            Relay::AllOrigins => format!("https://api.allorigins.win/raw?url={}", encoded),
            Relay::CorsProxyIo => format!("https://corsproxy.io/?{}", encoded),
            Relay::CodeTabs => format!("https://api.codetabs.com/v1/proxy?quest={}", encoded),
            Relay::Custom { prefix, .. } => format!("{}{}", prefix, encoded),
        }
    }

    /// The public relays tried by default, in order
    pub fn defaults() -> Vec<Relay> {
        vec![Relay::AllOrigins, Relay::CorsProxyIo, Relay::CodeTabs]
    }
}

fn encode_component(target: &str) -> String {
    url::form_urlencoded::byte_serialize(target.as_bytes()).collect()
}

/// Ordered relay list with a pointer that survives across requests
///
/// The pointer names the relay to start with. It moves past a relay when
/// that relay fails, so repeated failures walk the whole list instead of
/// hammering one dead relay.
#[derive(Debug)]
pub struct RelayPool {
    relays: Vec<Relay>,
    current: AtomicUsize,
}

impl RelayPool {
    pub fn new(relays: Vec<Relay>) -> Self {
        Self {
            relays,
            current: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Relay> {
        if self.relays.is_empty() {
            None
        } else {
            self.relays.get(index % self.relays.len())
        }
    }

    /// Index of the relay to start with
    pub fn current_index(&self) -> usize {
        match self.relays.len() {
            0 => 0,
            n => self.current.load(Ordering::Relaxed) % n,
        }
    }

    /// Records that the relay at `index` failed; the pointer moves to the next one
    pub fn rotate_past(&self, index: usize) -> usize {
        let n = self.relays.len();
        if n == 0 {
            return 0;
        }
        let next = (index + 1) % n;
        self.current.store(next, Ordering::Relaxed);
        tracing::info!(
            failed = self.relays[index % n].name(),
            next = self.relays[next].name(),
            "Switching to relay {}/{}",
            next + 1,
            n
        );
        next
    }

    /// Remembers the relay that just worked
    pub fn settle_on(&self, index: usize) {
        if !self.relays.is_empty() {
            self.current.store(index % self.relays.len(), Ordering::Relaxed);
        }
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new(Relay::defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&page=1";

    #[test]
    fn test_wrap_formats() {
        assert_eq!(
            Relay::AllOrigins.wrap(TARGET),
            "https://api.allorigins.win/raw?url=https%3A%2F%2Fapi.coingecko.com%2Fapi%2Fv3%2Fcoins%2Fmarkets%3Fvs_currency%3Dusd%26page%3D1"
        );
        assert!(Relay::CorsProxyIo
            .wrap(TARGET)
            .starts_with("https://corsproxy.io/?https%3A%2F%2F"));
        assert!(Relay::CodeTabs
            .wrap(TARGET)
            .starts_with("https://api.codetabs.com/v1/proxy?quest=https%3A%2F%2F"));
    }

    #[test]
    fn test_custom_relay() {
        let relay = Relay::Custom {
            name: "local".to_string(),
            prefix: "http://127.0.0.1:8080/fetch?u=".to_string(),
        };
        assert_eq!(relay.name(), "local");
        assert_eq!(relay.wrap("a b"), "http://127.0.0.1:8080/fetch?u=a+b");
    }

    #[test]
    fn test_rotation_wraps_around() {
        let pool = RelayPool::default();
        assert_eq!(pool.current_index(), 0);
        assert_eq!(pool.rotate_past(0), 1);
        assert_eq!(pool.rotate_past(1), 2);
        assert_eq!(pool.rotate_past(2), 0);
        assert_eq!(pool.current_index(), 0);
    }

    #[test]
    fn test_settle_on_keeps_working_relay() {
        let pool = RelayPool::default();
        pool.settle_on(2);
        assert_eq!(pool.current_index(), 2);
        assert_eq!(pool.get(pool.current_index()), Some(&Relay::CodeTabs));
    }

    #[test]
    fn test_empty_pool() {
        let pool = RelayPool::new(Vec::new());
        assert!(pool.is_empty());
        assert_eq!(pool.current_index(), 0);
        assert_eq!(pool.rotate_past(0), 0);
        assert!(pool.get(0).is_none());
    }
}
