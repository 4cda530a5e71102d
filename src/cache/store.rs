//! In-memory TTL caches backing the proxy endpoints

use crate::{
    cache::CacheKey,
    constants::MAX_CACHE_ENTRIES,
    error::FetchError,
    types::{CacheCounters, CacheReport, RequestKind},
};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Fetch shared by every caller waiting on the same key
type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// A stored upstream response
///
/// Never mutated; a refresh replaces the whole entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// An entry stored at T with TTL S is a miss from T + S onwards
    pub fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

struct CacheInner {
    kind: RequestKind,
    ttl: Duration,
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, SharedFetch>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheInner {
    fn entries(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, SharedFetch>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries();
        let live = entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: CacheKey, value: Value) {
        let entry = CacheEntry {
            key: key.clone(),
            value,
            stored_at: Instant::now(),
            ttl: self.ttl,
        };
        let mut entries = self.entries();
        sweep_expired(&mut entries, entry.stored_at);
        // `push` also hands back the old entry when the key is replaced
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                tracing::debug!(cache = %self.kind, key = %evicted, "Evicted least recently used entry");
            }
        }
    }
}

/// Drops every entry that is no longer live at `now`
fn sweep_expired(entries: &mut LruCache<CacheKey, CacheEntry>, now: Instant) {
    let expired: Vec<CacheKey> = entries
        .iter()
        .filter(|(_, entry)| !entry.is_live(now))
        .map(|(key, _)| key.clone())
        .collect();
    for key in expired {
        entries.pop(&key);
    }
}

/// One named cache with a fixed TTL, hit/miss counters and an in-flight registry
///
/// Concurrent misses for the same key await a single upstream fetch. A
/// successful result is stored once; failures are handed to every waiter and
/// never cached.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

impl ResponseCache {
    /// Creates an empty cache holding up to `MAX_CACHE_ENTRIES` keys
    pub fn new(kind: RequestKind, ttl: Duration) -> Self {
        Self::with_capacity(kind, ttl, MAX_CACHE_ENTRIES)
    }

    /// Creates an empty cache that evicts its least recently used key past `capacity`
    pub fn with_capacity(kind: RequestKind, ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(CacheInner {
                kind,
                ttl,
                entries: Mutex::new(LruCache::new(capacity)),
                in_flight: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.inner.kind
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn capacity(&self) -> usize {
        self.inner.entries().cap().get()
    }

    /// Returns the live value for a key without touching the counters
    pub fn peek(&self, key: &CacheKey) -> Option<Value> {
        self.inner.lookup(key)
    }

    /// Returns the cached value for `key`, or runs `fetch` once and caches its result
    ///
    /// # Arguments
    /// * `key` - Cache key of the logical request
    /// * `fetch` - Produces the upstream call; only invoked when no live entry
    ///   and no in-flight fetch exist for the key
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Value, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        if let Some(value) = self.inner.lookup(&key) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache = %self.inner.kind, key = %key, "Serving from cache");
            return Ok(value);
        }

        let shared = {
            let mut in_flight = self.inner.in_flight();

            // A fetch may have landed between the lookup and taking the lock
            if let Some(value) = self.inner.lookup(&key) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            self.inner.misses.fetch_add(1, Ordering::Relaxed);

            match in_flight.get(&key) {
                Some(pending) => {
                    tracing::debug!(cache = %self.inner.kind, key = %key, "Joining in-flight fetch");
                    pending.clone()
                }
                None => {
                    tracing::info!(cache = %self.inner.kind, key = %key, "Fetching from upstream");
                    let pending = Self::spawn_fetch(self.inner.clone(), key.clone(), fetch());
                    in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };

        shared.await
    }

    fn spawn_fetch<Fut>(inner: Arc<CacheInner>, key: CacheKey, fetch: Fut) -> SharedFetch
    where
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        async move {
            let result = fetch.await;
            if let Ok(value) = &result {
                inner.store(key.clone(), value.clone());
                tracing::debug!(cache = %inner.kind, key = %key, "Cached upstream response");
            }
            inner.in_flight().remove(&key);
            result
        }
        .boxed()
        .shared()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let mut entries = self.inner.entries();
        sweep_expired(&mut entries, Instant::now());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters since process start
    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            keys: self.len(),
            in_flight: self.inner.in_flight().len(),
        }
    }

    pub fn report(&self) -> CacheReport {
        let stats = self.counters();
        CacheReport {
            keys: stats.keys,
            stats,
        }
    }

    /// Drops every entry; counters keep running
    pub fn clear(&self) {
        self.inner.entries().clear();
    }
}

/// The three independent caches fronting the upstream API
#[derive(Clone)]
pub struct ProxyCaches {
    markets: ResponseCache,
    coin: ResponseCache,
    chart: ResponseCache,
}

impl ProxyCaches {
    /// Creates the caches with the given TTLs
    pub fn new(markets_ttl: Duration, coin_ttl: Duration, chart_ttl: Duration) -> Self {
        Self {
            markets: ResponseCache::new(RequestKind::Markets, markets_ttl),
            coin: ResponseCache::new(RequestKind::Coin, coin_ttl),
            chart: ResponseCache::new(RequestKind::Chart, chart_ttl),
        }
    }

    /// Rebuilds the (still empty) caches with a per-cache key limit
    pub fn with_capacity(self, capacity: usize) -> Self {
        let rebuild = |cache: &ResponseCache| {
            ResponseCache::with_capacity(cache.kind(), cache.ttl(), capacity)
        };
        Self {
            markets: rebuild(&self.markets),
            coin: rebuild(&self.coin),
            chart: rebuild(&self.chart),
        }
    }

    /// Cache responsible for a request kind
    pub fn for_kind(&self, kind: RequestKind) -> &ResponseCache {
        match kind {
            RequestKind::Markets => &self.markets,
            RequestKind::Coin => &self.coin,
            RequestKind::Chart => &self.chart,
        }
    }

    /// Diagnostics keyed by cache name
    pub fn report(&self) -> BTreeMap<&'static str, CacheReport> {
        RequestKind::all()
            .iter()
            .map(|kind| (kind.as_str(), self.for_kind(*kind).report()))
            .collect()
    }

    /// Empties all three caches
    pub fn clear_all(&self) {
        for kind in RequestKind::all() {
            self.for_kind(*kind).clear();
        }
        tracing::info!("All caches cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn key(id: &str) -> CacheKey {
        CacheKey::derive(RequestKind::Chart, [("id", id)])
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: Value,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Value, FetchError>> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_returns_same_value_without_fetch() {
        let cache = ResponseCache::new(RequestKind::Chart, Duration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));
        let body = json!({ "prices": [[1700000000000u64, 37000.5]] });

        let first = cache
            .get_or_fetch(key("bitcoin"), counting_fetch(&calls, body.clone()))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        let second = cache
            .get_or_fetch(key("bitcoin"), counting_fetch(&calls, json!("other")))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        let counters = cache.counters();
        assert_eq!((counters.hits, counters.misses), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl() {
        let cache = ResponseCache::new(RequestKind::Markets, Duration::from_secs(120));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch(key("a"), counting_fetch(&calls, json!(1)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        let refreshed = cache
            .get_or_fetch(key("a"), counting_fetch(&calls, json!(2)))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed, json!(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = ResponseCache::new(RequestKind::Coin, Duration::from_secs(600));
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |calls: Arc<AtomicUsize>| {
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(json!({ "id": "bitcoin" }))
                }
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch(key("bitcoin"), slow(calls.clone())),
            cache.get_or_fetch(key("bitcoin"), slow(calls.clone())),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(cache.counters().in_flight, 0);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = ResponseCache::new(RequestKind::Coin, Duration::from_secs(600));

        let err = cache
            .get_or_fetch(key("nope"), || async {
                Err(FetchError::upstream(404, "coin not found"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(cache.is_empty());

        let ok = cache
            .get_or_fetch(key("nope"), || async { Ok(json!({})) })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_least_recently_used_key_is_evicted() {
        let cache = ResponseCache::with_capacity(RequestKind::Markets, Duration::from_secs(120), 2);
        for page in ["1", "2"] {
            cache
                .get_or_fetch(key(page), || async { Ok(json!([])) })
                .await
                .unwrap();
        }

        // Touch page 1 so page 2 becomes the eviction candidate
        assert!(cache.peek(&key("1")).is_some());
        cache
            .get_or_fetch(key("3"), || async { Ok(json!([])) })
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&key("1")).is_some());
        assert!(cache.peek(&key("2")).is_none());
        assert!(cache.peek(&key("3")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_sweeps_expired_entries() {
        let cache = ResponseCache::new(RequestKind::Chart, Duration::from_secs(300));
        for days in ["1", "7", "30"] {
            cache
                .get_or_fetch(key(days), || async { Ok(json!({ "prices": [] })) })
                .await
                .unwrap();
        }
        assert_eq!(cache.inner.entries().len(), 3);

        tokio::time::advance(Duration::from_secs(300)).await;
        cache
            .get_or_fetch(key("90"), || async { Ok(json!({ "prices": [] })) })
            .await
            .unwrap();

        // Stale ranges go without anyone asking for them again
        assert_eq!(cache.inner.entries().len(), 1);
        assert_eq!(cache.capacity(), MAX_CACHE_ENTRIES);
    }

    #[tokio::test]
    async fn test_clear_all_keeps_counters() {
        let caches = ProxyCaches::new(
            Duration::from_secs(120),
            Duration::from_secs(600),
            Duration::from_secs(300),
        );
        let markets = caches.for_kind(RequestKind::Markets);
        markets
            .get_or_fetch(key("x"), || async { Ok(json!([])) })
            .await
            .unwrap();
        markets
            .get_or_fetch(key("x"), || async { Ok(json!([])) })
            .await
            .unwrap();

        caches.clear_all();

        let report = caches.report();
        assert_eq!(report["markets"].keys, 0);
        assert_eq!(report["markets"].stats.hits, 1);
        assert_eq!(report["markets"].stats.misses, 1);
        assert_eq!(report.len(), 3);
    }
}
