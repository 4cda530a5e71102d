//! Fetch orchestrator
//!
//! Resolves a [`LogicalRequest`] through the first route that works:
//!
//! ```text
//! Idle
//!   ├─ proxy believed up ──► AwaitingProxy ──fail──► mark proxy down ─┐
//!   └─ proxy down ─────────────────────────────────────────────────────┤
//!                                                                      ▼
//!                         AwaitingDirect (or AwaitingFallback(0) when relays come first)
//!                               │ rate-limited / unreachable, budget left
//!                               ▼
//!                         Backoff(n) ──► AwaitingFallback(0) ──fail──► Backoff(n+1)
//!                                              ──► AwaitingFallback(1) ... one pass over the pool
//!                                                                      ▼
//!                                                              Done / Cancelled
//! ```
//!
//! Every network call and every wait is a suspension point that observes the
//! request's cancellation token.

use crate::{
    config::OrchestratorConfig,
    constants::{
        BACKOFF_BASE_MS, BACKOFF_CAP_MS, RATE_LIMIT_BACKOFF_BASE_MS, RATE_LIMIT_BACKOFF_CAP_MS,
    },
    error::FetchError,
    metrics::{MetricsCollector, RouteMetrics},
    probe::{Availability, AvailabilityProber},
    relay::RelayPool,
    spacing::RequestSpacer,
    transport::{get_json_within, HttpTransport, ReqwestTransport},
    types::{ChartQuery, LogicalRequest, MarketsQuery},
    upstream::{build_url, UpstreamApi},
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

static GLOBAL_ORCHESTRATOR: OnceCell<Arc<FetchOrchestrator>> = OnceCell::const_new();

/// Where a single logical request currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    AwaitingProxy,
    AwaitingDirect,
    /// Trying the n-th relay of this request's pass over the pool
    AwaitingFallback(usize),
    /// Waiting before retry n + 1
    Backoff(u32),
    Done,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum Route {
    Direct,
    Relay(usize),
}

/// Result delivered to a slot's subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct SlotOutcome {
    /// Sequence number of the request within its slot
    pub generation: u64,
    pub result: Result<Value, FetchError>,
}

struct SlotState {
    generation: u64,
    cancel: CancellationToken,
    tx: watch::Sender<Option<SlotOutcome>>,
}

impl SlotState {
    fn new() -> Self {
        Self {
            generation: 0,
            cancel: CancellationToken::new(),
            tx: watch::channel(None).0,
        }
    }
}

/// Tracks the newest request per consumer slot (e.g. one chart widget)
#[derive(Default)]
struct SlotRegistry {
    slots: Mutex<HashMap<String, SlotState>>,
}

impl SlotRegistry {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, SlotState>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts a new request in `slot`, cancelling whatever ran there before
    fn begin(&self, slot: &str) -> (u64, CancellationToken) {
        let mut slots = self.slots();
        let state = slots
            .entry(slot.to_string())
            .or_insert_with(SlotState::new);
        state.cancel.cancel();
        state.generation += 1;
        state.cancel = CancellationToken::new();
        (state.generation, state.cancel.clone())
    }

    /// Publishes the outcome if `generation` is still the newest request of the slot
    fn finish(
        &self,
        slot: &str,
        generation: u64,
        result: Result<Value, FetchError>,
    ) -> Result<Value, FetchError> {
        let slots = self.slots();
        match slots.get(slot) {
            Some(state) if state.generation == generation => {
                state.tx.send_replace(Some(SlotOutcome {
                    generation,
                    result: result.clone(),
                }));
                result
            }
            _ => {
                tracing::debug!(slot, generation, "Discarding outcome of superseded request");
                Err(FetchError::Cancelled)
            }
        }
    }

    fn subscribe(&self, slot: &str) -> watch::Receiver<Option<SlotOutcome>> {
        self.slots()
            .entry(slot.to_string())
            .or_insert_with(SlotState::new)
            .tx
            .subscribe()
    }

    fn cancel(&self, slot: &str) {
        if let Some(state) = self.slots().get_mut(slot) {
            state.cancel.cancel();
            state.generation += 1;
        }
    }
}

/// Client-side request resolver with proxy, direct and relay routes
///
/// Owns all process-wide routing state: backend availability, the relay
/// pointer, per-kind spacing and the slot registry. Construct one per
/// process (or use [`FetchOrchestrator::global`]); tests inject a fake
/// transport through [`FetchOrchestrator::with_transport`].
///
/// # Example
/// ```no_run
/// use market_relay::{FetchOrchestrator, MarketsQuery};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = FetchOrchestrator::global().await?;
/// let markets = orchestrator.get_markets(MarketsQuery::default()).await?;
/// println!("{} coins", markets.as_array().map(Vec::len).unwrap_or(0));
/// # Ok(())
/// # }
/// ```
pub struct FetchOrchestrator {
    config: OrchestratorConfig,
    transport: Arc<dyn HttpTransport>,
    upstream: UpstreamApi,
    backend: Option<Url>,
    prober: AvailabilityProber,
    relays: RelayPool,
    spacer: RequestSpacer,
    slots: SlotRegistry,
    metrics: MetricsCollector,
}

impl FetchOrchestrator {
    /// Returns the process-wide instance, configured from the environment
    pub async fn global() -> Result<Arc<Self>, FetchError> {
        GLOBAL_ORCHESTRATOR
            .get_or_try_init(|| async {
                Self::new(OrchestratorConfig::from_env()).map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Creates an orchestrator that talks HTTP through `reqwest`
    pub fn new(config: OrchestratorConfig) -> Result<Self, FetchError> {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()?))
    }

    /// Creates an orchestrator with a custom transport
    ///
    /// This is primarily for testing with mock transports.
    pub fn with_transport(
        config: OrchestratorConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, FetchError> {
        let upstream = UpstreamApi::new(&config.upstream_base_url, config.api_key.clone())?;

        let backend = config
            .backend_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| FetchError::internal(format!("invalid backend URL {}: {}", raw, e)))
            })
            .transpose()?;

        let health_url = backend
            .as_ref()
            .map(|base| build_url(base, &["health"], &BTreeMap::new()))
            .transpose()?
            .map(String::from);

        let prober = AvailabilityProber::new(
            health_url,
            transport.clone(),
            config.probe_timeout,
            config.probe_interval,
        );

        Ok(Self {
            relays: RelayPool::new(config.relays.clone()),
            spacer: RequestSpacer::new(config.min_spacing),
            slots: SlotRegistry::default(),
            metrics: MetricsCollector::new(),
            upstream,
            backend,
            prober,
            transport,
            config,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Fetches the market listing
    pub async fn get_markets(&self, query: MarketsQuery) -> Result<Value, FetchError> {
        self.fetch(LogicalRequest::markets(query)).await
    }

    /// Fetches the detail record of one coin
    pub async fn get_coin(&self, coin_id: &str) -> Result<Value, FetchError> {
        self.fetch(LogicalRequest::coin(coin_id)?).await
    }

    /// Fetches the price history of one coin
    pub async fn get_market_chart(
        &self,
        coin_id: &str,
        query: ChartQuery,
    ) -> Result<Value, FetchError> {
        self.fetch(LogicalRequest::chart(coin_id, query)?).await
    }

    /// Resolves a request that nothing else can supersede
    pub async fn fetch(&self, request: LogicalRequest) -> Result<Value, FetchError> {
        self.fetch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Resolves a request that stops at its next suspension point once `cancel` fires
    pub async fn fetch_with_cancel(
        &self,
        request: LogicalRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("fetch", %request_id, kind = %request.kind());
        self.resolve(&request, cancel).instrument(span).await
    }

    /// Resolves a request on behalf of a consumer slot
    ///
    /// Starting a request in a slot cancels the previous one there. Only the
    /// newest request's outcome is returned as data and published to
    /// subscribers; a superseded request yields `FetchError::Cancelled`.
    pub async fn fetch_in_slot(
        &self,
        slot: &str,
        request: LogicalRequest,
    ) -> Result<Value, FetchError> {
        let (generation, cancel) = self.slots.begin(slot);
        let result = self.fetch_with_cancel(request, &cancel).await;
        self.slots.finish(slot, generation, result)
    }

    /// Watches the outcomes published for a slot
    pub fn subscribe(&self, slot: &str) -> watch::Receiver<Option<SlotOutcome>> {
        self.slots.subscribe(slot)
    }

    /// Cancels whatever request is running in a slot
    pub fn cancel_slot(&self, slot: &str) {
        self.slots.cancel(slot);
    }

    /// Last known backend proxy state
    pub fn backend_availability(&self) -> Availability {
        self.prober.availability()
    }

    /// Index of the relay the next relay pass starts with
    pub fn relay_pointer(&self) -> usize {
        self.relays.current_index()
    }

    /// Latency and success metrics per route
    pub async fn route_metrics(&self) -> Vec<RouteMetrics> {
        self.metrics.snapshot().await
    }

    async fn resolve(
        &self,
        request: &LogicalRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        let max_retries = self.config.retries_for(request.kind());
        let pool_len = self.relays.len();

        let mut state = FetchState::Idle;
        let mut outcome: Option<Result<Value, FetchError>> = None;
        let mut retries: u32 = 0;
        let mut relay_start: usize = 0;
        let mut delay = Duration::ZERO;
        let mut resume = FetchState::AwaitingDirect;

        loop {
            if cancel.is_cancelled() && state != FetchState::Done {
                state = FetchState::Cancelled;
            }
            tracing::trace!(?state, "Fetch state");

            state = match state {
                FetchState::Idle => match cancellable(cancel, self.prober.is_available()).await {
                    Ok(true) => FetchState::AwaitingProxy,
                    Ok(false) => self.first_direct_state(),
                    Err(_) => FetchState::Cancelled,
                },

                FetchState::AwaitingProxy => match self.call_proxy(request, cancel).await {
                    Ok(value) => {
                        outcome = Some(Ok(value));
                        FetchState::Done
                    }
                    Err(FetchError::Cancelled) => FetchState::Cancelled,
                    Err(e) => {
                        tracing::warn!(error = %e, "Backend request failed, falling back to direct API");
                        self.prober.mark_unavailable();
                        self.first_direct_state()
                    }
                },

                FetchState::AwaitingDirect => match self.attempt(request, Route::Direct, cancel).await
                {
                    Ok(value) => {
                        outcome = Some(Ok(value));
                        FetchState::Done
                    }
                    Err(FetchError::Cancelled) => FetchState::Cancelled,
                    Err(e) if !e.is_retryable() || retries >= max_retries => {
                        outcome = Some(Err(e));
                        FetchState::Done
                    }
                    Err(e) => {
                        delay = backoff_delay(&e, retries);
                        resume = if pool_len > 0 {
                            tracing::info!(error = %e, "Direct call failed, trying relays");
                            FetchState::AwaitingFallback(0)
                        } else {
                            FetchState::AwaitingDirect
                        };
                        FetchState::Backoff(retries)
                    }
                },

                FetchState::AwaitingFallback(offset) => {
                    if offset == 0 {
                        relay_start = self.relays.current_index();
                    }
                    let index = (relay_start + offset) % pool_len;

                    match self.attempt(request, Route::Relay(index), cancel).await {
                        Ok(value) => {
                            self.relays.settle_on(index);
                            outcome = Some(Ok(value));
                            FetchState::Done
                        }
                        Err(FetchError::Cancelled) => FetchState::Cancelled,
                        Err(e) if !e.is_relay_failure() => {
                            outcome = Some(Err(e));
                            FetchState::Done
                        }
                        Err(e) => {
                            self.relays.rotate_past(index);
                            if offset + 1 >= pool_len {
                                tracing::warn!(relays = pool_len, "All relays failed");
                                outcome = Some(Err(e));
                                FetchState::Done
                            } else {
                                delay = backoff_delay(&e, retries);
                                resume = FetchState::AwaitingFallback(offset + 1);
                                FetchState::Backoff(retries)
                            }
                        }
                    }
                }

                FetchState::Backoff(n) => {
                    tracing::info!(
                        delay_ms = delay.as_millis() as u64,
                        retry = n + 1,
                        "Waiting before retry"
                    );
                    match cancellable(cancel, sleep(delay)).await {
                        Ok(()) => {
                            retries += 1;
                            resume
                        }
                        Err(_) => FetchState::Cancelled,
                    }
                }

                FetchState::Done => {
                    return outcome
                        .unwrap_or_else(|| Err(FetchError::internal("fetch finished without outcome")));
                }

                FetchState::Cancelled => {
                    tracing::debug!("Request cancelled");
                    return Err(FetchError::Cancelled);
                }
            };
        }
    }

    fn first_direct_state(&self) -> FetchState {
        if self.config.use_relays && !self.relays.is_empty() {
            FetchState::AwaitingFallback(0)
        } else {
            FetchState::AwaitingDirect
        }
    }

    async fn call_proxy(
        &self,
        request: &LogicalRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| FetchError::internal("no backend configured"))?;
        let url = build_url(backend, &request.proxy_segments(), &request.query_params())?;
        let timeout = self.config.timeout_for(request.kind());

        self.timed_call("proxy", url.as_str(), timeout, cancel).await
    }

    /// One upstream-bound attempt, spaced against earlier attempts of the same kind
    async fn attempt(
        &self,
        request: &LogicalRequest,
        route: Route,
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        let target = self.upstream.url_for(request)?;
        let (label, url) = match route {
            Route::Direct => ("direct".to_string(), target.to_string()),
            Route::Relay(index) => {
                let relay = self
                    .relays
                    .get(index)
                    .ok_or_else(|| FetchError::internal("relay pool is empty"))?;
                (format!("relay:{}", relay.name()), relay.wrap(target.as_str()))
            }
        };

        // Nothing is recorded unless the wait completes, so a cancelled
        // request never pushes back the next one
        let waited = cancellable(cancel, self.spacer.acquire(request.kind())).await?;
        if !waited.is_zero() {
            tracing::debug!(wait_ms = waited.as_millis() as u64, "Spaced outbound attempt");
        }

        let timeout = self.config.timeout_for(request.kind());
        self.timed_call(&label, &url, timeout, cancel).await
    }

    async fn timed_call(
        &self,
        route: &str,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        let started = Instant::now();
        let call = get_json_within(self.transport.as_ref(), url, timeout);
        let result = cancellable(cancel, call).await?;
        self.metrics
            .record(route, started.elapsed(), result.is_ok())
            .await;

        match &result {
            Ok(_) => tracing::debug!(route, "Request succeeded"),
            Err(e) => tracing::warn!(route, error = %e, "Request failed"),
        }
        result
    }
}

/// Exponential backoff: `base * 2^attempt`, capped
///
/// Rate limits use a 5s base capped at 30s, everything else 1s capped at 5s.
pub fn backoff_delay(error: &FetchError, attempt: u32) -> Duration {
    let (base, cap) = if error.is_rate_limited() {
        (RATE_LIMIT_BACKOFF_BASE_MS, RATE_LIMIT_BACKOFF_CAP_MS)
    } else {
        (BACKOFF_BASE_MS, BACKOFF_CAP_MS)
    };
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base.saturating_mul(factor).min(cap))
}

async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, FetchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        output = fut => Ok(output),
    }
}
