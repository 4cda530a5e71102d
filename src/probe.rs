//! Backend availability tracking
//!
//! Answers "should the orchestrator even try the backend proxy" without
//! probing on every request.

use crate::transport::{get_json_within, HttpTransport};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Last known state of the backend proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Never checked
    Unknown,
    Available,
    Unavailable,
}

#[derive(Debug)]
struct ProbeState {
    availability: Availability,
    last_checked: Option<Instant>,
}

/// Tracks whether the backend proxy is reachable
///
/// A check older than `interval` (or no check at all) triggers a health
/// probe bounded by `timeout`. A live proxy failure reported through
/// [`AvailabilityProber::mark_unavailable`] overrides the cached answer at once.
pub struct AvailabilityProber {
    health_url: Option<String>,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    interval: Duration,
    state: Mutex<ProbeState>,
}

impl AvailabilityProber {
    /// Creates a prober
    ///
    /// # Arguments
    /// * `health_url` - Health endpoint of the proxy; `None` means there is no proxy
    /// * `transport` - Transport used for the probe
    /// * `timeout` - Upper bound for one probe
    /// * `interval` - How long an answer stays fresh
    pub fn new(
        health_url: Option<String>,
        transport: Arc<dyn HttpTransport>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            health_url,
            transport,
            timeout,
            interval,
            state: Mutex::new(ProbeState {
                availability: Availability::Unknown,
                last_checked: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state without probing
    pub fn availability(&self) -> Availability {
        self.state().availability
    }

    /// Whether the proxy should be tried, probing first when the answer is stale
    pub async fn is_available(&self) -> bool {
        let Some(health_url) = self.health_url.as_deref() else {
            return false;
        };

        if let Some(answer) = self.fresh_answer() {
            return answer;
        }

        let available = match get_json_within(self.transport.as_ref(), health_url, self.timeout).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, url = %health_url, "Backend health probe failed");
                false
            }
        };
        self.record(available);
        available
    }

    /// Forces the unavailable state after a failed live call
    pub fn mark_unavailable(&self) {
        let mut state = self.state();
        if state.availability != Availability::Unavailable {
            tracing::warn!("Backend proxy marked unavailable, using direct API");
        }
        state.availability = Availability::Unavailable;
        state.last_checked = Some(Instant::now());
    }

    fn fresh_answer(&self) -> Option<bool> {
        let state = self.state();
        let checked = state.last_checked?;
        if checked.elapsed() > self.interval {
            return None;
        }
        match state.availability {
            Availability::Unknown => None,
            Availability::Available => Some(true),
            Availability::Unavailable => Some(false),
        }
    }

    fn record(&self, available: bool) {
        let next = if available {
            Availability::Available
        } else {
            Availability::Unavailable
        };

        let mut state = self.state();
        if state.availability != next {
            if available {
                tracing::info!("Backend proxy is available, using it for requests");
            } else {
                tracing::warn!("Backend proxy not available, falling back to direct API calls");
            }
        }
        state.availability = next;
        state.last_checked = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    const HEALTH: &str = "http://backend.test/api/health";

    fn prober(mock: &MockTransport) -> AvailabilityProber {
        AvailabilityProber::new(
            Some(HEALTH.to_string()),
            Arc::new(mock.clone()),
            Duration::from_secs(2),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_result_is_reused_within_interval() {
        let mock = MockTransport::new();
        mock.respond(HEALTH, Ok(json!({ "status": "ok" })));
        let prober = prober(&mock);

        assert_eq!(prober.availability(), Availability::Unknown);
        assert!(prober.is_available().await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(prober.is_available().await);

        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reprobe_after_interval() {
        let mock = MockTransport::new();
        mock.respond_seq(
            HEALTH,
            vec![
                Ok(json!({ "status": "ok" })),
                Err(FetchError::unavailable("connection refused")),
            ],
        );
        let prober = prober(&mock);

        assert!(prober.is_available().await);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!prober.is_available().await);
        assert_eq!(prober.availability(), Availability::Unavailable);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_counts_as_unavailable() {
        let mock = MockTransport::new();
        mock.respond_after(HEALTH, Duration::from_secs(5), Ok(json!({ "status": "ok" })));
        let prober = prober(&mock);

        let started = Instant::now();
        assert!(!prober.is_available().await);
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_unavailable_overrides_fresh_answer() {
        let mock = MockTransport::new();
        mock.respond(HEALTH, Ok(json!({ "status": "ok" })));
        let prober = prober(&mock);

        assert!(prober.is_available().await);
        prober.mark_unavailable();
        assert!(!prober.is_available().await);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_backend_configured() {
        let mock = MockTransport::new();
        let prober = AvailabilityProber::new(
            None,
            Arc::new(mock.clone()),
            Duration::from_secs(2),
            Duration::from_secs(60),
        );
        assert!(!prober.is_available().await);
        assert_eq!(mock.call_count(), 0);
    }
}
