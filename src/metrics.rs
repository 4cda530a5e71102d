//! Route health metrics collection and reporting
//!
//! Tracks latency percentiles and success rates for each route the
//! orchestrator uses (`proxy`, `direct`, `relay:<name>`).

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of samples to keep per route
const MAX_SAMPLES: usize = 100;

/// Metrics for a single route
#[derive(Debug, Clone, Serialize)]
pub struct RouteMetrics {
    /// Route label
    pub route: String,
    /// 50th percentile latency of successful calls in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency of successful calls in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    /// Total number of calls tracked
    pub total_requests: u64,
    /// Number of failed calls
    pub failed_requests: u64,
}

impl RouteMetrics {
    /// Creates metrics with no data
    pub fn empty(route: &str) -> Self {
        Self {
            route: route.to_string(),
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct LatencySample {
    duration_ms: f64,
    success: bool,
}

#[derive(Debug, Default)]
struct RouteSamples {
    samples: VecDeque<LatencySample>,
    total_requests: u64,
    failed_requests: u64,
}

impl RouteSamples {
    fn push(&mut self, duration: Duration, success: bool) {
        self.total_requests += 1;
        if !success {
            self.failed_requests += 1;
        }
        if self.samples.len() >= MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(LatencySample {
            duration_ms: duration.as_secs_f64() * 1000.0,
            success,
        });
    }

    fn summarize(&self, route: &str) -> RouteMetrics {
        if self.samples.is_empty() {
            return RouteMetrics::empty(route);
        }

        let mut latencies: Vec<f64> = self
            .samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.duration_ms)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        RouteMetrics {
            route: route.to_string(),
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate: (self.total_requests - self.failed_requests) as f64
                / self.total_requests as f64,
            total_requests: self.total_requests,
            failed_requests: self.failed_requests,
        }
    }
}

/// Collects and computes metrics per route
#[derive(Default)]
pub struct MetricsCollector {
    routes: RwLock<HashMap<String, RouteSamples>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call with its duration and success status
    pub async fn record(&self, route: &str, duration: Duration, success: bool) {
        let mut routes = self.routes.write().await;
        routes
            .entry(route.to_string())
            .or_default()
            .push(duration, success);
    }

    /// Metrics for one route
    pub async fn route(&self, route: &str) -> RouteMetrics {
        let routes = self.routes.read().await;
        routes
            .get(route)
            .map(|samples| samples.summarize(route))
            .unwrap_or_else(|| RouteMetrics::empty(route))
    }

    /// Metrics for every route seen so far, sorted by label
    pub async fn snapshot(&self) -> Vec<RouteMetrics> {
        let routes = self.routes.read().await;
        let mut metrics: Vec<RouteMetrics> = routes
            .iter()
            .map(|(route, samples)| samples.summarize(route))
            .collect();
        metrics.sort_by(|a, b| a.route.cmp(&b.route));
        metrics
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}
