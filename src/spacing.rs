//! Minimum spacing between outbound attempts
//!
//! Keeps the orchestrator from tripping the upstream rate limit by itself.

use crate::types::RequestKind;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Per-kind record of attempt start times
///
/// Only attempts that actually start are recorded. A caller dropped while
/// waiting leaves nothing behind, and waiters that wake together re-check,
/// so concurrent callers are still serialized.
pub struct RequestSpacer {
    spacing: Duration,
    last_start: Mutex<HashMap<RequestKind, Instant>>,
}

impl RequestSpacer {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last_start: Mutex::new(HashMap::new()),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Records a start for `kind` now if the spacing allows it
    ///
    /// Returns the remaining shortfall instead when the previous start of
    /// the same kind is too recent.
    pub fn try_start(&self, kind: RequestKind) -> Option<Duration> {
        let now = Instant::now();
        let mut last_start = self.last_start.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(previous) = last_start.get(&kind) {
            let ready = *previous + self.spacing;
            if ready > now {
                return Some(ready - now);
            }
        }
        last_start.insert(kind, now);
        None
    }

    /// Waits until an attempt of `kind` may start, records it, and returns the time waited
    pub async fn acquire(&self, kind: RequestKind) -> Duration {
        let began = Instant::now();
        while let Some(shortfall) = self.try_start(kind) {
            sleep(shortfall).await;
        }
        began.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_is_immediate() {
        let spacer = RequestSpacer::new(Duration::from_secs(3));
        assert_eq!(spacer.try_start(RequestKind::Chart), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shortfall_is_waited() {
        let spacer = RequestSpacer::new(Duration::from_secs(3));
        spacer.try_start(RequestKind::Chart);
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(
            spacer.try_start(RequestKind::Chart),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            spacer.acquire(RequestKind::Chart).await,
            Duration::from_secs(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_are_serialized() {
        let spacer = RequestSpacer::new(Duration::from_secs(3));
        spacer.try_start(RequestKind::Chart);

        let (a, b) = tokio::join!(
            spacer.acquire(RequestKind::Chart),
            spacer.acquire(RequestKind::Chart),
        );

        let mut waits = [a, b];
        waits.sort();
        assert_eq!(waits, [Duration::from_secs(3), Duration::from_secs(6)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_leaves_no_slot_behind() {
        let spacer = Arc::new(RequestSpacer::new(Duration::from_secs(3)));
        spacer.try_start(RequestKind::Chart);

        let waiting = {
            let spacer = spacer.clone();
            tokio::spawn(async move { spacer.acquire(RequestKind::Chart).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        waiting.abort();

        // Spaced against the last real start, not the abandoned one
        assert_eq!(
            spacer.acquire(RequestKind::Chart).await,
            Duration::from_secs(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_independent() {
        let spacer = RequestSpacer::new(Duration::from_secs(3));
        spacer.try_start(RequestKind::Chart);
        assert_eq!(spacer.try_start(RequestKind::Markets), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_spacing_elapsed() {
        let spacer = RequestSpacer::new(Duration::from_secs(3));
        spacer.try_start(RequestKind::Coin);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(spacer.acquire(RequestKind::Coin).await, Duration::ZERO);
    }
}
