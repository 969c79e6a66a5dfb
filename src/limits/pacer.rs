//! Interval pacing with jitter.
//!
//! Every granted slot waits until at least
//! `last_grant + base_interval + Uniform(-jitter, +jitter)`. The mutex is
//! never held across the sleep: the waiter records its grant time, unlocks,
//! sleeps, then re-locks to publish the next grant floor. A cancelled wait
//! does not consume a slot.

use crate::error::{ScanError, ScanResult};
use parking_lot::Mutex;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Jittered interval serializer for one account's outbound calls.
#[derive(Debug)]
pub struct Pacer {
    base_interval: Duration,
    jitter: Duration,
    next_grant: Mutex<Instant>,
}

impl Pacer {
    /// Create a pacer. `jitter` must be smaller than `base_interval`
    /// (enforced by config validation).
    pub fn new(base_interval: Duration, jitter: Duration) -> Self {
        Self {
            base_interval,
            jitter,
            next_grant: Mutex::new(Instant::now()),
        }
    }

    /// Build from millisecond config values.
    pub fn from_millis(base_ms: u64, jitter_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(jitter_ms))
    }

    /// Block until the next slot is granted or `cancel` fires. On
    /// cancellation returns [`ScanError::Cancelled`] without consuming the
    /// slot.
    pub async fn wait_for_slot(&self, cancel: &CancellationToken) -> ScanResult<()> {
        let target = {
            let guard = self.next_grant.lock();
            (*guard).max(Instant::now())
        };

        tokio::select! {
            _ = tokio::time::sleep_until(target) => {}
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        }

        let spacing = self.jittered_interval();
        let mut guard = self.next_grant.lock();
        *guard = (*guard).max(target) + spacing;
        Ok(())
    }

    fn jittered_interval(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as i64;
        if jitter_ms == 0 {
            return self.base_interval;
        }
        let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
        let base_ms = self.base_interval.as_millis() as i64;
        Duration::from_millis((base_ms + offset).max(0) as u64)
    }

    /// The minimum spacing any two grants are guaranteed to respect.
    #[allow(dead_code)] // test inspection
    pub fn min_spacing(&self) -> Duration {
        self.base_interval.saturating_sub(self.jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn grants_respect_minimum_spacing() {
        let pacer = Pacer::from_millis(800, 200);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        pacer.wait_for_slot(&cancel).await.unwrap();
        let first = Instant::now();
        pacer.wait_for_slot(&cancel).await.unwrap();
        let second = Instant::now();

        // First slot is immediate; the second waits at least base - jitter.
        assert!(first - start < Duration::from_millis(50));
        assert!(second - first >= pacer.min_spacing());
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_grants_accumulate_spacing() {
        let pacer = Pacer::from_millis(100, 0);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait_for_slot(&cancel).await.unwrap();
        }
        // Slots at 0, 100, 200, 300ms.
        assert!(Instant::now() - start >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn cancellation_returns_without_granting() {
        let pacer = Pacer::from_millis(60_000, 0);
        let cancel = CancellationToken::new();

        // Consume the immediate slot so the next wait must sleep.
        pacer.wait_for_slot(&cancel).await.unwrap();

        let floor_before = *pacer.next_grant.lock();
        cancel.cancel();
        let err = pacer.wait_for_slot(&cancel).await.unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
        // The grant floor is untouched: no slot was consumed.
        assert_eq!(*pacer.next_grant.lock(), floor_before);
    }
}
