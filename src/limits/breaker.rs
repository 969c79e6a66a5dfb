//! Circuit breaker around remote dependencies.
//!
//! Three states per named dependency. Closed counts outcomes over a rolling
//! window; once at least [`TRIP_MIN_REQUESTS`] requests have been seen with a
//! failure ratio of [`TRIP_FAILURE_RATIO`] or worse, the breaker opens. Open
//! fails fast with [`ScanError::CircuitOpen`] until [`OPEN_TIMEOUT`] elapses,
//! then admits a single half-open probe; the probe's outcome closes or
//! re-opens the circuit. State transitions are logged.
//!
//! The breaker is advisory: callers translate `CircuitOpen` into "skip this
//! scanner for now", never into a user-visible failure.

use crate::error::{ScanError, ScanResult};
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Requests required before the trip predicate applies.
const TRIP_MIN_REQUESTS: u32 = 10;
/// Failure ratio at or above which the breaker trips.
const TRIP_FAILURE_RATIO: f64 = 0.6;
/// How long an open circuit waits before admitting a probe.
const OPEN_TIMEOUT: Duration = Duration::from_secs(60);
/// Probes admitted while half-open.
const HALF_OPEN_MAX_REQUESTS: u32 = 1;
/// Closed-state counting window; counts reset when it elapses.
const COUNT_WINDOW: Duration = Duration::from_secs(60);

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    requests: u32,
    failures: u32,
    window_start: Instant,
    opened_at: Instant,
    half_open_in_flight: u32,
}

/// A circuit breaker guarding one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for a dependency name such as `discord_api`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                requests: 0,
                failures: 0,
                window_start: Instant::now(),
                opened_at: Instant::now(),
                half_open_in_flight: 0,
            }),
        }
    }

    /// Current state (observational; may change immediately after).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Admit one call, or fail fast with [`ScanError::CircuitOpen`]. On
    /// admission the caller must report the outcome through
    /// [`CircuitBreaker::on_success`] / [`CircuitBreaker::on_failure`].
    pub fn try_acquire(&self) -> ScanResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                if inner.window_start.elapsed() > COUNT_WINDOW {
                    inner.requests = 0;
                    inner.failures = 0;
                    inner.window_start = Instant::now();
                }
                Ok(())
            }
            BreakerState::Open => {
                if inner.opened_at.elapsed() >= OPEN_TIMEOUT {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_in_flight = 1;
                    info!(breaker = %self.name, "circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(ScanError::CircuitOpen(self.name.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight < HALF_OPEN_MAX_REQUESTS {
                    inner.half_open_in_flight += 1;
                    Ok(())
                } else {
                    Err(ScanError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    /// Report a successful call.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.requests = 0;
                inner.failures = 0;
                inner.half_open_in_flight = 0;
                inner.window_start = Instant::now();
                info!(breaker = %self.name, "circuit closed");
            }
            BreakerState::Closed => {
                inner.requests += 1;
            }
            BreakerState::Open => {}
        }
    }

    /// Report a failed call.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Instant::now();
                inner.half_open_in_flight = 0;
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
            }
            BreakerState::Closed => {
                inner.requests += 1;
                inner.failures += 1;
                let ratio = f64::from(inner.failures) / f64::from(inner.requests);
                if inner.requests >= TRIP_MIN_REQUESTS && ratio >= TRIP_FAILURE_RATIO {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Instant::now();
                    warn!(
                        breaker = %self.name,
                        requests = inner.requests,
                        failures = inner.failures,
                        "circuit opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Run `call` through the breaker. A [`ScanError::UserNotVisible`] or
    /// [`ScanError::UserBanned`] outcome counts as a *successful* remote
    /// exchange: the dependency answered, the target just is not observable.
    pub async fn guard<T, F>(&self, call: F) -> ScanResult<T>
    where
        F: Future<Output = ScanResult<T>>,
    {
        self.try_acquire()?;
        match call.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) if e.is_visibility() => {
                self.on_success();
                Err(e)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    #[cfg(test)]
    fn force_elapsed_open(&self) {
        let mut inner = self.inner.lock();
        inner.opened_at = Instant::now() - OPEN_TIMEOUT;
    }
}
