//! The mutual-scan driver.
//!
//! One driver task runs per verification token pair, so verification-side
//! capacity governs scan concurrency. Each iteration pulls the next due user
//! from the scan queue, fans out to every scanner in parallel under a
//! per-scanner timeout, classifies the outcomes and applies the
//! visibility/transient policy:
//!
//! - every scanner transient -> back off 30 s, user stays due
//! - any success -> union the connections, add verification profiles, hand
//!   the lot to the pool, stamp `last_scanned`
//! - every scanner `UserNotVisible` -> stamp `last_scanned` only
//! - anything else -> leave the user due for the next cycle

use crate::db::Database;
use crate::error::{ScanError, ScanResult};
use crate::models::RobloxConnection;
use crate::scanner::ScannerPool;
use crate::verification::VerificationManager;
use chrono::{Duration as ChronoDuration, Utc};
use condo_proto::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-scanner fan-out timeout.
const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Back-off when every scanner reported a transient error, and idle pause
/// when the queue is empty.
const BACKOFF: Duration = Duration::from_secs(30);

/// Classified fan-out outcome for one user.
#[derive(Debug, Default)]
struct FanoutOutcome {
    connections: Vec<RobloxConnection>,
    successes: usize,
    visibility_errors: usize,
    temporary_errors: usize,
    other_errors: usize,
}

impl FanoutOutcome {
    fn total(&self) -> usize {
        self.successes + self.visibility_errors + self.temporary_errors + self.other_errors
    }
}

/// Driver over one verification pair's share of the scan queue.
pub struct MutualScanDriver {
    pool: Arc<ScannerPool>,
    verification: Arc<VerificationManager>,
    db: Database,
    user_scan_age: ChronoDuration,
    backoff: Duration,
}

impl MutualScanDriver {
    pub fn new(
        pool: Arc<ScannerPool>,
        verification: Arc<VerificationManager>,
        db: Database,
        user_scan_age_hours: u64,
    ) -> Arc<Self> {
        Self::with_backoff(pool, verification, db, user_scan_age_hours, BACKOFF)
    }

    /// Construct with a custom transient/idle back-off (tests shrink it).
    pub fn with_backoff(
        pool: Arc<ScannerPool>,
        verification: Arc<VerificationManager>,
        db: Database,
        user_scan_age_hours: u64,
        backoff: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            verification,
            db,
            user_scan_age: ChronoDuration::hours(user_scan_age_hours as i64),
            backoff,
        })
    }

    /// Run the scan loop for `pair_index` until cancellation.
    pub async fn run(self: Arc<Self>, pair_index: usize, cancel: CancellationToken) {
        info!(pair = pair_index, "mutual scan driver started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let due_before = Utc::now() - self.user_scan_age;
            let user = match self.db.sync().get_user_for_full_scan(due_before).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    debug!(pair = pair_index, "scan queue drained, idling");
                    if Self::pause(&cancel, self.backoff).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(pair = pair_index, error = %e, "scan queue pull failed");
                    if Self::pause(&cancel, self.backoff).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.scan_user(pair_index, user, &cancel).await {
                Ok(()) => {}
                Err(ScanError::Cancelled) => break,
                Err(e) => {
                    warn!(pair = pair_index, user = %user, error = %e, "scan iteration failed");
                }
            }
        }
        info!(pair = pair_index, "mutual scan driver stopped");
    }

    /// Scan one user across every scanner and apply the outcome policy.
    pub async fn scan_user(
        &self,
        pair_index: usize,
        user: UserId,
        cancel: &CancellationToken,
    ) -> ScanResult<()> {
        let outcome = self.fan_out(user, cancel).await;
        debug!(
            pair = pair_index,
            user = %user,
            successes = outcome.successes,
            not_visible = outcome.visibility_errors,
            transient = outcome.temporary_errors,
            other = outcome.other_errors,
            "fan-out classified"
        );

        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        // Every scanner transiently failed: global backoff on this user,
        // leaving it due.
        if outcome.temporary_errors == outcome.total() && outcome.total() > 0 {
            debug!(user = %user, "all scanners transient, backing off");
            Self::pause(cancel, self.backoff).await?;
            return Ok(());
        }

        if outcome.successes > 0 {
            let mut connections = outcome.connections;
            connections.extend(
                self.verification
                    .fetch_verification_profiles(cancel, user, pair_index)
                    .await,
            );
            self.pool
                .process_connections(cancel, user, connections)
                .await?;
            self.db.sync().update_user_scan_timestamp(user).await?;
            return Ok(());
        }

        // Nothing but "not visible": the user is gone or private. Stamp and
        // move on; no connection or flag is written.
        if outcome.visibility_errors == outcome.total() && outcome.total() > 0 {
            self.db.sync().update_user_scan_timestamp(user).await?;
            return Ok(());
        }

        // Mixed non-transient failures: leave the timestamp unchanged so the
        // user is retried next cycle.
        Ok(())
    }

    async fn fan_out(&self, user: UserId, cancel: &CancellationToken) -> FanoutOutcome {
        let scans = self.pool.scanners().iter().map(|scanner| {
            let scanner = Arc::clone(scanner);
            let cancel = cancel.clone();
            async move {
                match tokio::time::timeout(
                    SCAN_TIMEOUT,
                    scanner.perform_full_scan(&cancel, user, false),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ScanError::ResponseTimeout),
                }
            }
        });

        let results = futures_util::future::join_all(scans).await;
        let mut outcome = FanoutOutcome::default();
        for result in results {
            match result {
                Ok((_username, connections)) => {
                    outcome.successes += 1;
                    outcome.connections.extend(connections);
                }
                Err(e) if e.is_visibility() => outcome.visibility_errors += 1,
                Err(e) if e.is_transient() => outcome.temporary_errors += 1,
                Err(e) => {
                    warn!(user = %user, error = %e, code = e.error_code(), "scan failed");
                    outcome.other_errors += 1;
                }
            }
        }
        outcome
    }

    async fn pause(cancel: &CancellationToken, duration: Duration) -> ScanResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
        }
    }
}
