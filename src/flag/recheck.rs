//! The reason re-check worker.
//!
//! Two passes over the review store, fully driven by cancellation:
//!
//! 1. For each rechecked kind, page through users *missing* that reason and
//!    run the checker; newly found evidence merges and saves.
//! 2. For each kind, page through users *having* that reason and recompute
//!    in skip-reason-generation mode; the stored reason keeps its message
//!    and evidence, and only a strictly greater confidence persists.
//!
//! Confidence is therefore non-decreasing under this worker.

use super::calculate_confidence;
use super::checkers::ReasonChecker;
use crate::db::Database;
use crate::error::{ScanError, ScanResult};
use crate::models::ReviewUser;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Users per page.
const BATCH_SIZE: u32 = 50;

/// Pause between batches.
const BATCH_PAUSE: Duration = Duration::from_secs(1);

/// Counters for one sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecheckStats {
    pub newly_flagged: usize,
    pub confidence_raised: usize,
}

/// Iterates users per reason kind and reruns the checkers.
pub struct RecheckWorker {
    db: Database,
    checkers: Vec<Arc<dyn ReasonChecker>>,
}

impl RecheckWorker {
    pub fn new(db: Database, checkers: Vec<Arc<dyn ReasonChecker>>) -> Self {
        Self { db, checkers }
    }

    /// Run both passes once.
    pub async fn run_sweep(&self, cancel: &CancellationToken) -> ScanResult<RecheckStats> {
        let mut stats = RecheckStats::default();
        for checker in &self.checkers {
            stats.newly_flagged += self.fill_missing(checker.as_ref(), cancel).await?;
        }
        for checker in &self.checkers {
            stats.confidence_raised += self.raise_existing(checker.as_ref(), cancel).await?;
        }
        info!(
            newly_flagged = stats.newly_flagged,
            confidence_raised = stats.confidence_raised,
            "recheck sweep complete"
        );
        Ok(stats)
    }

    /// Pass 1: users missing the checker's kind.
    async fn fill_missing(
        &self,
        checker: &dyn ReasonChecker,
        cancel: &CancellationToken,
    ) -> ScanResult<usize> {
        let kind = checker.kind();
        let mut cursor = None;
        let mut filled = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let page = self
                .db
                .users()
                .get_users_without_reason(kind, BATCH_SIZE, cursor)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.id);

            for user in &page {
                match checker.check(user, false).await {
                    Ok(Some(reason)) if reason.confidence > 0.0 => {
                        let mut updated = user.clone();
                        super::merge_reason(&mut updated, kind, reason);
                        self.save(updated).await?;
                        filled += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(user = %user.id, kind = %kind, error = %e, "checker failed");
                    }
                }
            }

            Self::pause(cancel).await?;
        }

        debug!(kind = %kind, filled = filled, "missing-reason pass done");
        Ok(filled)
    }

    /// Pass 2: users already holding the kind; persist only strict
    /// confidence increases.
    async fn raise_existing(
        &self,
        checker: &dyn ReasonChecker,
        cancel: &CancellationToken,
    ) -> ScanResult<usize> {
        let kind = checker.kind();
        let mut cursor = None;
        let mut raised = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let page = self
                .db
                .users()
                .get_users_with_reason(kind, BATCH_SIZE, cursor)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.id);

            for user in &page {
                let stored_confidence = match user.reason(kind) {
                    Some(reason) => reason.confidence,
                    None => continue,
                };

                match checker.check(user, true).await {
                    Ok(Some(recomputed)) if recomputed.confidence > stored_confidence => {
                        let mut updated = user.clone();
                        if let Some(stored) = updated.reasons.get_mut(&kind) {
                            stored.confidence = recomputed.confidence;
                            stored.source = recomputed.source;
                        }
                        updated.confidence = calculate_confidence(&updated.reasons);
                        updated.last_updated = Some(Utc::now());
                        self.save(updated).await?;
                        raised += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(user = %user.id, kind = %kind, error = %e, "checker failed");
                    }
                }
            }

            Self::pause(cancel).await?;
        }

        debug!(kind = %kind, raised = raised, "recompute pass done");
        Ok(raised)
    }

    async fn save(&self, user: ReviewUser) -> ScanResult<()> {
        let mut batch = HashMap::new();
        batch.insert(user.id, user);
        self.db.users().save_users(&batch).await?;
        Ok(())
    }

    async fn pause(cancel: &CancellationToken) -> ScanResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(BATCH_PAUSE) => Ok(()),
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
        }
    }
}
