//! Platform ban sweep.
//!
//! Flagged and confirmed accounts are periodically re-checked against the
//! platform: a profile that now reports banned moves the review record to
//! `Banned` so reviewers stop spending time on it. Every visited record gets
//! `last_ban_check` stamped regardless of outcome, so the sweep only touches
//! each account once per recheck window.

use crate::db::{ActivityEntry, Database};
use crate::error::{ScanError, ScanResult};
use crate::models::UserStatus;
use crate::roblox::RobloxApi;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Users per page.
const BATCH_SIZE: u32 = 50;

/// Pause between batches.
const BATCH_PAUSE: Duration = Duration::from_secs(1);

/// How old a ban check must be before it is redone.
const RECHECK_AGE_HOURS: i64 = 24;

/// Counters for one sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct BanSweepStats {
    pub checked: usize,
    pub newly_banned: usize,
}

/// Re-checks flagged accounts against the platform's ban state.
pub struct BanCheckWorker {
    db: Database,
    roblox: Arc<dyn RobloxApi>,
}

impl BanCheckWorker {
    pub fn new(db: Database, roblox: Arc<dyn RobloxApi>) -> Self {
        Self { db, roblox }
    }

    /// Run one sweep over every due user.
    pub async fn run_sweep(&self, cancel: &CancellationToken) -> ScanResult<BanSweepStats> {
        let recheck_before = Utc::now() - ChronoDuration::hours(RECHECK_AGE_HOURS);
        let mut stats = BanSweepStats::default();
        let mut cursor = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let page = self
                .db
                .users()
                .get_users_for_ban_check(BATCH_SIZE, cursor, recheck_before)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.id);

            for user in page {
                let mut updated = user;
                updated.last_ban_check = Some(Utc::now());
                stats.checked += 1;

                match self.roblox.fetch_user(updated.id).await {
                    Ok(profile) if profile.is_banned => {
                        updated.status = UserStatus::Banned;
                        updated.last_updated = Some(Utc::now());
                        stats.newly_banned += 1;
                        info!(roblox_user = %updated.id, "account banned on platform, closing review");
                        if let Err(e) = self
                            .db
                            .activity()
                            .log(&ActivityEntry::system(
                                "user_banned",
                                Some(updated.id),
                                serde_json::json!({"confidence": updated.confidence}),
                            ))
                            .await
                        {
                            warn!(roblox_user = %updated.id, error = %e, "activity log write failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) if e.is_visibility() => {
                        debug!(roblox_user = %updated.id, "profile gone, stamping check only");
                    }
                    Err(e) if e.is_transient() => {
                        // The platform is pushing back; let the next sweep
                        // finish the tail.
                        warn!(error = %e, "ban sweep hit a transient error, stopping early");
                        return Ok(stats);
                    }
                    Err(e) => {
                        warn!(roblox_user = %updated.id, error = %e, "ban check failed");
                    }
                }

                let mut batch = HashMap::new();
                batch.insert(updated.id, updated);
                self.db.users().save_users(&batch).await?;
            }

            tokio::select! {
                _ = tokio::time::sleep(BATCH_PAUSE) => {}
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            }
        }

        info!(
            checked = stats.checked,
            newly_banned = stats.newly_banned,
            "ban sweep complete"
        );
        Ok(stats)
    }
}
