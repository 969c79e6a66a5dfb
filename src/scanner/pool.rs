//! Round-robin scanner pool and connection processing.

use super::Scanner;
use crate::config::GuildCountThresholds;
use crate::db::{ActivityEntry, Database};
use crate::error::{ScanError, ScanResult};
use crate::models::{RobloxConnection, ReasonKind, UserStatus};
use crate::roblox::{RobloxApi, RobloxProfile};
use condo_proto::{RobloxId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Holds every scanner and hands them out round-robin. The counter is an
/// unsigned atomic; wraparound is modulo the pool size and therefore safe
/// indefinitely.
pub struct ScannerPool {
    scanners: Vec<Arc<Scanner>>,
    counter: AtomicUsize,
    db: Database,
    roblox: Arc<dyn RobloxApi>,
    thresholds: GuildCountThresholds,
}

impl ScannerPool {
    pub fn new(
        scanners: Vec<Arc<Scanner>>,
        db: Database,
        roblox: Arc<dyn RobloxApi>,
        thresholds: GuildCountThresholds,
    ) -> Self {
        Self {
            scanners,
            counter: AtomicUsize::new(0),
            db,
            roblox,
            thresholds,
        }
    }

    /// All scanners, in index order.
    pub fn scanners(&self) -> &[Arc<Scanner>] {
        &self.scanners
    }

    /// Next scanner round-robin, with its index. Empty pools return `None`.
    pub fn get_next(&self) -> Option<(Arc<Scanner>, usize)> {
        if self.scanners.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.scanners.len();
        Some((Arc::clone(&self.scanners[index]), index))
    }

    /// Process a Discord user's discovered connections: deduplicate by
    /// Roblox id (first occurrence wins), look up the user's condo guild set
    /// once, then run each unique connection through analysis and flagging.
    pub async fn process_connections(
        &self,
        cancel: &CancellationToken,
        discord_user: UserId,
        connections: Vec<RobloxConnection>,
    ) -> ScanResult<()> {
        if connections.is_empty() {
            return Ok(());
        }

        let mut seen: HashSet<RobloxId> = HashSet::new();
        let unique: Vec<RobloxConnection> = connections
            .into_iter()
            .filter(|c| seen.insert(c.roblox_user_id))
            .collect();

        let guild_ids = self.db.sync().get_discord_user_guilds(discord_user).await?;
        debug!(
            discord_user = %discord_user,
            connections = unique.len(),
            condo_guilds = guild_ids.len(),
            "processing connections"
        );

        for connection in unique {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            match self
                .process_roblox_connection(cancel, discord_user, &connection, &guild_ids)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_visibility() => {
                    debug!(
                        roblox_user = %connection.roblox_user_id,
                        code = e.error_code(),
                        "linked account not observable, skipping"
                    );
                }
                Err(e) => {
                    warn!(
                        discord_user = %discord_user,
                        roblox_user = %connection.roblox_user_id,
                        error = %e,
                        code = e.error_code(),
                        "connection processing failed"
                    );
                }
            }
        }

        Ok(())
    }

    async fn process_roblox_connection(
        &self,
        cancel: &CancellationToken,
        discord_user: UserId,
        connection: &RobloxConnection,
        guild_ids: &[condo_proto::GuildId],
    ) -> ScanResult<()> {
        self.db.sync().upsert_connection(connection).await?;

        let roblox_user = connection.roblox_user_id;
        let existing = self.db.users().get_user_by_id(roblox_user).await?;
        let guild_count = guild_ids.len();

        // A known condo-flagged account with a still-strong guild set only
        // needs its confidence refreshed; anything else re-analyzes fully.
        if let Some(existing_user) = &existing
            && existing_user.has_reason(ReasonKind::Condo)
            && guild_count >= 3
        {
            let (scanner, _) = self
                .get_next()
                .ok_or_else(|| ScanError::Gateway("scanner pool is empty".to_string()))?;
            return scanner
                .flag_roblox_account(
                    discord_user,
                    roblox_user,
                    UserStatus::Flagged,
                    self.thresholds.confidence_for(guild_count),
                    guild_count,
                    existing.clone(),
                    None,
                )
                .await;
        }

        let profile: Option<RobloxProfile> = if existing.is_none() {
            match self.roblox.fetch_user(roblox_user).await {
                Ok(profile) if profile.is_banned => {
                    info!(roblox_user = %roblox_user, "linked account already banned, aborting");
                    if let Err(e) = self
                        .db
                        .activity()
                        .log(&ActivityEntry::system(
                            "skipped_banned",
                            Some(roblox_user),
                            serde_json::json!({"discord_user_id": discord_user.to_string()}),
                        ))
                        .await
                    {
                        warn!(roblox_user = %roblox_user, error = %e, "activity log write failed");
                    }
                    return Err(ScanError::UserBanned);
                }
                Ok(profile) => Some(profile),
                Err(e @ ScanError::UserNotVisible) => return Err(e),
                Err(e) => {
                    warn!(roblox_user = %roblox_user, error = %e, "profile fetch failed, proceeding without profile");
                    None
                }
            }
        } else {
            None
        };

        let (scanner, _) = self
            .get_next()
            .ok_or_else(|| ScanError::Gateway("scanner pool is empty".to_string()))?;
        scanner
            .analyze_and_flag_user(
                cancel,
                discord_user,
                guild_ids,
                roblox_user,
                existing,
                profile.as_ref(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Round-robin fairness over the raw counter, independent of scanner
    // construction (pool integration is covered in tests/).
    #[test]
    fn counter_distribution_is_uniform() {
        let counter = AtomicUsize::new(0);
        let n = 4;
        let mut counts = vec![0u32; n];
        for _ in 0..n * 5 {
            counts[counter.fetch_add(1, Ordering::Relaxed) % n] += 1;
        }
        assert!(counts.iter().all(|&c| c == 5));
    }

    #[test]
    fn counter_wraparound_is_safe() {
        let counter = AtomicUsize::new(usize::MAX - 1);
        let n = 3;
        let a = counter.fetch_add(1, Ordering::Relaxed) % n;
        let b = counter.fetch_add(1, Ordering::Relaxed) % n;
        // Wrap happened between the two grants; both are valid indices.
        assert!(a < n && b < n);
    }
}
