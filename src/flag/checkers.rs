//! Per-kind reason checkers.
//!
//! Each checker recomputes one evidence kind for a review user. In
//! `skip_reason_generation` mode only the confidence is produced; the
//! re-check worker keeps the stored message and evidence and bumps the
//! number when it strictly improved.

use crate::config::GuildCountThresholds;
use crate::db::Database;
use crate::error::ScanResult;
use crate::models::{Reason, ReasonKind, ReviewUser, UserStatus};
use crate::roblox::RobloxApi;
use async_trait::async_trait;
use condo_proto::GuildId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Source tag recorded on recomputed reasons.
const RECHECK_SOURCE: &str = "Recheck";

/// Recomputes one reason kind.
#[async_trait]
pub trait ReasonChecker: Send + Sync {
    /// The kind this checker owns.
    fn kind(&self) -> ReasonKind;

    /// Recompute the reason for `user`. `None` means no evidence of this
    /// kind exists. With `skip_reason_generation` the returned reason
    /// carries only a confidence (empty message and evidence).
    async fn check(
        &self,
        user: &ReviewUser,
        skip_reason_generation: bool,
    ) -> ScanResult<Option<Reason>>;
}

// ============================================================================
// Condo: linked-account condo co-membership
// ============================================================================

/// Recounts the condo servers inhabited by the Discord accounts linked to a
/// Roblox user, applying the full guild-count confidence table (including
/// the low tiers the scan path reserves for mixed outcomes).
pub struct CondoChecker {
    db: Database,
    thresholds: GuildCountThresholds,
}

impl CondoChecker {
    pub fn new(db: Database, thresholds: GuildCountThresholds) -> Self {
        Self { db, thresholds }
    }
}

#[async_trait]
impl ReasonChecker for CondoChecker {
    fn kind(&self) -> ReasonKind {
        ReasonKind::Condo
    }

    async fn check(
        &self,
        user: &ReviewUser,
        skip_reason_generation: bool,
    ) -> ScanResult<Option<Reason>> {
        let discord_users = self.db.sync().get_discord_users_for_roblox(user.id).await?;
        if discord_users.is_empty() {
            return Ok(None);
        }

        let memberships = self
            .db
            .sync()
            .get_flagged_server_members(&discord_users)
            .await?;
        let servers: HashSet<GuildId> = memberships.iter().map(|m| m.server_id).collect();
        if servers.is_empty() {
            return Ok(None);
        }

        let confidence = self.thresholds.confidence_for(servers.len());
        if skip_reason_generation {
            return Ok(Some(Reason::new("", confidence, vec![], RECHECK_SOURCE)));
        }

        let evidence = discord_users
            .iter()
            .map(|d| format!("Discord User ID: {d}"))
            .collect();
        Ok(Some(Reason::new(
            format!("Member of {} condo servers", servers.len()),
            confidence,
            evidence,
            RECHECK_SOURCE,
        )))
    }
}

// ============================================================================
// Friend: flagged accounts on the friends list
// ============================================================================

/// Scores a user by the share of their Roblox friends already under review.
pub struct FriendChecker {
    db: Database,
    roblox: Arc<dyn RobloxApi>,
}

impl FriendChecker {
    pub fn new(db: Database, roblox: Arc<dyn RobloxApi>) -> Self {
        Self { db, roblox }
    }

    fn ratio_confidence(flagged: usize, total: usize) -> f64 {
        if total == 0 || flagged == 0 {
            return 0.0;
        }
        let ratio = flagged as f64 / total as f64;
        match ratio {
            r if r >= 0.5 => 0.9,
            r if r >= 0.25 => 0.7,
            r if r >= 0.1 => 0.5,
            _ => 0.3,
        }
    }
}

#[async_trait]
impl ReasonChecker for FriendChecker {
    fn kind(&self) -> ReasonKind {
        ReasonKind::Friend
    }

    async fn check(
        &self,
        user: &ReviewUser,
        skip_reason_generation: bool,
    ) -> ScanResult<Option<Reason>> {
        let friends = self.roblox.fetch_friends(user.id).await?;
        if friends.is_empty() {
            return Ok(None);
        }

        let reviewed = self.db.users().get_users_by_ids(&friends).await?;
        let flagged: Vec<_> = reviewed
            .values()
            .filter(|f| matches!(f.status, UserStatus::Flagged | UserStatus::Confirmed))
            .collect();
        if flagged.is_empty() {
            return Ok(None);
        }

        let confidence = Self::ratio_confidence(flagged.len(), friends.len());
        if skip_reason_generation {
            return Ok(Some(Reason::new("", confidence, vec![], RECHECK_SOURCE)));
        }

        let evidence = flagged
            .iter()
            .map(|f| format!("Flagged friend: {}", f.id))
            .collect();
        Ok(Some(Reason::new(
            format!(
                "{} of {} friends are under review",
                flagged.len(),
                friends.len()
            ),
            confidence,
            evidence,
            RECHECK_SOURCE,
        )))
    }
}

// ============================================================================
// Group: membership in operator-curated flagged groups
// ============================================================================

/// Scores a user by the most confident flagged group they belong to.
pub struct GroupChecker {
    db: Database,
    roblox: Arc<dyn RobloxApi>,
}

impl GroupChecker {
    pub fn new(db: Database, roblox: Arc<dyn RobloxApi>) -> Self {
        Self { db, roblox }
    }
}

#[async_trait]
impl ReasonChecker for GroupChecker {
    fn kind(&self) -> ReasonKind {
        ReasonKind::Group
    }

    async fn check(
        &self,
        user: &ReviewUser,
        skip_reason_generation: bool,
    ) -> ScanResult<Option<Reason>> {
        let groups = self.roblox.fetch_groups(user.id).await?;
        if groups.is_empty() {
            return Ok(None);
        }

        let hits = self.db.sync().get_flagged_group_confidences(&groups).await?;
        let Some((_, confidence)) = hits
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return Ok(None);
        };

        debug!(user = %user.id, groups = hits.len(), "flagged group membership found");
        if skip_reason_generation {
            return Ok(Some(Reason::new("", confidence, vec![], RECHECK_SOURCE)));
        }

        let evidence = hits.iter().map(|(id, _)| format!("Group ID: {id}")).collect();
        Ok(Some(Reason::new(
            format!("Member of {} flagged groups", hits.len()),
            confidence,
            evidence,
            RECHECK_SOURCE,
        )))
    }
}
