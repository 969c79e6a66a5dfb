//! One account's scan operations.
//!
//! A [`Scanner`] binds a gateway session, that account's REST client, the
//! shared pacer and breaker, the AI analyzer and storage. All outbound calls
//! serialize through the pacer and pass the breaker; `UserNotVisible` counts
//! as an answered exchange, not a dependency failure.

pub mod pool;

pub use pool::ScannerPool;

use crate::analyzer::{FlaggedMessage, MessageAnalyzer, MessageContent};
use crate::config::GuildCountThresholds;
use crate::db::{ActivityEntry, Database};
use crate::error::{ScanError, ScanResult};
use crate::flag::{apply_status, merge_reason};
use crate::gateway::GatewaySession;
use crate::limits::{CircuitBreaker, Pacer};
use crate::models::{
    InappropriateMessage, Reason, ReasonKind, ReviewUser, ServerMember, UserStatus, UserSummary,
};
use crate::rest::DiscordApi;
use crate::roblox::RobloxProfile;
use chrono::Utc;
use condo_proto::{GuildId, RobloxId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between per-guild message analyses.
const GUILD_ANALYSIS_SPACING: Duration = Duration::from_secs(1);

/// System reviewer id recorded on auto-confirmations.
const SYSTEM_REVIEWER: u64 = 0;

/// One Platform-D account's profile-fetch, message-search and flag-write
/// operations.
pub struct Scanner {
    index: usize,
    session: Arc<GatewaySession>,
    api: Arc<dyn DiscordApi>,
    pacer: Arc<Pacer>,
    breaker: Arc<CircuitBreaker>,
    analyzer: Arc<dyn MessageAnalyzer>,
    db: Database,
    thresholds: GuildCountThresholds,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        session: Arc<GatewaySession>,
        api: Arc<dyn DiscordApi>,
        pacer: Arc<Pacer>,
        breaker: Arc<CircuitBreaker>,
        analyzer: Arc<dyn MessageAnalyzer>,
        db: Database,
        thresholds: GuildCountThresholds,
    ) -> Self {
        Self {
            index,
            session,
            api,
            pacer,
            breaker,
            analyzer,
            db,
            thresholds,
        }
    }

    /// Zero-based scanner index in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fetch a user's profile with mutual guilds, upsert the memberships and
    /// return `(username, verified connections)`.
    ///
    /// `update_scan_time` stamps the user's scan-queue entry as part of the
    /// member upsert.
    pub async fn perform_full_scan(
        &self,
        cancel: &CancellationToken,
        user: UserId,
        update_scan_time: bool,
    ) -> ScanResult<(String, Vec<crate::models::RobloxConnection>)> {
        self.pacer.wait_for_slot(cancel).await?;
        let profile = self.breaker.guard(self.api.fetch_profile(user)).await?;

        let now = Utc::now();
        let members: Vec<ServerMember> = profile
            .mutual_guilds
            .iter()
            .map(|g| ServerMember::sighted(g.id, user, now))
            .collect();
        self.db
            .sync()
            .upsert_server_members(&members, update_scan_time)
            .await?;

        let mut connections = Vec::new();
        for account in &profile.connected_accounts {
            if !account.is_verified_roblox() {
                continue;
            }
            match account.id.parse::<u64>() {
                Ok(roblox_id) => connections.push(crate::models::RobloxConnection::verified_now(
                    user,
                    RobloxId(roblox_id),
                    account.name.clone(),
                )),
                Err(_) => {
                    warn!(
                        scanner = self.index,
                        raw = %account.id,
                        "connected account carried a non-numeric roblox id"
                    );
                }
            }
        }

        debug!(
            scanner = self.index,
            user = %user,
            mutual_guilds = members.len(),
            connections = connections.len(),
            "full scan complete"
        );
        Ok((profile.user.username, connections))
    }

    /// Whether this scanner's account is in `guild`.
    pub fn has_guild_access(&self, guild: GuildId) -> bool {
        self.session.has_guild(guild)
    }

    /// Search one guild for a user's messages. An unknown guild yields an
    /// empty vec, not an error.
    pub async fn fetch_user_messages(
        &self,
        cancel: &CancellationToken,
        guild: GuildId,
        user: UserId,
    ) -> ScanResult<Vec<MessageContent>> {
        self.pacer.wait_for_slot(cancel).await?;
        let response = self
            .breaker
            .guard(self.api.search_messages(guild, user))
            .await?;
        Ok(response
            .messages_by(user)
            .into_iter()
            .filter(|m| !m.content.is_empty())
            .map(|m| MessageContent {
                id: m.id,
                content: m.content,
            })
            .collect())
    }

    /// Decide and persist a flag for the Roblox account linked to
    /// `discord_user`, given the user's condo guild set.
    ///
    /// Three or more mutual condo servers flag on membership alone. Below
    /// that, accessible guilds are message-analyzed one by one; AI findings
    /// flag with the mean finding confidence, and no findings resolves to a
    /// mixed outcome.
    pub async fn analyze_and_flag_user(
        &self,
        cancel: &CancellationToken,
        discord_user: UserId,
        guild_ids: &[GuildId],
        roblox_user: RobloxId,
        existing: Option<ReviewUser>,
        profile: Option<&RobloxProfile>,
    ) -> ScanResult<()> {
        let guild_count = guild_ids.len();

        let (status, confidence) = if guild_count >= 3 {
            (UserStatus::Flagged, self.thresholds.confidence_for(guild_count))
        } else {
            match self
                .analyze_guild_messages(cancel, discord_user, guild_ids)
                .await?
            {
                Some(mean_confidence) => (UserStatus::Flagged, mean_confidence),
                None => (UserStatus::Mixed, self.thresholds.mixed),
            }
        };

        self.flag_roblox_account(
            discord_user,
            roblox_user,
            status,
            confidence,
            guild_count,
            existing,
            profile,
        )
        .await
    }

    /// Walk the accessible guilds, analyzing message history until one guild
    /// produces findings. Returns the mean finding confidence, or `None`
    /// when every accessible guild came back clean.
    async fn analyze_guild_messages(
        &self,
        cancel: &CancellationToken,
        discord_user: UserId,
        guild_ids: &[GuildId],
    ) -> ScanResult<Option<f64>> {
        let accessible: Vec<GuildId> = guild_ids
            .iter()
            .copied()
            .filter(|g| self.has_guild_access(*g))
            .collect();

        for (position, guild) in accessible.iter().enumerate() {
            if position > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(GUILD_ANALYSIS_SPACING) => {}
                    _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                }
            }

            let messages = match self.fetch_user_messages(cancel, *guild, discord_user).await {
                Ok(messages) => messages,
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(e) => {
                    warn!(
                        scanner = self.index,
                        guild = %guild,
                        error = %e,
                        code = e.error_code(),
                        "message fetch failed, skipping guild"
                    );
                    continue;
                }
            };
            if messages.is_empty() {
                continue;
            }

            let guild_name = self
                .session
                .guild(*guild)
                .map(|g| g.name)
                .unwrap_or_default();
            let flagged = match self
                .analyzer
                .process_messages(*guild, &guild_name, discord_user, &messages)
                .await
            {
                Ok(flagged) => flagged,
                Err(e) => {
                    warn!(
                        scanner = self.index,
                        guild = %guild,
                        error = %e,
                        "analyzer failed, skipping guild"
                    );
                    continue;
                }
            };

            if !flagged.is_empty() {
                self.persist_findings(*guild, discord_user, &flagged).await?;
                let mean = flagged.iter().map(|f| f.confidence).sum::<f64>()
                    / flagged.len() as f64;
                return Ok(Some(mean));
            }
        }

        Ok(None)
    }

    async fn persist_findings(
        &self,
        guild: GuildId,
        discord_user: UserId,
        flagged: &[FlaggedMessage],
    ) -> ScanResult<()> {
        let now = Utc::now();
        let rows: Vec<InappropriateMessage> = flagged
            .iter()
            .map(|f| InappropriateMessage {
                server_id: guild,
                user_id: discord_user,
                message_id: f.message_id,
                content: f.content.clone(),
                reason: f.reason.clone(),
                confidence: f.confidence,
                detected_at: now,
                updated_at: now,
            })
            .collect();
        self.db
            .messages()
            .batch_store_inappropriate_messages(&rows)
            .await?;

        let summary_reason = flagged
            .first()
            .map(|f| f.reason.clone())
            .unwrap_or_default();
        self.db
            .messages()
            .batch_update_user_summaries(&[UserSummary {
                user_id: discord_user,
                reason: summary_reason,
                message_count: flagged.len() as u64,
                last_detected: now,
                updated_at: now,
            }])
            .await?;
        Ok(())
    }

    /// Merge the condo reason into the review record and write it through,
    /// auto-confirming and mirroring flagged outcomes and mirroring mixed
    /// ones. Mirror failures are logged, never propagated.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn flag_roblox_account(
        &self,
        discord_user: UserId,
        roblox_user: RobloxId,
        status: UserStatus,
        confidence: f64,
        guild_count: usize,
        existing: Option<ReviewUser>,
        profile: Option<&RobloxProfile>,
    ) -> ScanResult<()> {
        let mut user = existing.unwrap_or_else(|| ReviewUser::new(roblox_user));
        if let Some(profile) = profile {
            user.name = profile.name.clone();
            user.display_name = profile.display_name.clone();
            user.description = profile.description.clone();
            user.created_at = profile.created_at;
        }

        let reason = Reason::new(
            format!("Member of {guild_count} condo servers"),
            confidence,
            vec![format!("Discord User ID: {discord_user}")],
            "Discord",
        );
        merge_reason(&mut user, ReasonKind::Condo, reason);
        user.status = apply_status(user.status, status);
        user.last_scanned = Some(Utc::now());
        user.engine_version = env!("CARGO_PKG_VERSION").to_string();

        let mut batch = HashMap::new();
        batch.insert(user.id, user.clone());
        self.db.users().save_users(&batch).await?;

        let activity = self.db.activity();
        match status {
            UserStatus::Flagged => {
                self.db
                    .users()
                    .confirm_users(&[&user], SYSTEM_REVIEWER)
                    .await?;
                if let Err(e) = self.db.mirror().add_confirmed(&user, SYSTEM_REVIEWER).await {
                    warn!(roblox_user = %roblox_user, error = %e, "confirmed mirror write failed");
                }
                if let Err(e) = activity
                    .log(&ActivityEntry::system(
                        "user_flagged",
                        Some(roblox_user),
                        serde_json::json!({
                            "confidence": user.confidence,
                            "guild_count": guild_count,
                            "discord_user_id": discord_user.to_string(),
                        }),
                    ))
                    .await
                {
                    warn!(roblox_user = %roblox_user, error = %e, "activity log write failed");
                }
                info!(
                    scanner = self.index,
                    roblox_user = %roblox_user,
                    confidence = user.confidence,
                    guild_count = guild_count,
                    "roblox account flagged"
                );
            }
            _ => {
                if let Err(e) = self.db.mirror().add_mixed(&user).await {
                    warn!(roblox_user = %roblox_user, error = %e, "mixed mirror write failed");
                }
                if let Err(e) = activity
                    .log(&ActivityEntry::system(
                        "user_mixed",
                        Some(roblox_user),
                        serde_json::json!({
                            "confidence": user.confidence,
                            "guild_count": guild_count,
                        }),
                    ))
                    .await
                {
                    warn!(roblox_user = %roblox_user, error = %e, "activity log write failed");
                }
                info!(
                    scanner = self.index,
                    roblox_user = %roblox_user,
                    "roblox account recorded as mixed"
                );
            }
        }

        Ok(())
    }
}
