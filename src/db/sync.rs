//! Sync-path repository: server membership, server info, connection records
//! and the full-scan queue.

use super::{DbError, from_ts, opt_from_ts, to_ts};
use crate::models::{RobloxConnection, ServerInfo, ServerMember};
use chrono::{DateTime, Utc};
use condo_proto::{GuildId, RobloxId, UserId};
use sqlx::SqlitePool;
use std::collections::HashSet;

/// Repository over the sync-side tables.
#[derive(Clone)]
pub struct SyncRepository {
    pool: SqlitePool,
}

impl SyncRepository {
    pub(super) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a server-info row, refreshing name and timestamp.
    pub async fn upsert_server_info(&self, info: &ServerInfo) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO server_info (server_id, name, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(server_id) DO UPDATE SET
               name = excluded.name,
               updated_at = excluded.updated_at",
        )
        .bind(info.server_id.get() as i64)
        .bind(&info.name)
        .bind(to_ts(info.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Batch-upsert membership rows in one transaction. Existing rows keep
    /// their original `joined_at`, so `joined_at <= updated_at` is preserved
    /// and the operation is idempotent over identical inputs.
    ///
    /// Every member also lands in the scan queue; when `update_scan_time` is
    /// set the queue entry's `last_scanned` is stamped now.
    pub async fn upsert_server_members(
        &self,
        members: &[ServerMember],
        update_scan_time: bool,
    ) -> Result<(), DbError> {
        if members.is_empty() {
            return Ok(());
        }

        let now = to_ts(Utc::now());
        let mut tx = self.pool.begin().await?;
        for member in members {
            sqlx::query(
                "INSERT INTO server_members (server_id, user_id, joined_at, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(server_id, user_id) DO UPDATE SET
                   updated_at = excluded.updated_at",
            )
            .bind(member.server_id.get() as i64)
            .bind(member.user_id.get() as i64)
            .bind(to_ts(member.joined_at))
            .bind(to_ts(member.updated_at))
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT OR IGNORE INTO scan_targets (user_id, last_scanned) VALUES (?, NULL)")
                .bind(member.user_id.get() as i64)
                .execute(&mut *tx)
                .await?;

            if update_scan_time {
                sqlx::query("UPDATE scan_targets SET last_scanned = ? WHERE user_id = ?")
                    .bind(now)
                    .bind(member.user_id.get() as i64)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert a verified connection record. The `(discord, roblox)` pair is
    /// unique; repeats refresh username and `updated_at` only.
    pub async fn upsert_connection(&self, conn: &RobloxConnection) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO roblox_connections
               (discord_user_id, roblox_user_id, roblox_username, verified, detected_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(discord_user_id, roblox_user_id) DO UPDATE SET
               roblox_username = excluded.roblox_username,
               verified = excluded.verified,
               updated_at = excluded.updated_at",
        )
        .bind(conn.discord_user_id.get() as i64)
        .bind(conn.roblox_user_id.get() as i64)
        .bind(&conn.roblox_username)
        .bind(conn.verified)
        .bind(to_ts(conn.detected_at))
        .bind(to_ts(conn.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pull the next user due a full scan: never-scanned users first, then
    /// oldest `last_scanned` below `before`.
    pub async fn get_user_for_full_scan(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Option<UserId>, DbError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM scan_targets
             WHERE last_scanned IS NULL OR last_scanned < ?
             ORDER BY last_scanned IS NOT NULL, last_scanned ASC
             LIMIT 1",
        )
        .bind(to_ts(before))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| UserId(id as u64)))
    }

    /// Stamp a user's scan-queue entry now.
    pub async fn update_user_scan_timestamp(&self, user: UserId) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO scan_targets (user_id, last_scanned) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET last_scanned = excluded.last_scanned",
        )
        .bind(user.get() as i64)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read back a scan-queue timestamp (test and policy inspection).
    #[allow(dead_code)]
    pub async fn get_user_scan_timestamp(
        &self,
        user: UserId,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT last_scanned FROM scan_targets WHERE user_id = ?")
                .bind(user.get() as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(ts,)| opt_from_ts(ts)))
    }

    /// All condo servers a Discord user is known to inhabit.
    pub async fn get_discord_user_guilds(&self, user: UserId) -> Result<Vec<GuildId>, DbError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT server_id FROM server_members WHERE user_id = ? ORDER BY server_id")
                .bind(user.get() as i64)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| GuildId(id as u64)).collect())
    }

    /// Server-info rows for the given guild ids. Part of the storage
    /// contract consumed by the review surfaces.
    #[allow(dead_code)]
    pub async fn get_server_info(&self, guilds: &[GuildId]) -> Result<Vec<ServerInfo>, DbError> {
        let mut out = Vec::with_capacity(guilds.len());
        for guild in guilds {
            let row: Option<(i64, String, i64)> = sqlx::query_as(
                "SELECT server_id, name, updated_at FROM server_info WHERE server_id = ?",
            )
            .bind(guild.get() as i64)
            .fetch_optional(&self.pool)
            .await?;
            if let Some((server_id, name, updated_at)) = row {
                out.push(ServerInfo {
                    server_id: GuildId(server_id as u64),
                    name,
                    updated_at: from_ts(updated_at),
                });
            }
        }
        Ok(out)
    }

    /// Membership rows for the given Discord users across all condo servers.
    pub async fn get_flagged_server_members(
        &self,
        users: &[UserId],
    ) -> Result<Vec<ServerMember>, DbError> {
        let mut out = Vec::new();
        for user in users {
            let rows: Vec<(i64, i64, i64, i64)> = sqlx::query_as(
                "SELECT server_id, user_id, joined_at, updated_at
                 FROM server_members WHERE user_id = ?",
            )
            .bind(user.get() as i64)
            .fetch_all(&self.pool)
            .await?;
            out.extend(rows.into_iter().map(|(sid, uid, joined, updated)| ServerMember {
                server_id: GuildId(sid as u64),
                user_id: UserId(uid as u64),
                joined_at: from_ts(joined),
                updated_at: from_ts(updated),
            }));
        }
        Ok(out)
    }

    /// Count of distinct users across all tracked servers. Part of the
    /// storage contract consumed by the review surfaces.
    #[allow(dead_code)]
    pub async fn get_unique_user_count(&self) -> Result<u64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM server_members")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    /// Which of the given users are already known in any server. Used by the
    /// grace-period filter: known users bypass the join-age check.
    pub async fn filter_known_users(
        &self,
        users: &[UserId],
    ) -> Result<HashSet<UserId>, DbError> {
        let mut known = HashSet::new();
        for user in users {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM server_members WHERE user_id = ?)",
            )
            .bind(user.get() as i64)
            .fetch_one(&self.pool)
            .await?;
            if exists != 0 {
                known.insert(*user);
            }
        }
        Ok(known)
    }

    /// Discord accounts linked to a Roblox id through verified connections.
    pub async fn get_discord_users_for_roblox(
        &self,
        roblox: RobloxId,
    ) -> Result<Vec<UserId>, DbError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT discord_user_id FROM roblox_connections
             WHERE roblox_user_id = ? AND verified = 1",
        )
        .bind(roblox.get() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| UserId(id as u64)).collect())
    }

    /// Flagged-group confidence lookup for the group checker.
    pub async fn get_flagged_group_confidences(
        &self,
        groups: &[u64],
    ) -> Result<Vec<(u64, f64)>, DbError> {
        let mut out = Vec::new();
        for group in groups {
            let row: Option<(i64, f64)> =
                sqlx::query_as("SELECT group_id, confidence FROM flagged_groups WHERE group_id = ?")
                    .bind(*group as i64)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some((id, confidence)) = row {
                out.push((id as u64, confidence));
            }
        }
        Ok(out)
    }
}
