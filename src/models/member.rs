//! Membership and connection records.

use chrono::{DateTime, Utc};
use condo_proto::{GuildId, RobloxId, UserId};

/// One observed (server, user) membership. Append-only upserts keyed by
/// `(server_id, user_id)`; `joined_at <= updated_at` always holds because
/// upserts refresh only `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMember {
    pub server_id: GuildId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerMember {
    /// A fresh sighting stamped now.
    pub fn sighted(server_id: GuildId, user_id: UserId, joined_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            server_id,
            user_id,
            joined_at: joined_at.min(now),
            updated_at: now,
        }
    }
}

/// Condo server metadata, upserted once per sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_id: GuildId,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// A verified link between a Discord user and a Roblox user. Only verified
/// connections are persisted and acted on; at most one row exists per
/// `(discord_user_id, roblox_user_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobloxConnection {
    pub discord_user_id: UserId,
    pub roblox_user_id: RobloxId,
    pub roblox_username: String,
    pub verified: bool,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RobloxConnection {
    /// Build a verified connection detected now.
    pub fn verified_now(
        discord_user_id: UserId,
        roblox_user_id: RobloxId,
        roblox_username: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            discord_user_id,
            roblox_user_id,
            roblox_username: roblox_username.into(),
            verified: true,
            detected_at: now,
            updated_at: now,
        }
    }
}
