//! Review records for Roblox accounts under moderation.

use super::{Reason, ReasonKind, Reasons};
use chrono::{DateTime, Utc};
use condo_proto::RobloxId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a review record. The pipeline only performs
/// `Unflagged->Flagged`, `Flagged->Confirmed` (auto-confirm) and `any->Mixed`
/// automatically; everything else is a reviewer action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Flagged,
    Confirmed,
    Cleared,
    Banned,
    Unflagged,
    Mixed,
}

impl UserStatus {
    /// Stable lowercase name, also the storage column value.
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Flagged => "flagged",
            UserStatus::Confirmed => "confirmed",
            UserStatus::Cleared => "cleared",
            UserStatus::Banned => "banned",
            UserStatus::Unflagged => "unflagged",
            UserStatus::Mixed => "mixed",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flagged" => Ok(UserStatus::Flagged),
            "confirmed" => Ok(UserStatus::Confirmed),
            "cleared" => Ok(UserStatus::Cleared),
            "banned" => Ok(UserStatus::Banned),
            "unflagged" => Ok(UserStatus::Unflagged),
            "mixed" => Ok(UserStatus::Mixed),
            other => Err(format!("unknown user status: {other}")),
        }
    }
}

/// A Roblox account under review. Created when first flagged; mutated only
/// through the flagging engine.
#[derive(Debug, Clone)]
pub struct ReviewUser {
    /// Roblox user id.
    pub id: RobloxId,
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// Account creation time on the platform, when the profile was fetched.
    pub created_at: Option<DateTime<Utc>>,
    pub reasons: Reasons,
    pub confidence: f64,
    pub status: UserStatus,
    pub last_scanned: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_viewed: Option<DateTime<Utc>>,
    pub last_ban_check: Option<DateTime<Utc>>,
    /// Version of the flagging engine that last wrote this record.
    pub engine_version: String,
    pub uuid: Uuid,
}

impl ReviewUser {
    /// A fresh, unflagged record for a Roblox id.
    pub fn new(id: RobloxId) -> Self {
        Self {
            id,
            name: String::new(),
            display_name: String::new(),
            description: String::new(),
            created_at: None,
            reasons: Reasons::new(),
            confidence: 0.0,
            status: UserStatus::Unflagged,
            last_scanned: None,
            last_updated: None,
            last_viewed: None,
            last_ban_check: None,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            uuid: Uuid::new_v4(),
        }
    }

    /// Convenience lookup of a single reason kind.
    pub fn reason(&self, kind: ReasonKind) -> Option<&Reason> {
        self.reasons.get(&kind)
    }

    /// Whether any reason of `kind` is present.
    pub fn has_reason(&self, kind: ReasonKind) -> bool {
        self.reasons.contains_key(&kind)
    }
}
