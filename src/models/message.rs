//! AI-flagged message artifacts.

use chrono::{DateTime, Utc};
use condo_proto::{GuildId, MessageId, UserId};

/// One message the analyzer flagged, batch-written append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct InappropriateMessage {
    pub server_id: GuildId,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub content: String,
    pub reason: String,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user aggregate of the latest AI findings.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSummary {
    pub user_id: UserId,
    pub reason: String,
    pub message_count: u64,
    pub last_detected: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
