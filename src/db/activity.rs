//! Activity log repository.

use super::{DbError, to_ts};
use chrono::Utc;
use condo_proto::RobloxId;
use sqlx::SqlitePool;

/// One audit entry.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    /// Subsystem or reviewer that acted.
    pub actor: String,
    /// Action name, e.g. `user_flagged`, `user_confirmed`.
    pub action: String,
    /// Affected Roblox account, when applicable.
    pub roblox_user_id: Option<RobloxId>,
    /// Free-form JSON payload.
    pub details: serde_json::Value,
}

impl ActivityEntry {
    /// An entry attributed to an internal subsystem.
    pub fn system(
        action: impl Into<String>,
        roblox_user_id: Option<RobloxId>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            actor: "condoscan".to_string(),
            action: action.into(),
            roblox_user_id,
            details,
        }
    }
}

/// Repository over `activity_log`.
#[derive(Clone)]
pub struct ActivityRepository {
    pool: SqlitePool,
}

impl ActivityRepository {
    pub(super) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one entry.
    pub async fn log(&self, entry: &ActivityEntry) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO activity_log (actor, action, roblox_user_id, details, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(entry.roblox_user_id.map(|id| id.get() as i64))
        .bind(entry.details.to_string())
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count entries for an action.
    #[allow(dead_code)] // test inspection
    pub async fn count_action(&self, action: &str) -> Result<u64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM activity_log WHERE action = ?")
                .bind(action)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn log_and_count() {
        let activity = Database::new(":memory:").await.unwrap().activity();
        activity
            .log(&ActivityEntry::system(
                "user_flagged",
                Some(RobloxId(5)),
                serde_json::json!({"confidence": 0.9}),
            ))
            .await
            .unwrap();
        assert_eq!(activity.count_action("user_flagged").await.unwrap(), 1);
        assert_eq!(activity.count_action("user_cleared").await.unwrap(), 0);
    }
}
