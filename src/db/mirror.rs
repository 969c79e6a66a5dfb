//! Read-optimized mirror tables for external consumers.
//!
//! Mirror writes are advisory: failures are logged by callers and never fail
//! the flagging write that produced them.

use super::{DbError, to_ts};
use crate::models::ReviewUser;
use chrono::Utc;
use condo_proto::RobloxId;
use sqlx::SqlitePool;

/// The `UserFlags` facade over `confirmed_mirror` and `mixed_mirror`.
#[derive(Clone)]
pub struct MirrorRepository {
    pool: SqlitePool,
}

impl MirrorRepository {
    pub(super) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add a user to the confirmed mirror set.
    pub async fn add_confirmed(
        &self,
        user: &ReviewUser,
        reviewer_id: u64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO confirmed_mirror (user_id, reviewer_id, confidence, confirmed_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
               reviewer_id = excluded.reviewer_id,
               confidence = excluded.confidence,
               confirmed_at = excluded.confirmed_at",
        )
        .bind(user.id.get() as i64)
        .bind(reviewer_id as i64)
        .bind(user.confidence)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Add a user to the mixed mirror set.
    pub async fn add_mixed(&self, user: &ReviewUser) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO mixed_mirror (user_id, confidence, added_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
               confidence = excluded.confidence,
               added_at = excluded.added_at",
        )
        .bind(user.id.get() as i64)
        .bind(user.confidence)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether a user is in the confirmed mirror.
    #[allow(dead_code)] // test inspection
    pub async fn is_confirmed(&self, id: RobloxId) -> Result<bool, DbError> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM confirmed_mirror WHERE user_id = ?)")
                .bind(id.get() as i64)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }

    /// Whether a user is in the mixed mirror.
    #[allow(dead_code)] // test inspection
    pub async fn is_mixed(&self, id: RobloxId) -> Result<bool, DbError> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM mixed_mirror WHERE user_id = ?)")
                .bind(id.get() as i64)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }
}
