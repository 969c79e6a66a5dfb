//! Flagged-message repository.

use super::{DbError, to_ts};
use crate::models::{InappropriateMessage, UserSummary};
use sqlx::SqlitePool;

/// Repository over `inappropriate_messages` and the per-user summaries.
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub(super) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append-only batch write of flagged messages. Re-detections refresh
    /// `updated_at` but keep the original detection time.
    pub async fn batch_store_inappropriate_messages(
        &self,
        messages: &[InappropriateMessage],
    ) -> Result<(), DbError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for msg in messages {
            sqlx::query(
                "INSERT INTO inappropriate_messages
                   (message_id, server_id, user_id, content, reason, confidence,
                    detected_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(message_id) DO UPDATE SET
                   reason = excluded.reason,
                   confidence = excluded.confidence,
                   updated_at = excluded.updated_at",
            )
            .bind(msg.message_id.get() as i64)
            .bind(msg.server_id.get() as i64)
            .bind(msg.user_id.get() as i64)
            .bind(&msg.content)
            .bind(&msg.reason)
            .bind(msg.confidence)
            .bind(to_ts(msg.detected_at))
            .bind(to_ts(msg.updated_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert per-user summaries to the latest AI aggregate.
    pub async fn batch_update_user_summaries(
        &self,
        summaries: &[UserSummary],
    ) -> Result<(), DbError> {
        if summaries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for summary in summaries {
            sqlx::query(
                "INSERT INTO inappropriate_user_summaries
                   (user_id, reason, message_count, last_detected, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(user_id) DO UPDATE SET
                   reason = excluded.reason,
                   message_count = excluded.message_count,
                   last_detected = excluded.last_detected,
                   updated_at = excluded.updated_at",
            )
            .bind(summary.user_id.get() as i64)
            .bind(&summary.reason)
            .bind(summary.message_count as i64)
            .bind(to_ts(summary.last_detected))
            .bind(to_ts(summary.updated_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Latest summary for a user, if any.
    #[allow(dead_code)] // test inspection
    pub async fn get_user_summary(
        &self,
        user: condo_proto::UserId,
    ) -> Result<Option<UserSummary>, DbError> {
        let row: Option<(i64, String, i64, i64, i64)> = sqlx::query_as(
            "SELECT user_id, reason, message_count, last_detected, updated_at
             FROM inappropriate_user_summaries WHERE user_id = ?",
        )
        .bind(user.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, reason, count, detected, updated)| UserSummary {
            user_id: condo_proto::UserId(user_id as u64),
            reason,
            message_count: count as u64,
            last_detected: super::from_ts(detected),
            updated_at: super::from_ts(updated),
        }))
    }

    /// Count of stored flagged messages for a user.
    #[allow(dead_code)] // test inspection
    pub async fn count_for_user(&self, user: condo_proto::UserId) -> Result<u64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inappropriate_messages WHERE user_id = ?")
                .bind(user.get() as i64)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}
