//! Review-user repository.
//!
//! The `reasons` column holds a JSON object keyed by the lowercase reason
//! kind; queries by reason presence use SQLite's JSON1 `json_extract`.

use super::{DbError, from_ts, opt_from_ts, opt_to_ts, to_ts};
use crate::models::{ReasonKind, Reasons, ReviewUser, UserStatus};
use chrono::Utc;
use condo_proto::RobloxId;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

/// Repository over `review_users` and `user_confirmations`.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

const USER_COLUMNS: &str = "id, name, display_name, description, created_at, reasons, confidence,
     status, last_scanned, last_updated, last_viewed, last_ban_check, engine_version, uuid";

impl UserRepository {
    pub(super) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &SqliteRow) -> Result<ReviewUser, DbError> {
        let id: i64 = row.get("id");
        let reasons_raw: String = row.get("reasons");
        let reasons: Reasons = serde_json::from_str(&reasons_raw)
            .map_err(|e| DbError::CorruptReasons(id as u64, e))?;
        let status_raw: String = row.get("status");
        let status: UserStatus = status_raw
            .parse()
            .map_err(|_| DbError::CorruptStatus(status_raw.clone()))?;
        let uuid_raw: String = row.get("uuid");

        Ok(ReviewUser {
            id: RobloxId(id as u64),
            name: row.get("name"),
            display_name: row.get("display_name"),
            description: row.get("description"),
            created_at: opt_from_ts(row.get("created_at")),
            reasons,
            confidence: row.get("confidence"),
            status,
            last_scanned: opt_from_ts(row.get("last_scanned")),
            last_updated: opt_from_ts(row.get("last_updated")),
            last_viewed: opt_from_ts(row.get("last_viewed")),
            last_ban_check: opt_from_ts(row.get("last_ban_check")),
            engine_version: row.get("engine_version"),
            uuid: Uuid::parse_str(&uuid_raw).unwrap_or_else(|_| Uuid::nil()),
        })
    }

    /// Fetch one review user.
    pub async fn get_user_by_id(&self, id: RobloxId) -> Result<Option<ReviewUser>, DbError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM review_users WHERE id = ?"
        ))
        .bind(id.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    /// Fetch a batch of review users keyed by id. Missing ids are absent.
    pub async fn get_users_by_ids(
        &self,
        ids: &[RobloxId],
    ) -> Result<HashMap<RobloxId, ReviewUser>, DbError> {
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.get_user_by_id(*id).await? {
                out.insert(*id, user);
            }
        }
        Ok(out)
    }

    /// Upsert a batch of review users in one transaction.
    pub async fn save_users(
        &self,
        users: &HashMap<RobloxId, ReviewUser>,
    ) -> Result<(), DbError> {
        if users.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for user in users.values() {
            let reasons = serde_json::to_string(&user.reasons)
                .map_err(|e| DbError::CorruptReasons(user.id.get(), e))?;
            sqlx::query(
                "INSERT INTO review_users
                   (id, name, display_name, description, created_at, reasons, confidence,
                    status, last_scanned, last_updated, last_viewed, last_ban_check,
                    engine_version, uuid)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   display_name = excluded.display_name,
                   description = excluded.description,
                   created_at = excluded.created_at,
                   reasons = excluded.reasons,
                   confidence = excluded.confidence,
                   status = excluded.status,
                   last_scanned = excluded.last_scanned,
                   last_updated = excluded.last_updated,
                   last_ban_check = excluded.last_ban_check,
                   engine_version = excluded.engine_version",
            )
            .bind(user.id.get() as i64)
            .bind(&user.name)
            .bind(&user.display_name)
            .bind(&user.description)
            .bind(opt_to_ts(user.created_at))
            .bind(reasons)
            .bind(user.confidence)
            .bind(user.status.as_str())
            .bind(opt_to_ts(user.last_scanned))
            .bind(opt_to_ts(user.last_updated))
            .bind(opt_to_ts(user.last_viewed))
            .bind(opt_to_ts(user.last_ban_check))
            .bind(&user.engine_version)
            .bind(user.uuid.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Record confirmations for flagged users. The confirmation row is the
    /// durable artifact; the status column is left to the flag decision so a
    /// later reviewer pass can distinguish auto- from human-confirmed.
    pub async fn confirm_users(
        &self,
        users: &[&ReviewUser],
        reviewer_id: u64,
    ) -> Result<(), DbError> {
        let now = to_ts(Utc::now());
        let mut tx = self.pool.begin().await?;
        for user in users {
            sqlx::query(
                "INSERT INTO user_confirmations (user_id, reviewer_id, confirmed_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT(user_id) DO UPDATE SET confirmed_at = excluded.confirmed_at",
            )
            .bind(user.id.get() as i64)
            .bind(reviewer_id as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Whether a confirmation row exists.
    #[allow(dead_code)] // test inspection
    pub async fn is_confirmed(&self, id: RobloxId) -> Result<bool, DbError> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_confirmations WHERE user_id = ?)")
                .bind(id.get() as i64)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }

    /// Page through flagged/confirmed users due a platform ban check:
    /// never checked, or last checked before `recheck_before`.
    pub async fn get_users_for_ban_check(
        &self,
        limit: u32,
        cursor: Option<RobloxId>,
        recheck_before: chrono::DateTime<Utc>,
    ) -> Result<Vec<ReviewUser>, DbError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM review_users
             WHERE status IN ('flagged', 'confirmed')
               AND (last_ban_check IS NULL OR last_ban_check < ?)
               AND id > ?
             ORDER BY id LIMIT ?"
        ))
        .bind(to_ts(recheck_before))
        .bind(cursor.map(|c| c.get() as i64).unwrap_or(0))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_user).collect()
    }

    /// Page through users *missing* a reason kind, ordered by id, starting
    /// after `cursor`.
    pub async fn get_users_without_reason(
        &self,
        kind: ReasonKind,
        limit: u32,
        cursor: Option<RobloxId>,
    ) -> Result<Vec<ReviewUser>, DbError> {
        let path = format!("$.{}", kind.as_str());
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM review_users
             WHERE json_extract(reasons, ?) IS NULL AND id > ?
             ORDER BY id LIMIT ?"
        ))
        .bind(path)
        .bind(cursor.map(|c| c.get() as i64).unwrap_or(0))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_user).collect()
    }

    /// Page through users *having* a reason kind, ordered by id, starting
    /// after `cursor`.
    pub async fn get_users_with_reason(
        &self,
        kind: ReasonKind,
        limit: u32,
        cursor: Option<RobloxId>,
    ) -> Result<Vec<ReviewUser>, DbError> {
        let path = format!("$.{}", kind.as_str());
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM review_users
             WHERE json_extract(reasons, ?) IS NOT NULL AND id > ?
             ORDER BY id LIMIT ?"
        ))
        .bind(path)
        .bind(cursor.map(|c| c.get() as i64).unwrap_or(0))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_user).collect()
    }
}
