//! Database module for persistent storage.
//!
//! Provides async SQLite access using SQLx for:
//! - server membership and server info from the sync worker
//! - Discord↔Roblox connection records
//! - review users, reasons and confirmations for the flagging engine
//! - AI-flagged messages and per-user summaries
//! - the read-optimized mirror tables and the activity log
//!
//! Timestamps are stored as unix epoch seconds; reasons are stored as a JSON
//! object keyed by the lowercase reason kind.

mod activity;
mod messages;
mod mirror;
mod sync;
mod users;

pub use activity::{ActivityEntry, ActivityRepository};
pub use messages::MessageRepository;
pub use mirror::MirrorRepository;
pub use sync::SyncRepository;
pub use users::UserRepository;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt reasons column for user {0}: {1}")]
    CorruptReasons(u64, serde_json::Error),
    #[error("corrupt status column: {0}")]
    CorruptStatus(String),
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking
    /// indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Sync-path repository: members, server info, connections, scan queue.
    pub fn sync(&self) -> SyncRepository {
        SyncRepository::new(self.pool.clone())
    }

    /// Review-user repository.
    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    /// Flagged-message repository.
    pub fn messages(&self) -> MessageRepository {
        MessageRepository::new(self.pool.clone())
    }

    /// Activity log repository.
    pub fn activity(&self) -> ActivityRepository {
        ActivityRepository::new(self.pool.clone())
    }

    /// Read-optimized mirror repository.
    pub fn mirror(&self) -> MirrorRepository {
        MirrorRepository::new(self.pool.clone())
    }

    /// Run embedded migrations. Statements are idempotent, so re-running on
    /// an existing database is safe.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        const MIGRATIONS: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS server_info (
                server_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS server_members (
                server_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                joined_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (server_id, user_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_members_user ON server_members(user_id)",
            "CREATE TABLE IF NOT EXISTS scan_targets (
                user_id INTEGER PRIMARY KEY,
                last_scanned INTEGER
            )",
            "CREATE TABLE IF NOT EXISTS roblox_connections (
                discord_user_id INTEGER NOT NULL,
                roblox_user_id INTEGER NOT NULL,
                roblox_username TEXT NOT NULL,
                verified INTEGER NOT NULL,
                detected_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (discord_user_id, roblox_user_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_connections_roblox
                ON roblox_connections(roblox_user_id)",
            "CREATE TABLE IF NOT EXISTS review_users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                display_name TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                created_at INTEGER,
                reasons TEXT NOT NULL DEFAULT '{}',
                confidence REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'unflagged',
                last_scanned INTEGER,
                last_updated INTEGER,
                last_viewed INTEGER,
                last_ban_check INTEGER,
                engine_version TEXT NOT NULL DEFAULT '',
                uuid TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE IF NOT EXISTS user_confirmations (
                user_id INTEGER PRIMARY KEY,
                reviewer_id INTEGER NOT NULL,
                confirmed_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS inappropriate_messages (
                message_id INTEGER PRIMARY KEY,
                server_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                reason TEXT NOT NULL,
                confidence REAL NOT NULL,
                detected_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_inappropriate_user
                ON inappropriate_messages(user_id)",
            "CREATE TABLE IF NOT EXISTS inappropriate_user_summaries (
                user_id INTEGER PRIMARY KEY,
                reason TEXT NOT NULL,
                message_count INTEGER NOT NULL,
                last_detected INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                roblox_user_id INTEGER,
                details TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS confirmed_mirror (
                user_id INTEGER PRIMARY KEY,
                reviewer_id INTEGER NOT NULL,
                confidence REAL NOT NULL,
                confirmed_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS mixed_mirror (
                user_id INTEGER PRIMARY KEY,
                confidence REAL NOT NULL,
                added_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS flagged_groups (
                group_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL
            )",
        ];

        for statement in MIGRATIONS {
            sqlx::query(statement).execute(pool).await?;
        }

        info!("Database migrations applied");
        Ok(())
    }
}

// ============================================================================
// Timestamp helpers shared by the repositories
// ============================================================================

pub(crate) fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_ts(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

pub(crate) fn opt_to_ts(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(to_ts)
}

pub(crate) fn opt_from_ts(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.map(from_ts)
}
