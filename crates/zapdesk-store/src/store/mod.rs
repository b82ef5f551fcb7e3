//! SQLite-backed persistence for the CRM.
//!
//! Split into focused submodules:
//! - `profiles`: organizations, users, API tokens
//! - `accounts`: linked WhatsApp numbers and their connection status
//! - `chats`: conversation CRUD, visibility scopes, jid maintenance
//! - `messages`: message history
//! - `contacts`: per-organization contact book
//! - `tokens`: invite links and reconnection tokens
//! - `rules`: keyword rules, hits, reports
//! - `analytics`: dashboard aggregates

mod accounts;
mod analytics;
mod chats;
mod contacts;
mod messages;
mod profiles;
mod rules;
mod tokens;

pub use chats::ChatScope;
pub use profiles::hash_token;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;
use zapdesk_core::{config::StoreConfig, error::ZapdeskError, shellexpand};

/// Timestamp format SQLite's `datetime('now')` produces.
const SQL_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persistent store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database, running migrations on first use.
    pub async fn new(config: &StoreConfig) -> Result<Self, ZapdeskError> {
        let db_path = shellexpand(&config.db_path);

        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ZapdeskError::Store(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| ZapdeskError::Store(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| ZapdeskError::Store(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Single-connection in-memory database with the full schema.
    pub async fn open_in_memory() -> Result<Self, ZapdeskError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ZapdeskError::Store(format!("invalid db path: {e}")))?
            .foreign_keys(true);
        // The database lives as long as its only connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| ZapdeskError::Store(format!("failed to open in-memory db: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), ZapdeskError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../../migrations/001_init.sql")),
            ("002_chats", include_str!("../../migrations/002_chats.sql")),
            ("003_tokens", include_str!("../../migrations/003_tokens.sql")),
            ("004_rules", include_str!("../../migrations/004_rules.sql")),
            (
                "005_audit_log",
                include_str!("../../migrations/005_audit_log.sql"),
            ),
            (
                "006_whatsapp_session",
                include_str!("../../migrations/006_whatsapp_session.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        ZapdeskError::Store(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| ZapdeskError::Store(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    ZapdeskError::Store(format!("failed to record migration {name}: {e}"))
                })?;
        }
        Ok(())
    }
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, ZapdeskError> {
    Uuid::parse_str(s).map_err(|e| ZapdeskError::Store(format!("bad uuid '{s}' in db: {e}")))
}

pub(crate) fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, ZapdeskError> {
    s.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, ZapdeskError> {
    NaiveDateTime::parse_from_str(s, SQL_TS_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| ZapdeskError::Store(format!("bad timestamp '{s}' in db: {e}")))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, ZapdeskError> {
    s.as_deref().map(parse_ts).transpose()
}

pub(crate) fn sql_ts(dt: DateTime<Utc>) -> String {
    dt.format(SQL_TS_FORMAT).to_string()
}
