//! Per-account `whatsapp-rust` storage backend.
//!
//! Every linked number gets its own namespace (`account_id`) in the shared
//! SQLite database, so one process can hold many independent sessions.
//! Schema lives in the store crate's `006_whatsapp_session` migration.

mod app_sync_store;
mod device_store;
mod protocol_store;
mod signal_store;

use sqlx::SqlitePool;
use uuid::Uuid;
use wacore::store::error::db_err;
use zapdesk_core::error::ZapdeskError;

type Result<T> = wacore::store::error::Result<T>;

/// Record kinds in `wa_records`.
pub(crate) mod kind {
    pub const IDENTITY: &str = "identity";
    pub const SESSION: &str = "session";
    pub const PREKEY: &str = "prekey";
    pub const SIGNED_PREKEY: &str = "signed_prekey";
    pub const SENDER_KEY: &str = "sender_key";
    pub const DEVICE_LIST: &str = "device_list";
    pub const APP_VERSION: &str = "app_version";
    pub const DEVICE: &str = "device";
    /// `wa_record_sets` kinds.
    pub const SKDM_RECIPIENTS: &str = "skdm";
    pub const FORGET_MARKS: &str = "forget";
}

/// Session backend scoped to one account.
#[derive(Clone)]
pub struct AccountSessionStore {
    pool: SqlitePool,
    account_id: String,
}

impl AccountSessionStore {
    pub fn new(pool: SqlitePool, account_id: Uuid) -> Self {
        Self {
            pool,
            account_id: account_id.to_string(),
        }
    }

    /// Drop every session row for this account. The next connect pairs from
    /// scratch with a fresh QR.
    pub async fn wipe(&self) -> std::result::Result<(), ZapdeskError> {
        for table in [
            "wa_records",
            "wa_record_sets",
            "wa_app_sync_keys",
            "wa_mutation_macs",
            "wa_lid_mappings",
            "wa_base_keys",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE account_id = ?"))
                .bind(&self.account_id)
                .execute(&self.pool)
                .await
                .map_err(|e| ZapdeskError::Store(format!("wipe {table} failed: {e}")))?;
        }
        Ok(())
    }

    /// Whether a paired device identity is stored.
    pub async fn has_device(&self) -> std::result::Result<bool, ZapdeskError> {
        self.get_record(kind::DEVICE, "self")
            .await
            .map(|r| r.is_some())
            .map_err(|e| ZapdeskError::Store(format!("device lookup failed: {e}")))
    }

    pub(crate) async fn get_record(&self, kind: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT value FROM wa_records WHERE account_id = ? AND kind = ? AND key = ?",
        )
        .bind(&self.account_id)
        .bind(kind)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|(v,)| v))
    }

    pub(crate) async fn put_record(&self, kind: &str, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO wa_records (account_id, kind, key, value) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.account_id)
        .bind(kind)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub(crate) async fn delete_record(&self, kind: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM wa_records WHERE account_id = ? AND kind = ? AND key = ?")
            .bind(&self.account_id)
            .bind(kind)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// All `(key, value)` pairs of one kind.
    pub(crate) async fn records_of(&self, kind: &str) -> Result<Vec<(String, Vec<u8>)>> {
        sqlx::query_as("SELECT key, value FROM wa_records WHERE account_id = ? AND kind = ?")
            .bind(&self.account_id)
            .bind(kind)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    pub(crate) async fn set_members(&self, kind: &str, owner: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT member FROM wa_record_sets WHERE account_id = ? AND kind = ? AND owner = ?",
        )
        .bind(&self.account_id)
        .bind(kind)
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    pub(crate) async fn add_set_member(&self, kind: &str, owner: &str, member: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO wa_record_sets (account_id, kind, owner, member) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&self.account_id)
        .bind(kind)
        .bind(owner)
        .bind(member)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub(crate) async fn clear_set(&self, kind: &str, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM wa_record_sets WHERE account_id = ? AND kind = ? AND owner = ?")
            .bind(&self.account_id)
            .bind(kind)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
