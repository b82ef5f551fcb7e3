//! Audit log for destructive and maintenance actions (chat deletion,
//! contact transfers, jid repair, account disconnects).

use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;
use zapdesk_core::error::ZapdeskError;

/// An entry to write to the audit log.
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub action: String,
    pub target: String,
    pub detail: Option<String>,
    pub status: AuditStatus,
}

pub enum AuditStatus {
    Ok,
    Error,
    Denied,
}

impl AuditStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Denied => "denied",
        }
    }
}

/// Audit logger backed by SQLite.
#[derive(Clone)]
pub struct AuditLogger {
    pool: SqlitePool,
}

impl AuditLogger {
    /// Create a new audit logger sharing the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, entry: &AuditEntry) -> Result<(), ZapdeskError> {
        sqlx::query(
            "INSERT INTO audit_log (id, actor_id, organization_id, action, target, detail, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entry.actor_id.to_string())
        .bind(entry.organization_id.map(|o| o.to_string()))
        .bind(&entry.action)
        .bind(&entry.target)
        .bind(&entry.detail)
        .bind(entry.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("audit log write failed: {e}")))?;

        debug!(
            "audit: {} {} {} [{}]",
            entry.actor_id,
            entry.action,
            entry.target,
            entry.status.as_str()
        );
        Ok(())
    }

    /// Latest `(action, target, status)` triples for an organization.
    pub async fn recent(
        &self,
        organization_id: Uuid,
        limit: i64,
    ) -> Result<Vec<(String, String, String)>, ZapdeskError> {
        sqlx::query_as(
            "SELECT action, target, status FROM audit_log WHERE organization_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(organization_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("audit log read failed: {e}")))
    }
}
