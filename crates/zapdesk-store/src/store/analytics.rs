//! Dashboard aggregates for one organization.

use super::{parse_uuid, sql_ts, Store};
use chrono::{Duration, Utc};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    model::{AgentLoad, AnalyticsOverview, StatusCount},
};

impl Store {
    /// Aggregates over the last `days` days (message counts) plus the current
    /// chat, agent, and account picture.
    pub async fn analytics_overview(
        &self,
        organization_id: Uuid,
        days: i64,
    ) -> Result<AnalyticsOverview, ZapdeskError> {
        let org = organization_id.to_string();
        let since = sql_ts(Utc::now() - Duration::days(days));

        let chats_by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM chats WHERE organization_id = ? \
             GROUP BY status ORDER BY status",
        )
        .bind(&org)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("analytics query failed: {e}")))?;

        let (received, sent): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(CASE WHEN m.is_from_me = 0 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(CASE WHEN m.is_from_me = 1 THEN 1 ELSE 0 END), 0) \
             FROM messages m JOIN chats c ON c.id = m.chat_id \
             WHERE c.organization_id = ? AND datetime(m.created_at) >= datetime(?)",
        )
        .bind(&org)
        .bind(&since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("analytics query failed: {e}")))?;

        let (unread_total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(unread_count), 0) FROM chats WHERE organization_id = ?",
        )
        .bind(&org)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("analytics query failed: {e}")))?;

        let agents: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT p.id, p.name, \
                    (SELECT COUNT(*) FROM chats c \
                     WHERE c.assigned_agent_id = p.id AND c.status != 'closed') \
             FROM profiles p WHERE p.organization_id = ? AND p.role = 'agent' \
             ORDER BY p.name",
        )
        .bind(&org)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("analytics query failed: {e}")))?;

        let (connected_accounts,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM whatsapp_accounts \
             WHERE organization_id = ? AND status = 'connected'",
        )
        .bind(&org)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("analytics query failed: {e}")))?;

        Ok(AnalyticsOverview {
            days,
            chats_by_status: chats_by_status
                .into_iter()
                .map(|(status, count)| StatusCount { status, count })
                .collect(),
            messages_received: received,
            messages_sent: sent,
            unread_total,
            agents: agents
                .into_iter()
                .map(|(id, name, open_chats)| {
                    Ok(AgentLoad {
                        agent_id: parse_uuid(&id)?,
                        name,
                        open_chats,
                    })
                })
                .collect::<Result<Vec<_>, ZapdeskError>>()?,
            connected_accounts,
        })
    }
}
