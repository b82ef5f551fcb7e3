//! Chat CRUD, visibility scopes, and jid maintenance.

use super::{parse_opt_uuid, parse_ts, parse_uuid, Store};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    model::{Chat, Profile, Role},
};

/// Which chats a caller may list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatScope {
    All,
    Organization(Uuid),
    AssignedTo(Uuid),
}

impl ChatScope {
    pub fn for_profile(profile: &Profile) -> Self {
        match (profile.role, profile.organization_id) {
            (Role::SuperAdmin, _) => Self::All,
            (Role::Admin, Some(org)) => Self::Organization(org),
            _ => Self::AssignedTo(profile.id),
        }
    }
}

type ChatRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    i64,
    String,
);

const CHAT_COLUMNS: &str = "c.id, c.name, c.whatsapp_jid, c.assigned_agent_id, \
                            c.organization_id, c.status, c.unread_count, c.updated_at";

fn chat_from_row(row: ChatRow) -> Result<Chat, ZapdeskError> {
    let (id, name, jid, agent, org, status, unread, updated) = row;
    Ok(Chat {
        id: parse_uuid(&id)?,
        name,
        whatsapp_jid: jid,
        assigned_agent_id: parse_opt_uuid(agent)?,
        organization_id: parse_uuid(&org)?,
        status,
        unread_count: unread,
        updated_at: parse_ts(&updated)?,
    })
}

impl Store {
    /// Chats visible in `scope`, most recently active first.
    ///
    /// With `account_phone`, only chats that have traffic through that
    /// number: a message whose metadata names it, or whose sender jid is it.
    pub async fn list_chats(
        &self,
        scope: ChatScope,
        account_phone: Option<&str>,
    ) -> Result<Vec<Chat>, ZapdeskError> {
        let (scope_sql, scope_arg) = match scope {
            ChatScope::All => ("1 = 1", None),
            ChatScope::Organization(org) => ("c.organization_id = ?", Some(org.to_string())),
            ChatScope::AssignedTo(agent) => ("c.assigned_agent_id = ?", Some(agent.to_string())),
        };
        let phone_sql = if account_phone.is_some() {
            " AND EXISTS (SELECT 1 FROM messages m WHERE m.chat_id = c.id \
              AND (json_extract(m.metadata_json, '$.account_phone') = ? \
                   OR m.sender_jid LIKE ? || '@%'))"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM chats c WHERE {scope_sql}{phone_sql} \
             ORDER BY c.updated_at DESC, c.rowid DESC"
        );

        let mut query = sqlx::query_as::<sqlx::Sqlite, ChatRow>(&sql);
        if let Some(arg) = scope_arg {
            query = query.bind(arg);
        }
        if let Some(phone) = account_phone {
            query = query.bind(phone).bind(phone);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(chat_from_row).collect()
    }

    pub async fn create_chat(
        &self,
        organization_id: Uuid,
        name: &str,
        whatsapp_jid: Option<&str>,
        assigned_agent_id: Option<Uuid>,
    ) -> Result<Chat, ZapdeskError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO chats (id, name, whatsapp_jid, assigned_agent_id, organization_id) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(whatsapp_jid)
        .bind(assigned_agent_id.map(|a| a.to_string()))
        .bind(organization_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("insert chat failed: {e}")))?;

        self.get_chat(id)
            .await?
            .ok_or_else(|| ZapdeskError::Store(format!("chat {id} vanished after insert")))
    }

    pub async fn get_chat(&self, id: Uuid) -> Result<Option<Chat>, ZapdeskError> {
        let row: Option<ChatRow> =
            sqlx::query_as(&format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(chat_from_row).transpose()
    }

    pub async fn find_chat_by_jid(
        &self,
        organization_id: Uuid,
        whatsapp_jid: &str,
    ) -> Result<Option<Chat>, ZapdeskError> {
        let row: Option<ChatRow> = sqlx::query_as(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats c \
             WHERE c.organization_id = ? AND c.whatsapp_jid = ? \
             ORDER BY c.updated_at DESC LIMIT 1"
        ))
        .bind(organization_id.to_string())
        .bind(whatsapp_jid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(chat_from_row).transpose()
    }

    /// Bump `updated_at`, and the unread counter for inbound traffic.
    pub async fn touch_chat(&self, id: Uuid, inbound: bool) -> Result<(), ZapdeskError> {
        sqlx::query(
            "UPDATE chats SET updated_at = datetime('now'), \
             unread_count = unread_count + ? WHERE id = ?",
        )
        .bind(i64::from(inbound))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(())
    }

    /// Delete a chat and everything hanging off it in one transaction.
    ///
    /// Returns the number of messages that existed right before deletion, or
    /// `None` if the chat does not exist.
    pub async fn delete_chat_cascade(&self, id: Uuid) -> Result<Option<i64>, ZapdeskError> {
        let id = id.to_string();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ZapdeskError::Store(format!("begin failed: {e}")))?;

        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM chats WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        if exists.is_none() {
            return Ok(None);
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
            .bind(&id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ZapdeskError::Store(format!("count failed: {e}")))?;

        sqlx::query("DELETE FROM rule_hits WHERE chat_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ZapdeskError::Store(format!("delete rule hits failed: {e}")))?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ZapdeskError::Store(format!("delete messages failed: {e}")))?;

        sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ZapdeskError::Store(format!("delete chat failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| ZapdeskError::Store(format!("commit failed: {e}")))?;
        Ok(Some(count))
    }

    /// Zero the unread counter and mark inbound messages read.
    pub async fn mark_chat_read(&self, id: Uuid) -> Result<bool, ZapdeskError> {
        let result = sqlx::query("UPDATE chats SET unread_count = 0 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;

        sqlx::query(
            "UPDATE messages SET status = 'read' \
             WHERE chat_id = ? AND is_from_me = 0 AND status = 'sent'",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn reassign_chat(&self, id: Uuid, agent_id: Uuid) -> Result<(), ZapdeskError> {
        sqlx::query(
            "UPDATE chats SET assigned_agent_id = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(agent_id.to_string())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(())
    }

    /// Every chat in the organization that has a WhatsApp jid.
    pub async fn chats_with_jids(&self, organization_id: Uuid) -> Result<Vec<Chat>, ZapdeskError> {
        let rows: Vec<ChatRow> = sqlx::query_as(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats c \
             WHERE c.organization_id = ? AND c.whatsapp_jid IS NOT NULL"
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(chat_from_row).collect()
    }

    pub async fn set_chat_jid(&self, id: Uuid, whatsapp_jid: &str) -> Result<(), ZapdeskError> {
        sqlx::query("UPDATE chats SET whatsapp_jid = ? WHERE id = ?")
            .bind(whatsapp_jid)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(())
    }

    pub async fn set_chat_name(&self, id: Uuid, name: &str) -> Result<(), ZapdeskError> {
        sqlx::query("UPDATE chats SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(())
    }
}
