//! Message history.

use super::{parse_ts, parse_uuid, Store};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    model::{Message, MessageStatus, NewMessage},
};

type MessageRow = (String, String, String, bool, String, Option<String>, String, String);

const MESSAGE_COLUMNS: &str =
    "id, chat_id, content, is_from_me, status, sender_jid, metadata_json, created_at";

fn message_from_row(row: MessageRow) -> Result<Message, ZapdeskError> {
    let (id, chat_id, content, is_from_me, status, sender_jid, metadata, created) = row;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| ZapdeskError::Store(format!("bad metadata on message {id}: {e}")))?;
    Ok(Message {
        id: parse_uuid(&id)?,
        chat_id: parse_uuid(&chat_id)?,
        content,
        is_from_me,
        status: status.parse()?,
        sender_jid,
        metadata,
        created_at: parse_ts(&created)?,
    })
}

impl Store {
    /// Oldest-first history of the last `limit` messages.
    pub async fn list_messages(
        &self,
        chat_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>, ZapdeskError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM ( \
                SELECT {MESSAGE_COLUMNS}, rowid AS seq FROM messages WHERE chat_id = ? \
                ORDER BY created_at DESC, rowid DESC LIMIT ? \
             ) ORDER BY created_at ASC, seq ASC"
        ))
        .bind(chat_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(message_from_row).collect()
    }

    pub async fn insert_message(&self, new: &NewMessage) -> Result<Message, ZapdeskError> {
        let id = Uuid::new_v4();
        let metadata = serde_json::to_string(&new.metadata)?;

        sqlx::query(
            "INSERT INTO messages (id, chat_id, content, is_from_me, status, sender_jid, metadata_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(new.chat_id.to_string())
        .bind(&new.content)
        .bind(new.is_from_me)
        .bind(new.status.as_str())
        .bind(&new.sender_jid)
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("insert message failed: {e}")))?;

        let row: MessageRow = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        message_from_row(row)
    }

    pub async fn set_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
    ) -> Result<(), ZapdeskError> {
        sqlx::query("UPDATE messages SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(())
    }

    pub async fn count_messages(&self, chat_id: Uuid) -> Result<i64, ZapdeskError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
            .bind(chat_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("count failed: {e}")))?;
        Ok(count)
    }

    /// `(is_from_me, content)` pairs, oldest first, for summarization.
    pub async fn recent_messages_for_summary(
        &self,
        chat_id: Uuid,
        limit: i64,
    ) -> Result<Vec<(bool, String)>, ZapdeskError> {
        let messages = self.list_messages(chat_id, limit).await?;
        Ok(messages
            .into_iter()
            .map(|m| (m.is_from_me, m.content))
            .collect())
    }
}
