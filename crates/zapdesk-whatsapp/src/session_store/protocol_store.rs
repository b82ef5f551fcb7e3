//! SKDM recipients, LID/PN mappings, base keys, device lists, and
//! forget-sender-key marks.

use async_trait::async_trait;
use wacore::store::error::{db_err, StoreError};
use wacore::store::traits::{DeviceListRecord, LidPnMappingEntry, ProtocolStore};

use super::{kind, AccountSessionStore, Result};

type LidRow = (String, String, i64, i64, String);

fn lid_entry((lid, phone_number, created_at, updated_at, learning_source): LidRow) -> LidPnMappingEntry {
    LidPnMappingEntry {
        lid,
        phone_number,
        created_at,
        updated_at,
        learning_source,
    }
}

#[async_trait]
impl ProtocolStore for AccountSessionStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> Result<Vec<String>> {
        self.set_members(kind::SKDM_RECIPIENTS, group_jid).await
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[String]) -> Result<()> {
        for device in device_jids {
            self.add_set_member(kind::SKDM_RECIPIENTS, group_jid, device)
                .await?;
        }
        Ok(())
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> Result<()> {
        self.clear_set(kind::SKDM_RECIPIENTS, group_jid).await
    }

    async fn get_lid_mapping(&self, lid: &str) -> Result<Option<LidPnMappingEntry>> {
        let row: Option<LidRow> = sqlx::query_as(
            "SELECT lid, phone_number, created_at, updated_at, learning_source \
             FROM wa_lid_mappings WHERE account_id = ? AND lid = ?",
        )
        .bind(&self.account_id)
        .bind(lid)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(lid_entry))
    }

    async fn get_pn_mapping(&self, phone: &str) -> Result<Option<LidPnMappingEntry>> {
        let row: Option<LidRow> = sqlx::query_as(
            "SELECT lid, phone_number, created_at, updated_at, learning_source \
             FROM wa_lid_mappings WHERE account_id = ? AND phone_number = ? \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(&self.account_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(lid_entry))
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO wa_lid_mappings \
             (account_id, lid, phone_number, created_at, updated_at, learning_source) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.account_id)
        .bind(&entry.lid)
        .bind(&entry.phone_number)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(&entry.learning_source)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_all_lid_mappings(&self) -> Result<Vec<LidPnMappingEntry>> {
        let rows: Vec<LidRow> = sqlx::query_as(
            "SELECT lid, phone_number, created_at, updated_at, learning_source \
             FROM wa_lid_mappings WHERE account_id = ?",
        )
        .bind(&self.account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(lid_entry).collect())
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO wa_base_keys (account_id, address, message_id, base_key) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&self.account_id)
        .bind(address)
        .bind(message_id)
        .bind(base_key)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> Result<bool> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT base_key FROM wa_base_keys \
             WHERE account_id = ? AND address = ? AND message_id = ?",
        )
        .bind(&self.account_id)
        .bind(address)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(matches!(row, Some((k,)) if k == current_base_key))
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM wa_base_keys WHERE account_id = ? AND address = ? AND message_id = ?",
        )
        .bind(&self.account_id)
        .bind(address)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> Result<()> {
        let data =
            serde_json::to_vec(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put_record(kind::DEVICE_LIST, &record.user, &data).await
    }

    async fn get_devices(&self, user: &str) -> Result<Option<DeviceListRecord>> {
        self.get_record(kind::DEVICE_LIST, user)
            .await?
            .map(|data| {
                serde_json::from_slice(&data).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> Result<()> {
        self.add_set_member(kind::FORGET_MARKS, group_jid, participant)
            .await
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> Result<Vec<String>> {
        let marks = self.set_members(kind::FORGET_MARKS, group_jid).await?;
        self.clear_set(kind::FORGET_MARKS, group_jid).await?;
        Ok(marks)
    }
}
