//! Per-organization contact book, keyed by WhatsApp jid.

use super::{parse_ts, parse_uuid, Store};
use uuid::Uuid;
use zapdesk_core::{error::ZapdeskError, model::Contact};

type ContactRow = (String, String, String, Option<String>, String, String);

fn contact_from_row(row: ContactRow) -> Result<Contact, ZapdeskError> {
    let (id, org, name, phone, jid, updated) = row;
    Ok(Contact {
        id: parse_uuid(&id)?,
        organization_id: parse_uuid(&org)?,
        name,
        phone_number: phone,
        whatsapp_jid: jid,
        updated_at: parse_ts(&updated)?,
    })
}

impl Store {
    /// Insert or refresh a contact. An existing non-empty phone number is
    /// kept when the new one is missing.
    pub async fn upsert_contact(
        &self,
        organization_id: Uuid,
        whatsapp_jid: &str,
        name: &str,
        phone_number: Option<&str>,
    ) -> Result<Contact, ZapdeskError> {
        sqlx::query(
            "INSERT INTO contacts (id, organization_id, name, phone_number, whatsapp_jid) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(organization_id, whatsapp_jid) DO UPDATE SET \
                name = excluded.name, \
                phone_number = COALESCE(excluded.phone_number, contacts.phone_number), \
                updated_at = datetime('now')",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(organization_id.to_string())
        .bind(name)
        .bind(phone_number)
        .bind(whatsapp_jid)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("upsert contact failed: {e}")))?;

        let row: ContactRow = sqlx::query_as(
            "SELECT id, organization_id, name, phone_number, whatsapp_jid, updated_at \
             FROM contacts WHERE organization_id = ? AND whatsapp_jid = ?",
        )
        .bind(organization_id.to_string())
        .bind(whatsapp_jid)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        contact_from_row(row)
    }

    pub async fn list_contacts(&self, organization_id: Uuid) -> Result<Vec<Contact>, ZapdeskError> {
        let rows: Vec<ContactRow> = sqlx::query_as(
            "SELECT id, organization_id, name, phone_number, whatsapp_jid, updated_at \
             FROM contacts WHERE organization_id = ? ORDER BY name",
        )
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(contact_from_row).collect()
    }
}
