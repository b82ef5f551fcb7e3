//! Linked WhatsApp accounts. The `status` column is the authoritative
//! connection state; clients only mirror it.

use super::{parse_opt_uuid, parse_ts, parse_uuid, Store};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    model::{Account, AccountStatus},
};

type AccountRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
);

const ACCOUNT_COLUMNS: &str = "account_id, name, phone_number, status, organization_id, \
                               user_id, invite_id, created_at, updated_at";

fn account_from_row(row: AccountRow) -> Result<Account, ZapdeskError> {
    let (id, name, phone, status, org, user, invite, created, updated) = row;
    Ok(Account {
        account_id: parse_uuid(&id)?,
        name,
        phone_number: phone,
        status: status.parse()?,
        organization_id: parse_uuid(&org)?,
        user_id: parse_uuid(&user)?,
        invite_id: parse_opt_uuid(invite)?,
        created_at: parse_ts(&created)?,
        updated_at: parse_ts(&updated)?,
    })
}

impl Store {
    pub async fn create_account(
        &self,
        account_id: Uuid,
        name: &str,
        organization_id: Uuid,
        user_id: Uuid,
        invite_id: Option<Uuid>,
    ) -> Result<Account, ZapdeskError> {
        sqlx::query(
            "INSERT INTO whatsapp_accounts \
             (account_id, name, status, organization_id, user_id, invite_id) \
             VALUES (?, ?, 'connecting', ?, ?, ?)",
        )
        .bind(account_id.to_string())
        .bind(name)
        .bind(organization_id.to_string())
        .bind(user_id.to_string())
        .bind(invite_id.map(|i| i.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("insert account failed: {e}")))?;

        self.get_account(account_id).await?.ok_or_else(|| {
            ZapdeskError::Store(format!("account {account_id} vanished after insert"))
        })
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, ZapdeskError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM whatsapp_accounts WHERE account_id = ?"
        ))
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(account_from_row).transpose()
    }

    /// The account previously created through this invite, if any.
    pub async fn account_for_invite(
        &self,
        invite_id: Uuid,
    ) -> Result<Option<Account>, ZapdeskError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM whatsapp_accounts WHERE invite_id = ? \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(invite_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(account_from_row).transpose()
    }

    pub async fn list_accounts(&self, organization_id: Uuid) -> Result<Vec<Account>, ZapdeskError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM whatsapp_accounts WHERE organization_id = ? \
             ORDER BY created_at"
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(account_from_row).collect()
    }

    pub async fn accounts_with_status(
        &self,
        status: AccountStatus,
    ) -> Result<Vec<Account>, ZapdeskError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM whatsapp_accounts WHERE status = ?"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(account_from_row).collect()
    }

    /// Returns false when the account does not exist.
    pub async fn set_account_status(
        &self,
        account_id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, ZapdeskError> {
        let result = sqlx::query(
            "UPDATE whatsapp_accounts SET status = ?, updated_at = datetime('now') \
             WHERE account_id = ?",
        )
        .bind(status.as_str())
        .bind(account_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_account_phone(
        &self,
        account_id: Uuid,
        phone_number: &str,
    ) -> Result<(), ZapdeskError> {
        sqlx::query(
            "UPDATE whatsapp_accounts SET phone_number = ?, updated_at = datetime('now') \
             WHERE account_id = ?",
        )
        .bind(phone_number)
        .bind(account_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(())
    }
}
