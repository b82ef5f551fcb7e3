//! Invite links and standalone reconnection tokens.

use super::{parse_opt_ts, parse_ts, parse_uuid, sql_ts, Store};
use chrono::{Duration, Utc};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    model::{Invite, ReconnectToken, Role},
};

type InviteRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
);

const INVITE_COLUMNS: &str =
    "id, token, email, name, role, organization_id, user_id, expires_at, accepted_at";

fn invite_from_row(row: InviteRow) -> Result<Invite, ZapdeskError> {
    let (id, token, email, name, role, org, user, expires, accepted) = row;
    Ok(Invite {
        id: parse_uuid(&id)?,
        token,
        email,
        name,
        role: role
            .parse()
            .map_err(|e| ZapdeskError::Store(format!("invite {id}: {e}")))?,
        organization_id: parse_uuid(&org)?,
        user_id: parse_uuid(&user)?,
        expires_at: parse_ts(&expires)?,
        accepted_at: parse_opt_ts(accepted)?,
    })
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

impl Store {
    /// Create an invite for `user_id` (the profile that will own the linked
    /// number) valid for `ttl`.
    pub async fn create_invite(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        email: &str,
        name: &str,
        role: Role,
        ttl: Duration,
    ) -> Result<Invite, ZapdeskError> {
        let id = Uuid::new_v4();
        let token = new_token();
        let expires_at = Utc::now() + ttl;

        sqlx::query(
            "INSERT INTO invites (id, token, email, name, role, organization_id, user_id, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&token)
        .bind(email)
        .bind(name)
        .bind(role.as_str())
        .bind(organization_id.to_string())
        .bind(user_id.to_string())
        .bind(sql_ts(expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("insert invite failed: {e}")))?;

        let row: InviteRow =
            sqlx::query_as(&format!("SELECT {INVITE_COLUMNS} FROM invites WHERE id = ?"))
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        invite_from_row(row)
    }

    /// A valid invite: unexpired and not yet accepted.
    pub async fn invite_by_token(&self, token: &str) -> Result<Option<Invite>, ZapdeskError> {
        let row: Option<InviteRow> = sqlx::query_as(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites \
             WHERE token = ? AND accepted_at IS NULL AND datetime(expires_at) > datetime('now')"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(invite_from_row).transpose()
    }

    /// Any invite with this token, accepted or not.
    pub async fn invite_by_token_any(&self, token: &str) -> Result<Option<Invite>, ZapdeskError> {
        let row: Option<InviteRow> = sqlx::query_as(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE token = ?"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(invite_from_row).transpose()
    }

    /// Mark the invite accepted. Returns true only for the call that
    /// performed the transition; repeats are no-ops.
    pub async fn mark_invite_accepted(&self, token: &str) -> Result<bool, ZapdeskError> {
        let result = sqlx::query(
            "UPDATE invites SET accepted_at = datetime('now') \
             WHERE token = ? AND accepted_at IS NULL",
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_reconnect_token(
        &self,
        account_id: Uuid,
        ttl: Duration,
    ) -> Result<ReconnectToken, ZapdeskError> {
        let token = new_token();
        let expires_at = Utc::now() + ttl;

        sqlx::query(
            "INSERT INTO reconnect_tokens (token, account_id, expires_at) VALUES (?, ?, ?)",
        )
        .bind(&token)
        .bind(account_id.to_string())
        .bind(sql_ts(expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("insert reconnect token failed: {e}")))?;

        Ok(ReconnectToken {
            token,
            account_id,
            expires_at: parse_ts(&sql_ts(expires_at))?,
            used_at: None,
        })
    }

    /// A valid reconnection token: unexpired and unused.
    pub async fn reconnect_token(
        &self,
        token: &str,
    ) -> Result<Option<ReconnectToken>, ZapdeskError> {
        let row: Option<(String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT token, account_id, expires_at, used_at FROM reconnect_tokens \
             WHERE token = ? AND used_at IS NULL AND datetime(expires_at) > datetime('now')",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;

        row.map(|(token, account, expires, used)| {
            Ok::<_, ZapdeskError>(ReconnectToken {
                token,
                account_id: parse_uuid(&account)?,
                expires_at: parse_ts(&expires)?,
                used_at: parse_opt_ts(used)?,
            })
        })
        .transpose()
    }

    /// Burn every outstanding token for the account once it is connected
    /// again. Returns how many were burned.
    pub async fn consume_reconnect_tokens(&self, account_id: Uuid) -> Result<u64, ZapdeskError> {
        let result = sqlx::query(
            "UPDATE reconnect_tokens SET used_at = datetime('now') \
             WHERE account_id = ? AND used_at IS NULL",
        )
        .bind(account_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("update failed: {e}")))?;
        Ok(result.rows_affected())
    }
}
