//! Organizations, user profiles, and bearer-token lookup.

use super::{parse_opt_uuid, parse_uuid, Store};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    model::{Profile, Role},
};

/// Only the SHA-256 of an API token is stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

type ProfileRow = (String, Option<String>, String, String, String);

fn profile_from_row(row: ProfileRow) -> Result<Profile, ZapdeskError> {
    let (id, org, name, email, role) = row;
    Ok(Profile {
        id: parse_uuid(&id)?,
        organization_id: parse_opt_uuid(org)?,
        name,
        email,
        role: role
            .parse()
            .map_err(|e| ZapdeskError::Store(format!("profile {id}: {e}")))?,
    })
}

impl Store {
    pub async fn create_organization(&self, name: &str) -> Result<Uuid, ZapdeskError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO organizations (id, name) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("insert organization failed: {e}")))?;
        Ok(id)
    }

    pub async fn organization_name(&self, id: Uuid) -> Result<Option<String>, ZapdeskError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT name FROM organizations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        Ok(row.map(|(n,)| n))
    }

    /// Create a profile and return it together with its plaintext API token.
    /// The token is not recoverable afterwards.
    pub async fn create_profile(
        &self,
        organization_id: Option<Uuid>,
        name: &str,
        email: &str,
        role: Role,
    ) -> Result<(Profile, String), ZapdeskError> {
        let id = Uuid::new_v4();
        let token = format!(
            "zd_{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );

        sqlx::query(
            "INSERT INTO profiles (id, organization_id, name, email, role, token_hash) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(organization_id.map(|o| o.to_string()))
        .bind(name)
        .bind(email)
        .bind(role.as_str())
        .bind(hash_token(&token))
        .execute(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("insert profile failed: {e}")))?;

        let profile = Profile {
            id,
            organization_id,
            name: name.to_string(),
            email: email.to_string(),
            role,
        };
        Ok((profile, token))
    }

    pub async fn profile_by_token(&self, token: &str) -> Result<Option<Profile>, ZapdeskError> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT id, organization_id, name, email, role FROM profiles WHERE token_hash = ?",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(profile_from_row).transpose()
    }

    pub async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, ZapdeskError> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT id, organization_id, name, email, role FROM profiles WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(profile_from_row).transpose()
    }

    pub async fn profile_by_email(&self, email: &str) -> Result<Option<Profile>, ZapdeskError> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT id, organization_id, name, email, role FROM profiles WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        row.map(profile_from_row).transpose()
    }

    pub async fn list_profiles(&self, organization_id: Uuid) -> Result<Vec<Profile>, ZapdeskError> {
        let rows: Vec<ProfileRow> = sqlx::query_as(
            "SELECT id, organization_id, name, email, role FROM profiles \
             WHERE organization_id = ? ORDER BY name",
        )
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapdeskError::Store(format!("query failed: {e}")))?;
        rows.into_iter().map(profile_from_row).collect()
    }
}
