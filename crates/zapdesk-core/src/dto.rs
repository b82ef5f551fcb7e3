//! Request and response bodies shared by the HTTP API and the pairing client.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{AccountStatus, Role};

/// Header carrying an invite token on the unauthenticated pairing endpoints.
pub const INVITE_TOKEN_HEADER: &str = "x-invite-token";

/// What a valid invite token resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteInfo {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub organization_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    /// Client-proposed id; the server may assign a different one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCreated {
    pub account_id: Uuid,
    pub name: String,
    pub status: AccountStatus,
}

/// Body of `GET /api/accounts/whatsapp/:id/qr`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// What a valid reconnection token resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectInfo {
    pub account_id: Uuid,
    pub account_name: String,
    pub phone_number: Option<String>,
    pub status: AccountStatus,
    pub organization_id: Uuid,
    pub user_id: Uuid,
}
