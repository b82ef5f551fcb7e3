//! Domain records shared by the store, the connection service, and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ZapdeskError;

/// Caller role inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Agent => "agent",
        }
    }

    /// Admins and super-admins manage an organization; agents only work chats.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::SuperAdmin | Self::Admin)
    }
}

impl FromStr for Role {
    type Err = ZapdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Self::SuperAdmin),
            "admin" => Ok(Self::Admin),
            "agent" => Ok(Self::Agent),
            other => Err(ZapdeskError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Authoritative connection state of a WhatsApp account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Connecting,
    QrPending,
    Connected,
    Disconnected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::QrPending => "qr_pending",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = ZapdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connecting" => Ok(Self::Connecting),
            "qr_pending" => Ok(Self::QrPending),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(ZapdeskError::Store(format!(
                "unknown account status '{other}'"
            ))),
        }
    }
}

/// A WhatsApp number linked (or being linked) to an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub name: String,
    pub phone_number: Option<String>,
    pub status: AccountStatus,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    /// Set when the account was created through an invite link.
    pub invite_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A conversation with one WhatsApp contact or group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub name: String,
    pub whatsapp_jid: Option<String>,
    pub assigned_agent_id: Option<Uuid>,
    pub organization_id: Uuid,
    pub status: String,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = ZapdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(ZapdeskError::Store(format!(
                "unknown message status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub content: String,
    pub is_from_me: bool,
    pub status: MessageStatus,
    pub sender_jid: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub content: String,
    pub is_from_me: bool,
    pub status: MessageStatus,
    pub sender_jid: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub phone_number: Option<String>,
    pub whatsapp_jid: String,
    pub updated_at: DateTime<Utc>,
}

/// An invitation for someone to join an organization and link a number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    pub token: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invite {
    /// Valid = not accepted and not past its expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.accepted_at.is_none() && self.expires_at > now
    }
}

/// Standalone token that lets an account owner re-scan a QR without logging in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectToken {
    pub token: String,
    pub account_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl ReconnectToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

/// Keyword monitoring rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub keywords: Vec<String>,
    pub active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// Keywords found in `text`, case-insensitive substring match.
    pub fn matching_keywords(&self, text: &str) -> Vec<&str> {
        let haystack = text.to_lowercase();
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleHit {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub chat_id: Uuid,
    pub message_id: Uuid,
    pub keyword: String,
    pub created_at: DateTime<Utc>,
}

/// Per-rule report: hit totals per keyword plus the latest hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleReport {
    pub rule_id: Uuid,
    pub total_hits: i64,
    pub by_keyword: Vec<KeywordCount>,
    pub recent: Vec<RuleHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordCount {
    pub keyword: String,
    pub hits: i64,
}

/// Dashboard aggregates for one organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub days: i64,
    pub chats_by_status: Vec<StatusCount>,
    pub messages_received: i64,
    pub messages_sent: i64,
    pub unread_total: i64,
    pub agents: Vec<AgentLoad>,
    pub connected_accounts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoad {
    pub agent_id: Uuid,
    pub name: String,
    pub open_chats: i64,
}
