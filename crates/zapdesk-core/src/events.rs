//! Realtime event vocabulary pushed to browser/CLI clients.
//!
//! Frames on the wire look like `{"event": "whatsapp-qr-code", "data": {...}}`,
//! the same envelope the dashboard already understands.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::Message;

pub const EVENT_QR_CODE: &str = "whatsapp-qr-code";
pub const EVENT_CONNECTED: &str = "whatsapp-connected";
pub const EVENT_INVITE_SUCCESS: &str = "whatsapp-invite-success";
pub const EVENT_CONNECTION_SUCCESS: &str = "whatsapp-connection-success";
pub const EVENT_DISCONNECTED: &str = "whatsapp-disconnected";
pub const EVENT_QR_EXPIRED: &str = "whatsapp-qr-expired";
pub const EVENT_NEW_MESSAGE: &str = "new-message";

/// Client-to-server room subscription frames.
pub const JOIN_USER: &str = "join-user";
pub const JOIN_ORGANIZATION: &str = "join-organization";

/// A pub/sub room. Membership is per connection and is lost on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(Uuid),
    Organization(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user-{id}"),
            Self::Organization(id) => write!(f, "org-{id}"),
        }
    }
}

/// QR payload as emitted by the server. Older emitters used `qrCode` or `code`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodePayload {
    pub account_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPayload {
    pub account_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub chat_id: Uuid,
    pub message: Message,
}

/// Every event the server pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    #[serde(rename = "whatsapp-qr-code")]
    QrCode(QrCodePayload),
    #[serde(rename = "whatsapp-connected")]
    Connected(AccountPayload),
    #[serde(rename = "whatsapp-invite-success")]
    InviteSuccess(AccountPayload),
    #[serde(rename = "whatsapp-connection-success")]
    ConnectionSuccess(AccountPayload),
    #[serde(rename = "whatsapp-disconnected")]
    Disconnected(AccountPayload),
    #[serde(rename = "whatsapp-qr-expired")]
    QrExpired(AccountPayload),
    #[serde(rename = "new-message")]
    NewMessage(NewMessagePayload),
}

impl RealtimeEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QrCode(_) => EVENT_QR_CODE,
            Self::Connected(_) => EVENT_CONNECTED,
            Self::InviteSuccess(_) => EVENT_INVITE_SUCCESS,
            Self::ConnectionSuccess(_) => EVENT_CONNECTION_SUCCESS,
            Self::Disconnected(_) => EVENT_DISCONNECTED,
            Self::QrExpired(_) => EVENT_QR_EXPIRED,
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
        }
    }

    /// Serialize into a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A frame sent by the client (`join-user`, `join-organization`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ClientFrame {
    pub fn join(room: Room) -> Self {
        let (event, id) = match room {
            Room::User(id) => (JOIN_USER, id),
            Room::Organization(id) => (JOIN_ORGANIZATION, id),
        };
        Self {
            event: event.to_string(),
            data: serde_json::Value::String(id.to_string()),
        }
    }

    /// Parse a join frame back into the room it asks for.
    pub fn as_join(&self) -> Option<Room> {
        let id = self.data.as_str().and_then(|s| Uuid::parse_str(s).ok())?;
        match self.event.as_str() {
            JOIN_USER => Some(Room::User(id)),
            JOIN_ORGANIZATION => Some(Room::Organization(id)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_envelope_uses_wire_names() {
        let id = Uuid::new_v4();
        let ev = RealtimeEvent::ConnectionSuccess(AccountPayload {
            account_id: id,
            account_name: Some("Maria - WhatsApp".into()),
            ..Default::default()
        });
        let v: serde_json::Value = serde_json::from_str(&ev.to_frame().unwrap()).unwrap();
        assert_eq!(v["event"], "whatsapp-connection-success");
        assert_eq!(v["data"]["accountId"], id.to_string());
        assert_eq!(v["data"]["accountName"], "Maria - WhatsApp");
        assert!(v["data"].get("phoneNumber").is_none());
    }

    #[test]
    fn test_qr_payload_field_names() {
        let p = QrCodePayload {
            account_id: Uuid::nil(),
            qr_code: Some("data:image/png;base64,AAAA".into()),
            ..Default::default()
        };
        let v = serde_json::to_value(RealtimeEvent::QrCode(p)).unwrap();
        assert_eq!(v["event"], EVENT_QR_CODE);
        assert_eq!(v["data"]["qrCode"], "data:image/png;base64,AAAA");
        assert!(v["data"].get("qr").is_none());
    }

    #[test]
    fn test_join_frame_roundtrip() {
        let org = Uuid::new_v4();
        let frame = ClientFrame::join(Room::Organization(org));
        assert_eq!(frame.event, "join-organization");
        assert_eq!(frame.as_join(), Some(Room::Organization(org)));

        let bogus = ClientFrame {
            event: "join-user".into(),
            data: serde_json::json!("not-a-uuid"),
        };
        assert_eq!(bogus.as_join(), None);
    }

    #[test]
    fn test_room_names() {
        let id = Uuid::nil();
        assert_eq!(
            Room::User(id).to_string(),
            "user-00000000-0000-0000-0000-000000000000"
        );
        assert!(Room::Organization(id).to_string().starts_with("org-"));
    }
}
