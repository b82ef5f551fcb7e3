use crate::{
    error::ZapdeskError,
    events::{RealtimeEvent, Room},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Realtime bridge handed to route handlers and the connection service.
///
/// Emission is fire-and-forget: a failed or unobserved emit never fails the
/// operation that triggered it.
pub trait EventPublisher: Send + Sync {
    /// Push an event to everyone currently joined to `room`.
    fn emit(&self, room: Room, event: RealtimeEvent);

    fn emit_to_user(&self, user_id: Uuid, event: RealtimeEvent) {
        self.emit(Room::User(user_id), event);
    }

    fn emit_to_organization(&self, organization_id: Uuid, event: RealtimeEvent) {
        self.emit(Room::Organization(organization_id), event);
    }
}

/// Text message received on a linked number.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    /// Chat JID (the contact, or the group).
    pub chat_jid: String,
    pub sender_jid: String,
    pub push_name: Option<String>,
    pub text: String,
    pub is_from_me: bool,
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
}

/// Events a protocol driver reports for one account.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A fresh QR payload; the previous one is no longer scannable.
    Qr { code: String, timeout: Duration },
    PairSuccess { phone: Option<String> },
    Connected {
        phone: Option<String>,
        push_name: Option<String>,
    },
    Disconnected,
    /// The phone unlinked this device; the session is unusable.
    LoggedOut,
    Message(InboundMessage),
}

/// One account's WhatsApp socket. The multi-device protocol lives behind this.
#[async_trait]
pub trait WhatsAppDriver: Send + Sync {
    /// Open the socket. QR codes, pairing results, and messages arrive on `events`.
    async fn connect(&self, events: mpsc::Sender<DriverEvent>) -> Result<(), ZapdeskError>;

    /// Close the socket, keeping the session for a later `connect`.
    async fn disconnect(&self) -> Result<(), ZapdeskError>;

    /// Forget the session so the next `connect` starts a fresh QR pairing.
    async fn logout(&self) -> Result<(), ZapdeskError>;

    /// Send a text message. Returns the protocol message id.
    async fn send_text(&self, jid: &str, text: &str) -> Result<String, ZapdeskError>;

    /// Display name WhatsApp knows for `jid`, if any.
    async fn contact_name(&self, _jid: &str) -> Result<Option<String>, ZapdeskError> {
        Ok(None)
    }
}

/// Builds a driver per account.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self, account_id: Uuid) -> Result<Box<dyn WhatsAppDriver>, ZapdeskError>;
}
