//! Realtime bridge: room-scoped pub/sub over WebSocket.
//!
//! Every socket keeps its own set of joined rooms. Clients join with
//! `join-user` / `join-organization` frames and must re-join after a
//! reconnect; nothing survives the socket.

use crate::api::ApiState;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;
use zapdesk_core::{
    events::{ClientFrame, RealtimeEvent, Room},
    model::Role,
    traits::EventPublisher,
};

const HUB_CAPACITY: usize = 1024;

/// Process-wide fan-out of `(room, event)` pairs to every open socket.
pub struct RoomHub {
    tx: broadcast::Sender<(Room, RealtimeEvent)>,
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(Room, RealtimeEvent)> {
        self.tx.subscribe()
    }

    /// Sockets currently listening.
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventPublisher for RoomHub {
    fn emit(&self, room: Room, event: RealtimeEvent) {
        debug!("emit {} to {room}", event.name());
        // No receivers is fine.
        let _ = self.tx.send((room, event));
    }
}

/// Rooms a socket may join, resolved once from its credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RoomGrant {
    /// Super-admins may join every room.
    all: bool,
    users: HashSet<Uuid>,
    organizations: HashSet<Uuid>,
}

impl RoomGrant {
    pub(crate) fn allows(&self, room: Room) -> bool {
        if self.all {
            return true;
        }
        match room {
            Room::User(id) => self.users.contains(&id),
            Room::Organization(id) => self.organizations.contains(&id),
        }
    }

    fn admit(&mut self, user_id: Uuid, organization_id: Option<Uuid>) {
        self.users.insert(user_id);
        self.organizations.extend(organization_id);
    }
}

/// Credentials accepted on the `/ws` query string.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SocketAuth {
    pub(crate) token: Option<String>,
    pub(crate) invite: Option<String>,
    pub(crate) reconnect: Option<String>,
}

pub(crate) async fn resolve_grant(state: &ApiState, auth: &SocketAuth) -> RoomGrant {
    let mut grant = RoomGrant::default();

    if let Some(token) = auth.token.as_deref() {
        match state.store.profile_by_token(token).await {
            Ok(Some(profile)) if profile.role == Role::SuperAdmin => {
                grant.all = true;
                return grant;
            }
            Ok(Some(profile)) => grant.admit(profile.id, profile.organization_id),
            Ok(None) => debug!("socket presented an unknown api token"),
            Err(e) => warn!("socket token lookup failed: {e}"),
        }
    }
    if let Some(token) = auth.invite.as_deref() {
        match state.store.invite_by_token(token).await {
            Ok(Some(invite)) => grant.admit(invite.user_id, Some(invite.organization_id)),
            Ok(None) => debug!("socket presented an unknown invite"),
            Err(e) => warn!("socket invite lookup failed: {e}"),
        }
    }
    if let Some(token) = auth.reconnect.as_deref() {
        let account = match state.store.reconnect_token(token).await {
            Ok(Some(t)) => state.store.get_account(t.account_id).await,
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match account {
            Ok(Some(account)) => grant.admit(account.user_id, Some(account.organization_id)),
            Ok(None) => debug!("socket presented an unknown reconnect token"),
            Err(e) => warn!("socket reconnect token lookup failed: {e}"),
        }
    }
    grant
}

/// `GET /ws`
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(auth): Query<SocketAuth>,
    State(state): State<ApiState>,
) -> Response {
    let grant = resolve_grant(&state, &auth).await;
    let events = state.hub.subscribe();
    ws.on_upgrade(move |socket| run_socket(socket, grant, events))
}

async fn run_socket(
    mut socket: WebSocket,
    grant: RoomGrant,
    mut events: broadcast::Receiver<(Room, RealtimeEvent)>,
) {
    let mut rooms: HashSet<Room> = HashSet::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<ClientFrame>(text.as_str()) else {
                        debug!("ignoring malformed client frame");
                        continue;
                    };
                    match frame.as_join() {
                        Some(room) if grant.allows(room) => {
                            debug!("socket joined {room}");
                            rooms.insert(room);
                        }
                        Some(room) => warn!("socket denied join of {room}"),
                        None => debug!("ignoring client event {}", frame.event),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("socket error: {e}");
                    break;
                }
            },
            published = events.recv() => match published {
                Ok((room, event)) => {
                    if !rooms.contains(&room) {
                        continue;
                    }
                    let frame = match event.to_frame() {
                        Ok(f) => f,
                        Err(e) => {
                            warn!("failed to serialize {}: {e}", event.name());
                            continue;
                        }
                    };
                    if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("socket lagged, {n} event(s) dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
