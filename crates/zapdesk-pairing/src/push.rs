//! Push channel: WebSocket client for the realtime bridge.
//!
//! Room membership lives on the server side of one socket and is lost when
//! the socket drops. The channel remembers every joined room and re-sends
//! all joins on each (re)connect.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zapdesk_core::events::{ClientFrame, Room};

/// A server event: wire name plus `data` payload.
pub type PushEvent = (String, Value);

/// Room subscription, split out so flows can be driven without a socket.
#[async_trait]
pub trait RoomSubscriber: Send + Sync {
    async fn join(&self, room: Room);
}

/// Serialized join frames for `rooms`, in join order.
pub fn join_frames(rooms: &[Room]) -> Vec<String> {
    rooms
        .iter()
        .filter_map(|room| serde_json::to_string(&ClientFrame::join(*room)).ok())
        .collect()
}

pub struct PushChannel {
    rooms: Arc<Mutex<Vec<Room>>>,
    joins: mpsc::UnboundedSender<Room>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PushChannel {
    /// Connect to `url` in the background, reconnecting after `retry_delay`
    /// until closed. Server events are forwarded to `events`.
    pub fn connect(url: String, events: mpsc::Sender<PushEvent>, retry_delay: Duration) -> Self {
        let rooms = Arc::new(Mutex::new(Vec::new()));
        let (joins, joins_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            url,
            rooms.clone(),
            joins_rx,
            events,
            retry_delay,
            cancel.clone(),
        ));
        Self {
            rooms,
            joins,
            cancel,
            handle,
        }
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.rooms.lock().await.clone()
    }

    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[async_trait]
impl RoomSubscriber for PushChannel {
    async fn join(&self, room: Room) {
        let mut rooms = self.rooms.lock().await;
        if rooms.contains(&room) {
            return;
        }
        rooms.push(room);
        // Delivered right away when connected, otherwise replayed on connect.
        let _ = self.joins.send(room);
    }
}

async fn run(
    url: String,
    rooms: Arc<Mutex<Vec<Room>>>,
    mut joins: mpsc::UnboundedReceiver<Room>,
    events: mpsc::Sender<PushEvent>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                let (mut write, mut read) = ws.split();

                // Everything queued so far is covered by the full replay.
                while joins.try_recv().is_ok() {}
                let replay = join_frames(&rooms.lock().await);
                debug!("push channel connected, joining {} room(s)", replay.len());
                let mut healthy = true;
                for frame in replay {
                    if write.send(WsMessage::Text(frame)).await.is_err() {
                        healthy = false;
                        break;
                    }
                }

                while healthy {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = write.send(WsMessage::Close(None)).await;
                            return;
                        }
                        Some(room) = joins.recv() => {
                            for frame in join_frames(&[room]) {
                                if write.send(WsMessage::Text(frame)).await.is_err() {
                                    healthy = false;
                                }
                            }
                        }
                        msg = read.next() => match msg {
                            Some(Ok(WsMessage::Text(text))) => forward(&text, &events).await,
                            Some(Ok(WsMessage::Close(_))) | None => {
                                info!("push channel closed by server");
                                healthy = false;
                            }
                            Some(Err(e)) => {
                                warn!("push channel error: {e}");
                                healthy = false;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
            Err(e) => warn!("push channel connect failed: {e}"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(retry_delay) => {}
        }
        debug!("push channel reconnecting");
    }
}

async fn forward(text: &str, events: &mpsc::Sender<PushEvent>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!("ignoring malformed push frame: {e}");
            return;
        }
    };
    let Some(name) = frame.get("event").and_then(Value::as_str) else {
        return;
    };
    let data = frame.get("data").cloned().unwrap_or(Value::Null);
    let _ = events.send((name.to_string(), data)).await;
}
