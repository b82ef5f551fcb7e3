//! `whatsapp-rust` implementation of `WhatsAppDriver`.
//!
//! Uses the WhatsApp Web protocol (Noise handshake + Signal encryption).
//! Pairing is done by scanning a QR code; the session is persisted per
//! account through `AccountSessionStore`.

mod message;

use crate::session_store::AccountSessionStore;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wacore::types::events::Event;
use wacore_binary::jid::Jid;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;
use zapdesk_core::{
    error::ZapdeskError,
    jid::normalize_jid,
    traits::{DriverEvent, DriverFactory, WhatsAppDriver},
};

/// Fallback QR lifetime when the protocol does not say.
const DEFAULT_QR_TIMEOUT: Duration = Duration::from_secs(20);

/// Pauses between delivery attempts of one outbound text.
const SEND_PAUSES: [Duration; 2] = [Duration::from_millis(500), Duration::from_secs(1)];

/// Try `attempt` once, then once more after each pause. Returns the protocol
/// message id, or the last failure as a `WhatsApp` error.
async fn deliver<F, Fut, E>(
    account_id: Uuid,
    jid: &str,
    pauses: &[Duration],
    mut attempt: F,
) -> Result<String, ZapdeskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, E>>,
    E: Display,
{
    let mut pauses = pauses.iter();
    let mut tries = 1;
    loop {
        let failure = match attempt().await {
            Ok(id) => {
                debug!(%account_id, jid, tries, "message {id} delivered");
                return Ok(id);
            }
            Err(e) => e,
        };
        let Some(pause) = pauses.next() else {
            warn!(%account_id, jid, tries, "delivery abandoned: {failure}");
            return Err(ZapdeskError::WhatsApp(format!(
                "delivery to {jid} failed after {tries} tries: {failure}"
            )));
        };
        debug!(%account_id, jid, tries, "delivery failed, next try in {pause:?}: {failure}");
        tokio::time::sleep(*pause).await;
        tries += 1;
    }
}

/// Builds one `whatsapp-rust` driver per account, all sharing the pool.
pub struct WhatsAppRustFactory {
    pool: SqlitePool,
    device_name: String,
}

impl WhatsAppRustFactory {
    pub fn new(pool: SqlitePool, device_name: &str) -> Self {
        Self {
            pool,
            device_name: device_name.to_string(),
        }
    }
}

#[async_trait]
impl DriverFactory for WhatsAppRustFactory {
    async fn create(&self, account_id: Uuid) -> Result<Box<dyn WhatsAppDriver>, ZapdeskError> {
        Ok(Box::new(WhatsAppRustDriver {
            account_id,
            device_name: self.device_name.clone(),
            session: AccountSessionStore::new(self.pool.clone(), account_id),
            client: Arc::new(Mutex::new(None)),
            handle: Mutex::new(None),
            push_names: Arc::new(Mutex::new(HashMap::new())),
        }))
    }
}

pub struct WhatsAppRustDriver {
    account_id: Uuid,
    device_name: String,
    session: AccountSessionStore,
    /// Client handle for sending, set once the bot is built.
    client: Arc<Mutex<Option<Arc<Client>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Push names seen on inbound messages, by normalized jid.
    push_names: Arc<Mutex<HashMap<String, String>>>,
}

#[async_trait]
impl WhatsAppDriver for WhatsAppRustDriver {
    async fn connect(&self, events: mpsc::Sender<DriverEvent>) -> Result<(), ZapdeskError> {
        let account_id = self.account_id;
        info!("whatsapp bot building for account {account_id}");

        let backend = Arc::new(self.session.clone());
        let client_store = self.client.clone();
        let push_names = self.push_names.clone();

        let mut bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_device_props(
                Some(self.device_name.clone()),
                None,
                Some(waproto::whatsapp::device_props::PlatformType::Desktop),
            )
            .on_event(move |event, client| {
                let tx = events.clone();
                let client_store = client_store.clone();
                let push_names = push_names.clone();
                async move {
                    let forwarded = match event {
                        Event::PairingQrCode { code, .. } => {
                            debug!("qr rotated for account {account_id}");
                            Some(DriverEvent::Qr {
                                code,
                                timeout: DEFAULT_QR_TIMEOUT,
                            })
                        }
                        Event::PairSuccess(success) => {
                            info!("whatsapp pairing successful for account {account_id}");
                            Some(DriverEvent::PairSuccess {
                                phone: Some(success.id.user.clone()),
                            })
                        }
                        Event::Connected(_) => {
                            info!("whatsapp connected for account {account_id}");
                            *client_store.lock().await = Some(client);
                            Some(DriverEvent::Connected {
                                phone: None,
                                push_name: None,
                            })
                        }
                        Event::Disconnected(_) => {
                            warn!("whatsapp disconnected for account {account_id}");
                            *client_store.lock().await = None;
                            Some(DriverEvent::Disconnected)
                        }
                        Event::LoggedOut(_) => {
                            warn!("whatsapp logged out for account {account_id}");
                            *client_store.lock().await = None;
                            Some(DriverEvent::LoggedOut)
                        }
                        Event::Message(msg, info) => match message::to_inbound(&msg, &info) {
                            Some(inbound) => {
                                if let (Some(name), Some(jid)) = (
                                    inbound.push_name.clone(),
                                    normalize_jid(&inbound.sender_jid),
                                ) {
                                    push_names.lock().await.insert(jid, name);
                                }
                                Some(DriverEvent::Message(inbound))
                            }
                            None => None,
                        },
                        _ => None,
                    };
                    if let Some(ev) = forwarded {
                        if tx.send(ev).await.is_err() {
                            debug!("driver events for account {account_id} dropped: receiver gone");
                        }
                    }
                }
            })
            .build()
            .await
            .map_err(|e| ZapdeskError::WhatsApp(format!("whatsapp bot build failed: {e}")))?;

        *self.client.lock().await = Some(bot.client());

        let handle = bot
            .run()
            .await
            .map_err(|e| ZapdeskError::WhatsApp(format!("whatsapp bot run failed: {e}")))?;
        *self.handle.lock().await = Some(handle);

        info!("whatsapp bot started for account {account_id}");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ZapdeskError> {
        if let Some(client) = self.client.lock().await.take() {
            client.disconnect().await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), ZapdeskError> {
        self.disconnect().await?;
        info!("wiping whatsapp session for account {}", self.account_id);
        self.session.wipe().await
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<String, ZapdeskError> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or_else(|| ZapdeskError::WhatsApp("not connected".into()))?;
        let target: Jid = jid
            .parse()
            .map_err(|e| ZapdeskError::Validation(format!("invalid jid '{jid}': {e}")))?;
        let message = waproto::whatsapp::Message {
            conversation: Some(text.to_string()),
            ..Default::default()
        };
        let (client, target, message) = (&*client, &target, &message);
        deliver(self.account_id, jid, &SEND_PAUSES, move || {
            client.send_message(target.clone(), message.clone())
        })
        .await
    }

    async fn contact_name(&self, jid: &str) -> Result<Option<String>, ZapdeskError> {
        let Some(key) = normalize_jid(jid) else {
            return Ok(None);
        };
        Ok(self.push_names.lock().await.get(&key).cloned())
    }
}
