//! Connection manager: one live driver per account.
//!
//! The manager owns the set of active connections, reacts to driver events
//! (QR rotation, pairing, disconnects, inbound messages), keeps the account's
//! stored status authoritative, and publishes realtime events to the owner's
//! user room and the organization room.

mod events;
mod ingest;

#[cfg(test)]
mod tests;

use crate::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;
use zapdesk_core::{
    config::WhatsAppConfig,
    error::ZapdeskError,
    events::{AccountPayload, RealtimeEvent},
    jid::{is_group_jid, phone_from_jid},
    model::{AccountStatus, Chat},
    traits::{DriverEvent, DriverFactory, EventPublisher, WhatsAppDriver},
};
use zapdesk_store::Store;

/// Driver event buffer per account.
const EVENT_BUFFER: usize = 64;

/// How far back to look for the account that last carried a chat.
const ROUTING_LOOKBACK: i64 = 20;

/// Result of a QR lookup for the polling endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrLookup {
    /// Latest QR as a PNG data-URL, with the pairing text it encodes.
    Ready { image: String, code: String },
    /// No QR generated yet (or the account is already paired).
    NotReady,
}

/// A running driver and what the manager knows about it.
pub(super) struct ActiveConnection {
    pub(super) driver: Arc<dyn WhatsAppDriver>,
    pub(super) account_name: String,
    pub(super) organization_id: Uuid,
    pub(super) user_id: Uuid,
    pub(super) invite_id: Option<Uuid>,
    /// Distinguishes this run from earlier runs of the same account.
    pub(super) generation: u64,
    /// Data-URL and pairing text of the QR on display.
    pub(super) latest_qr: Option<(String, String)>,
    pub(super) phone: Option<String>,
    pub(super) connected: bool,
    pub(super) expiry: Option<JoinHandle<()>>,
    pub(super) pump: Option<JoinHandle<()>>,
}

impl ActiveConnection {
    pub(super) fn payload(&self, account_id: Uuid) -> AccountPayload {
        AccountPayload {
            account_id,
            account_name: Some(self.account_name.clone()),
            phone_number: self.phone.clone(),
            invite_id: self.invite_id,
        }
    }
}

/// Holds every active WhatsApp connection of the process.
pub struct ConnectionManager {
    pub(super) store: Store,
    pub(super) publisher: Arc<dyn EventPublisher>,
    factory: Arc<dyn DriverFactory>,
    pub(super) pairing_timeout: Duration,
    pub(super) active: Mutex<HashMap<Uuid, ActiveConnection>>,
    qr_limiter: Mutex<RateLimiter>,
    generations: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        store: Store,
        publisher: Arc<dyn EventPublisher>,
        factory: Arc<dyn DriverFactory>,
        config: &WhatsAppConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            factory,
            pairing_timeout: Duration::from_secs(config.pairing_timeout_secs),
            active: Mutex::new(HashMap::new()),
            qr_limiter: Mutex::new(RateLimiter::new(
                config.qr_rate_limit_max,
                Duration::from_secs(config.qr_rate_limit_window_secs),
            )),
            generations: AtomicU64::new(0),
        }
    }

    /// Override the pairing window (sub-second windows in tests).
    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    /// Open a connection for `account_id`. A no-op when one is already running.
    pub async fn start(self: &Arc<Self>, account_id: Uuid) -> Result<(), ZapdeskError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| ZapdeskError::NotFound(format!("account {account_id}")))?;
        if self.is_active(account_id).await {
            return Ok(());
        }

        let driver: Arc<dyn WhatsAppDriver> = Arc::from(self.factory.create(account_id).await?);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;

        // Nothing is registered until the status write has succeeded.
        self.store
            .set_account_status(account_id, AccountStatus::Connecting)
            .await?;

        {
            let mut active = self.active.lock().await;
            if active.contains_key(&account_id) {
                return Ok(());
            }
            active.insert(
                account_id,
                ActiveConnection {
                    driver: driver.clone(),
                    account_name: account.name.clone(),
                    organization_id: account.organization_id,
                    user_id: account.user_id,
                    invite_id: account.invite_id,
                    generation,
                    latest_qr: None,
                    phone: account.phone_number.clone(),
                    connected: false,
                    expiry: None,
                    pump: None,
                },
            );
        }

        let (tx, mut rx) = mpsc::channel::<DriverEvent>(EVENT_BUFFER);
        let this = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let last = matches!(event, DriverEvent::LoggedOut);
                if let Err(e) = this.handle_driver_event(account_id, generation, event).await {
                    warn!("driver event for account {account_id} failed: {e}");
                }
                if last {
                    break;
                }
            }
        });
        if let Some(entry) = self.active.lock().await.get_mut(&account_id) {
            if entry.generation == generation {
                entry.pump = Some(pump);
            }
        }

        if let Err(e) = driver.connect(tx).await {
            warn!("whatsapp connect failed for account {account_id}: {e}");
            self.teardown(account_id, generation).await;
            self.store
                .set_account_status(account_id, AccountStatus::Disconnected)
                .await?;
            return Err(e);
        }

        info!("connection started for account {account_id}");
        Ok(())
    }

    /// Close the connection (if any) and mark the account disconnected.
    /// The stored session is kept, so a later `start` needs no new QR.
    pub async fn stop(&self, account_id: Uuid) -> Result<bool, ZapdeskError> {
        let entry = self.active.lock().await.remove(&account_id);
        self.qr_limiter.lock().await.forget(account_id);
        self.store
            .set_account_status(account_id, AccountStatus::Disconnected)
            .await?;

        let Some(entry) = entry else {
            return Ok(false);
        };
        abort_tasks(&entry);
        if let Err(e) = entry.driver.disconnect().await {
            warn!("whatsapp disconnect failed for account {account_id}: {e}");
        }
        let payload = entry.payload(account_id);
        self.emit_account(&entry, RealtimeEvent::Disconnected(payload));
        info!("connection stopped for account {account_id}");
        Ok(true)
    }

    /// Throw away the stored session and start a fresh QR pairing.
    pub async fn regenerate_qr(self: &Arc<Self>, account_id: Uuid) -> Result<(), ZapdeskError> {
        self.stop(account_id).await?;
        let driver = self.factory.create(account_id).await?;
        driver.logout().await?;
        info!("session wiped for account {account_id}, pairing again");
        self.start(account_id).await
    }

    /// Reconnect every account whose stored status is `connected`.
    pub async fn restore_connected(self: &Arc<Self>) -> Result<usize, ZapdeskError> {
        let accounts = self
            .store
            .accounts_with_status(AccountStatus::Connected)
            .await?;
        let mut restored = 0;
        for account in accounts {
            match self.start(account.account_id).await {
                Ok(()) => restored += 1,
                Err(e) => warn!("restore failed for account {}: {e}", account.account_id),
            }
        }
        info!("restored {restored} whatsapp connection(s)");
        Ok(restored)
    }

    /// Close every socket without touching stored status, so the next
    /// process start restores the same accounts.
    pub async fn shutdown(&self) {
        let entries: Vec<(Uuid, ActiveConnection)> = self.active.lock().await.drain().collect();
        for (account_id, entry) in entries {
            abort_tasks(&entry);
            if let Err(e) = entry.driver.disconnect().await {
                warn!("whatsapp disconnect failed for account {account_id}: {e}");
            }
        }
    }

    /// Latest QR for the polling endpoint, rate limited per account.
    pub async fn latest_qr(&self, account_id: Uuid) -> Result<QrLookup, ZapdeskError> {
        if !self.qr_limiter.lock().await.check(account_id, Instant::now()) {
            return Err(ZapdeskError::RateLimited(format!(
                "too many qr requests for account {account_id}"
            )));
        }
        let active = self.active.lock().await;
        Ok(match active.get(&account_id).and_then(|e| e.latest_qr.clone()) {
            Some((image, code)) => QrLookup::Ready { image, code },
            None => QrLookup::NotReady,
        })
    }

    pub async fn is_active(&self, account_id: Uuid) -> bool {
        self.active.lock().await.contains_key(&account_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Send a text through the account's socket. Returns the protocol message id.
    pub async fn send_text(
        &self,
        account_id: Uuid,
        jid: &str,
        text: &str,
    ) -> Result<String, ZapdeskError> {
        let driver = self.connected_driver(account_id).await?;
        driver.send_text(jid, text).await
    }

    /// Pick the account to reply through: the one that last carried the chat,
    /// else any connected account of the chat's organization.
    pub async fn route_account_for_chat(&self, chat: &Chat) -> Result<Option<Uuid>, ZapdeskError> {
        let history = self.store.list_messages(chat.id, ROUTING_LOOKBACK).await?;
        let active = self.active.lock().await;
        let from_history = history.iter().rev().find_map(|m| {
            m.metadata
                .get("account_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .filter(|id| active.get(id).is_some_and(|e| e.connected))
        });
        if from_history.is_some() {
            return Ok(from_history);
        }
        Ok(active
            .iter()
            .find(|(_, e)| e.connected && e.organization_id == chat.organization_id)
            .map(|(id, _)| *id))
    }

    /// Display name WhatsApp knows for `jid` on this account.
    pub async fn contact_info(
        &self,
        account_id: Uuid,
        jid: &str,
    ) -> Result<Option<String>, ZapdeskError> {
        let driver = self.connected_driver(account_id).await?;
        driver.contact_name(jid).await
    }

    /// Refresh chat and contact names of an organization from what its
    /// connected accounts know. Returns how many chats were renamed.
    pub async fn update_existing_contact_info(
        &self,
        organization_id: Uuid,
    ) -> Result<usize, ZapdeskError> {
        let drivers: Vec<Arc<dyn WhatsAppDriver>> = self
            .active
            .lock()
            .await
            .values()
            .filter(|e| e.connected && e.organization_id == organization_id)
            .map(|e| e.driver.clone())
            .collect();
        if drivers.is_empty() {
            return Err(ZapdeskError::WhatsApp(
                "no connected account in this organization".into(),
            ));
        }

        let mut updated = 0;
        for chat in self.store.chats_with_jids(organization_id).await? {
            let Some(jid) = chat.whatsapp_jid.as_deref() else {
                continue;
            };
            if is_group_jid(jid) {
                continue;
            }
            let mut name = None;
            for driver in &drivers {
                if let Ok(Some(found)) = driver.contact_name(jid).await {
                    name = Some(found);
                    break;
                }
            }
            let Some(name) = name else {
                continue;
            };
            if name == chat.name {
                continue;
            }
            self.store.set_chat_name(chat.id, &name).await?;
            let phone = phone_from_jid(jid);
            if let Err(e) = self
                .store
                .upsert_contact(organization_id, jid, &name, phone.as_deref())
                .await
            {
                warn!("contact upsert for {jid} failed: {e}");
            }
            updated += 1;
        }
        info!("updated {updated} contact name(s) for organization {organization_id}");
        Ok(updated)
    }

    async fn connected_driver(
        &self,
        account_id: Uuid,
    ) -> Result<Arc<dyn WhatsAppDriver>, ZapdeskError> {
        self.active
            .lock()
            .await
            .get(&account_id)
            .filter(|e| e.connected)
            .map(|e| e.driver.clone())
            .ok_or_else(|| ZapdeskError::WhatsApp(format!("account {account_id} not connected")))
    }

    /// Drop the entry of a failed start without emitting anything.
    async fn teardown(&self, account_id: Uuid, generation: u64) {
        let mut active = self.active.lock().await;
        if active.get(&account_id).is_some_and(|e| e.generation == generation) {
            if let Some(entry) = active.remove(&account_id) {
                abort_tasks(&entry);
            }
        }
    }

    /// Emit to the owner's room and the organization room.
    pub(super) fn emit_account(&self, entry: &ActiveConnection, event: RealtimeEvent) {
        self.publisher.emit_to_user(entry.user_id, event.clone());
        self.publisher
            .emit_to_organization(entry.organization_id, event);
    }
}

fn abort_tasks(entry: &ActiveConnection) {
    if let Some(expiry) = &entry.expiry {
        expiry.abort();
    }
    if let Some(pump) = &entry.pump {
        pump.abort();
    }
}
