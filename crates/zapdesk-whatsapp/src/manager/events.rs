//! Driver event handling for one account.
//!
//! Every handler first checks the event's generation against the active
//! entry; events from a replaced or stopped run are dropped.

use super::{ActiveConnection, ConnectionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zapdesk_core::{
    error::ZapdeskError,
    events::{QrCodePayload, RealtimeEvent},
    model::AccountStatus,
    qr::qr_data_url,
    traits::DriverEvent,
};

impl ConnectionManager {
    pub(super) async fn handle_driver_event(
        self: &Arc<Self>,
        account_id: Uuid,
        generation: u64,
        event: DriverEvent,
    ) -> Result<(), ZapdeskError> {
        match event {
            DriverEvent::Qr { code, timeout } => {
                self.on_qr(account_id, generation, &code, timeout).await
            }
            DriverEvent::PairSuccess { phone } => {
                self.on_paired(account_id, generation, phone).await
            }
            DriverEvent::Connected { phone, .. } => {
                self.on_paired(account_id, generation, phone).await
            }
            DriverEvent::Disconnected => self.on_disconnected(account_id, generation).await,
            DriverEvent::LoggedOut => self.on_logged_out(account_id, generation).await,
            DriverEvent::Message(inbound) => {
                self.ingest_message(account_id, inbound).await.map(|_| ())
            }
        }
    }

    async fn on_qr(
        self: &Arc<Self>,
        account_id: Uuid,
        generation: u64,
        code: &str,
        timeout: Duration,
    ) -> Result<(), ZapdeskError> {
        let data_url = qr_data_url(code)?;

        let payload = {
            let mut active = self.active.lock().await;
            let Some(entry) = current(&mut active, account_id, generation) else {
                return Ok(());
            };
            if entry.connected {
                debug!("ignoring qr for already paired account {account_id}");
                return Ok(());
            }
            entry.latest_qr = Some((data_url.clone(), code.to_string()));
            // The pairing window starts with the first QR; rotations do not extend it.
            if entry.expiry.is_none() {
                entry.expiry = Some(self.arm_expiry(account_id, generation));
            }
            (
                entry.user_id,
                entry.organization_id,
                QrCodePayload {
                    account_id,
                    account_name: Some(entry.account_name.clone()),
                    qr: None,
                    qr_code: Some(data_url),
                    code: Some(code.to_string()),
                    expires_in_secs: timeout.as_secs(),
                },
            )
        };

        self.store
            .set_account_status(account_id, AccountStatus::QrPending)
            .await?;

        let (user_id, organization_id, qr) = payload;
        let event = RealtimeEvent::QrCode(qr);
        self.publisher.emit_to_user(user_id, event.clone());
        self.publisher.emit_to_organization(organization_id, event);
        debug!("qr published for account {account_id}");
        Ok(())
    }

    fn arm_expiry(self: &Arc<Self>, account_id: Uuid, generation: u64) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let window = self.pairing_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(e) = this.expire(account_id, generation).await {
                warn!("pairing expiry for account {account_id} failed: {e}");
            }
        })
    }

    /// The pairing window elapsed without a scan.
    async fn expire(&self, account_id: Uuid, generation: u64) -> Result<(), ZapdeskError> {
        let entry = {
            let mut active = self.active.lock().await;
            let pending = current(&mut active, account_id, generation).is_some_and(|e| !e.connected);
            if pending {
                active.remove(&account_id)
            } else {
                None
            }
        };
        let Some(entry) = entry else {
            return Ok(());
        };

        info!("pairing window elapsed for account {account_id}");
        if let Some(pump) = &entry.pump {
            pump.abort();
        }
        if let Err(e) = entry.driver.disconnect().await {
            warn!("whatsapp disconnect failed for account {account_id}: {e}");
        }
        self.store
            .set_account_status(account_id, AccountStatus::Disconnected)
            .await?;
        self.emit_account(&entry, RealtimeEvent::QrExpired(entry.payload(account_id)));
        Ok(())
    }

    /// `PairSuccess` and `Connected` both land here; only the first one of a
    /// run publishes success.
    async fn on_paired(
        &self,
        account_id: Uuid,
        generation: u64,
        phone: Option<String>,
    ) -> Result<(), ZapdeskError> {
        let (first, snapshot) = {
            let mut active = self.active.lock().await;
            let Some(entry) = current(&mut active, account_id, generation) else {
                return Ok(());
            };
            if phone.is_some() && entry.phone != phone {
                entry.phone = phone.clone();
            }
            let first = !entry.connected;
            entry.connected = true;
            entry.latest_qr = None;
            if let Some(expiry) = entry.expiry.take() {
                expiry.abort();
            }
            (first, entry.payload(account_id))
        };

        if let Some(phone) = &phone {
            self.store.set_account_phone(account_id, phone).await?;
        }
        if !first {
            return Ok(());
        }

        self.store
            .set_account_status(account_id, AccountStatus::Connected)
            .await?;
        let consumed = self.store.consume_reconnect_tokens(account_id).await?;
        if consumed > 0 {
            debug!("consumed {consumed} reconnect token(s) for account {account_id}");
        }
        info!(
            "whatsapp account {account_id} connected ({})",
            snapshot.phone_number.as_deref().unwrap_or("unknown number")
        );

        let active = self.active.lock().await;
        let Some(entry) = active.get(&account_id) else {
            return Ok(());
        };
        self.emit_account(entry, RealtimeEvent::Connected(snapshot.clone()));
        self.emit_account(entry, RealtimeEvent::ConnectionSuccess(snapshot.clone()));
        if snapshot.invite_id.is_some() {
            self.emit_account(entry, RealtimeEvent::InviteSuccess(snapshot));
        }
        Ok(())
    }

    /// Socket dropped; the library reconnects on its own, so the entry stays.
    async fn on_disconnected(&self, account_id: Uuid, generation: u64) -> Result<(), ZapdeskError> {
        let payload = {
            let mut active = self.active.lock().await;
            let Some(entry) = current(&mut active, account_id, generation) else {
                return Ok(());
            };
            entry.connected = false;
            entry.payload(account_id)
        };
        self.store
            .set_account_status(account_id, AccountStatus::Disconnected)
            .await?;
        let active = self.active.lock().await;
        if let Some(entry) = active.get(&account_id) {
            self.emit_account(entry, RealtimeEvent::Disconnected(payload));
        }
        Ok(())
    }

    /// The phone unlinked this device. Runs on the pump task, so the pump is
    /// left to finish on its own.
    async fn on_logged_out(&self, account_id: Uuid, generation: u64) -> Result<(), ZapdeskError> {
        let entry = {
            let mut active = self.active.lock().await;
            if current(&mut active, account_id, generation).is_none() {
                return Ok(());
            }
            active.remove(&account_id)
        };
        let Some(entry) = entry else {
            return Ok(());
        };

        warn!("whatsapp account {account_id} was logged out from the phone");
        if let Some(expiry) = &entry.expiry {
            expiry.abort();
        }
        if let Err(e) = entry.driver.logout().await {
            warn!("session wipe failed for account {account_id}: {e}");
        }
        self.store
            .set_account_status(account_id, AccountStatus::Disconnected)
            .await?;
        self.emit_account(&entry, RealtimeEvent::Disconnected(entry.payload(account_id)));
        Ok(())
    }
}

fn current<'a>(
    active: &'a mut std::collections::HashMap<Uuid, ActiveConnection>,
    account_id: Uuid,
    generation: u64,
) -> Option<&'a mut ActiveConnection> {
    active
        .get_mut(&account_id)
        .filter(|e| e.generation == generation)
}
