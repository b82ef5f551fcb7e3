//! Pairing and reconnection flows.
//!
//! Both flows feed a `PairingTracker` from the push channel; the invite flow
//! also runs the QR poll loop as a fallback and cancels it through a shared
//! token as soon as either channel delivers.

use crate::client::PairingApi;
use crate::error::PollError;
use crate::poll::{poll_for_qr, PollSchedule};
use crate::push::{PushEvent, RoomSubscriber};
use crate::qr::QrImage;
use crate::tracker::{
    AcceptancePolicy, Channel, PairingEffect, PairingSignal, PairingState, PairingTracker,
};
use crate::wire::fold_event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zapdesk_core::{
    config::ClientConfig, dto::CreateAccountRequest, error::ZapdeskError, events::Room,
    model::AccountStatus,
};

/// Where the QR and notices end up (terminal, file, test recorder).
pub trait PairingView: Send {
    /// A new QR to display; `countdown` is visual only.
    fn show_qr(&mut self, qr: &QrImage, countdown: Duration);
    fn notify(&mut self, message: &str);
    fn connected(&mut self, account_id: Option<Uuid>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Connected { account_id: Option<Uuid> },
    /// QR window elapsed or no QR in time. The caller may retry.
    Expired,
    Failed(String),
}

/// Timing shared by both flows.
#[derive(Debug, Clone)]
pub struct FlowTiming {
    pub schedule: PollSchedule,
    pub redirect_delay: Duration,
    pub qr_countdown: Duration,
}

impl FlowTiming {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            schedule: PollSchedule::from_config(config),
            redirect_delay: config.redirect_delay(),
            qr_countdown: Duration::from_secs(config.qr_countdown_secs),
        }
    }
}

/// Invite-driven pairing: validate, subscribe, create the account, then race
/// push against poll until the phone is linked or the window closes.
pub struct PairingFlow<A> {
    api: Arc<A>,
    timing: FlowTiming,
}

impl<A: PairingApi + 'static> PairingFlow<A> {
    pub fn new(api: Arc<A>, timing: FlowTiming) -> Self {
        Self { api, timing }
    }

    pub async fn run(
        &self,
        invite_token: &str,
        push: &dyn RoomSubscriber,
        events: &mut mpsc::Receiver<PushEvent>,
        view: &mut dyn PairingView,
    ) -> Result<PairingOutcome, ZapdeskError> {
        let invite = self.api.validate_invite(invite_token).await?;
        info!("pairing for invite of {} <{}>", invite.name, invite.email);

        let mut tracker = PairingTracker::new(AcceptancePolicy {
            invite_name: Some(invite.name.clone()),
            invite_page: true,
        });
        let proposed = Uuid::new_v4();
        tracker.begin(proposed);

        push.join(Room::User(invite.user_id)).await;
        push.join(Room::Organization(invite.organization_id)).await;

        let created = self
            .api
            .create_account(&CreateAccountRequest {
                account_id: Some(proposed),
                name: Some(format!("{} - WhatsApp", invite.name)),
                invite_token: Some(invite_token.to_string()),
            })
            .await?;
        if created.account_id != proposed {
            debug!(
                "server assigned account {} instead of {proposed}",
                created.account_id
            );
        }
        tracker.adopt_server_id(created.account_id);

        let mut accept = Acceptor {
            api: self.api.as_ref(),
            token: Some(invite_token),
            done: false,
        };

        // A reused account may already be linked; no QR or success event follows.
        if created.status == AccountStatus::Connected {
            info!("account {} is already linked", created.account_id);
            let effects = tracker.handle(PairingSignal::Succeeded {
                account_id: Some(created.account_id),
                account_name: Some(created.name.clone()),
            });
            let mut last_notice = String::new();
            let cancel = CancellationToken::new();
            let mut session = Session {
                cancel: &cancel,
                view,
                accept: &mut accept,
                timing: &self.timing,
                last_notice: &mut last_notice,
            };
            if let Some(outcome) = session.apply(tracker.tracked_id(), effects).await {
                return Ok(outcome);
            }
            return Ok(PairingOutcome::Connected {
                account_id: Some(created.account_id),
            });
        }

        let cancel = CancellationToken::new();
        let (poll_tx, mut poll_rx) = mpsc::channel(1);
        let poll = {
            let api = self.api.clone();
            let schedule = self.timing.schedule.clone();
            let cancel = cancel.clone();
            let account_id = created.account_id;
            tokio::spawn(async move {
                let signal = match poll_for_qr(api.as_ref(), account_id, &schedule, &cancel).await
                {
                    Ok(Some(qr)) => PairingSignal::Qr {
                        account_id: Some(account_id),
                        account_name: None,
                        qr,
                        channel: Channel::Poll,
                    },
                    Ok(None) => return,
                    Err(PollError::TimedOut { attempts }) => {
                        PairingSignal::PollTimedOut { attempts }
                    }
                    Err(e) => PairingSignal::PollFailed(e.to_string()),
                };
                let _ = poll_tx.send(signal).await;
            })
        };

        let outcome = drive(
            &mut tracker,
            events,
            Some(&mut poll_rx),
            &cancel,
            view,
            &mut accept,
            &self.timing,
        )
        .await;

        cancel.cancel();
        let _ = poll.await;
        outcome
    }
}

/// Reconnection of a known account from a standalone token. Push channel only.
pub struct ReconnectFlow<A> {
    api: Arc<A>,
    timing: FlowTiming,
}

impl<A: PairingApi + 'static> ReconnectFlow<A> {
    pub fn new(api: Arc<A>, timing: FlowTiming) -> Self {
        Self { api, timing }
    }

    pub async fn run(
        &self,
        reconnect_token: &str,
        push: &dyn RoomSubscriber,
        events: &mut mpsc::Receiver<PushEvent>,
        view: &mut dyn PairingView,
    ) -> Result<PairingOutcome, ZapdeskError> {
        let info = self.api.validate_reconnect(reconnect_token).await?;
        info!(
            "reconnecting account {} ({})",
            info.account_name, info.account_id
        );

        let mut tracker = PairingTracker::new(AcceptancePolicy::default());
        tracker.begin(info.account_id);
        push.join(Room::User(info.user_id)).await;
        push.join(Room::Organization(info.organization_id)).await;

        self.api.regenerate_qr(reconnect_token).await?;

        let mut accept = Acceptor {
            api: self.api.as_ref(),
            token: None,
            done: false,
        };
        drive(
            &mut tracker,
            events,
            None,
            &CancellationToken::new(),
            view,
            &mut accept,
            &self.timing,
        )
        .await
    }
}

/// Marks the invite accepted at most once per flow run.
struct Acceptor<'a, A: ?Sized> {
    api: &'a A,
    token: Option<&'a str>,
    done: bool,
}

impl<A: PairingApi + ?Sized> Acceptor<'_, A> {
    async fn accept(&mut self) {
        let Some(token) = self.token else {
            return;
        };
        if self.done {
            return;
        }
        self.done = true;
        // Failure here does not undo a linked phone.
        if let Err(e) = self.api.accept_invite(token).await {
            warn!("marking invite accepted failed: {e}");
        }
    }
}

/// Where tracker effects are carried out for one flow run.
struct Session<'s, 'a, A: ?Sized> {
    cancel: &'s CancellationToken,
    view: &'s mut dyn PairingView,
    accept: &'s mut Acceptor<'a, A>,
    timing: &'s FlowTiming,
    last_notice: &'s mut String,
}

impl<A: PairingApi + ?Sized> Session<'_, '_, A> {
    /// Run `effects` in order. `Some` once the phone is linked.
    async fn apply(
        &mut self,
        tracked_id: Option<Uuid>,
        effects: Vec<PairingEffect>,
    ) -> Option<PairingOutcome> {
        for effect in effects {
            match effect {
                PairingEffect::StopPolling => self.cancel.cancel(),
                PairingEffect::ShowQr(qr) => self.view.show_qr(&qr, self.timing.qr_countdown),
                PairingEffect::MarkInviteAccepted => self.accept.accept().await,
                PairingEffect::Notify(message) => {
                    self.view.notify(&message);
                    *self.last_notice = message;
                }
                PairingEffect::Redirect => {
                    info!("whatsapp linked for account {tracked_id:?}");
                    self.view.connected(tracked_id);
                    tokio::time::sleep(self.timing.redirect_delay).await;
                    return Some(PairingOutcome::Connected {
                        account_id: tracked_id,
                    });
                }
            }
        }
        None
    }
}

async fn drive<A: PairingApi + ?Sized>(
    tracker: &mut PairingTracker,
    events: &mut mpsc::Receiver<PushEvent>,
    mut poll_rx: Option<&mut mpsc::Receiver<PairingSignal>>,
    cancel: &CancellationToken,
    view: &mut dyn PairingView,
    accept: &mut Acceptor<'_, A>,
    timing: &FlowTiming,
) -> Result<PairingOutcome, ZapdeskError> {
    let mut last_notice = String::new();
    let mut session = Session {
        cancel,
        view,
        accept,
        timing,
        last_notice: &mut last_notice,
    };
    loop {
        let signal = tokio::select! {
            ev = events.recv() => match ev {
                Some((name, data)) => match fold_event(&name, &data) {
                    Some(signal) => signal,
                    None => continue,
                },
                None => return Err(ZapdeskError::Pairing("push channel closed".into())),
            },
            Some(signal) = async {
                match poll_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => signal,
        };

        let effects = tracker.handle(signal);
        if let Some(outcome) = session.apply(tracker.tracked_id(), effects).await {
            return Ok(outcome);
        }

        match tracker.state() {
            PairingState::Expired => return Ok(PairingOutcome::Expired),
            PairingState::Failed => {
                return Ok(PairingOutcome::Failed(session.last_notice.clone()))
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests;
