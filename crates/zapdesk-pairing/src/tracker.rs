//! Client-side pairing state machine.
//!
//! Pure: signals in, effects out. Two channels feed it (push events and the
//! QR poll loop) and may race; the tracker decides which signals count.
//!
//! The server may hand out an account id different from the one the client
//! proposed, so incoming events are accepted on any of several grounds (see
//! [`AcceptReason`]), not just on id.

use crate::qr::QrImage;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Connecting,
    AwaitingScan,
    /// Terminal success.
    Connected,
    /// Server-side window elapsed or no QR within the poll budget. Retryable.
    Expired,
    /// Poll loop hit a hard error. Retryable.
    Failed,
}

/// Which channel produced a QR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Push,
    Poll,
}

/// Canonical inputs, after wire names are folded (see `wire`).
#[derive(Debug, Clone, PartialEq)]
pub enum PairingSignal {
    Qr {
        account_id: Option<Uuid>,
        account_name: Option<String>,
        qr: QrImage,
        channel: Channel,
    },
    Succeeded {
        account_id: Option<Uuid>,
        account_name: Option<String>,
    },
    Expired {
        account_id: Option<Uuid>,
    },
    PollTimedOut {
        attempts: u32,
    },
    PollFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairingEffect {
    /// Display this QR and restart the visual countdown.
    ShowQr(QrImage),
    /// Cancel the poll loop.
    StopPolling,
    MarkInviteAccepted,
    /// Pairing is done; hand control back after the redirect delay.
    Redirect,
    /// User-visible notice (toast).
    Notify(String),
}

/// Why an event was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    /// The id is one the tracker is listening for.
    KnownId,
    /// Still waiting on the create call; any event may be ours.
    Connecting,
    /// Payload account name contains the invite's name.
    NameMatch,
    /// Invite-driven flows accept every event.
    InvitePage,
}

/// Extra acceptance grounds beyond id matching.
#[derive(Debug, Clone, Default)]
pub struct AcceptancePolicy {
    /// Name from the invite, matched against payload account names.
    pub invite_name: Option<String>,
    /// Accept everything while on an invite page.
    pub invite_page: bool,
}

#[derive(Debug)]
pub struct PairingTracker {
    state: PairingState,
    policy: AcceptancePolicy,
    tracked_id: Option<Uuid>,
    listening: HashSet<Uuid>,
    qr: Option<QrImage>,
}

impl PairingTracker {
    pub fn new(policy: AcceptancePolicy) -> Self {
        Self {
            state: PairingState::Idle,
            policy,
            tracked_id: None,
            listening: HashSet::new(),
            qr: None,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Image of the QR on display.
    pub fn qr(&self) -> Option<&str> {
        self.qr.as_ref().map(|q| q.image.as_str())
    }

    pub fn tracked_id(&self) -> Option<Uuid> {
        self.tracked_id
    }

    /// Start (or restart) a session for `account_id`, dropping earlier state.
    pub fn begin(&mut self, account_id: Uuid) {
        self.state = PairingState::Connecting;
        self.tracked_id = Some(account_id);
        self.listening.clear();
        self.listening.insert(account_id);
        self.qr = None;
    }

    /// Record the id the server actually assigned. The proposed one stays in
    /// the listening set.
    pub fn adopt_server_id(&mut self, account_id: Uuid) {
        self.tracked_id = Some(account_id);
        self.listening.insert(account_id);
    }

    pub fn acceptance(
        &self,
        account_id: Option<Uuid>,
        account_name: Option<&str>,
    ) -> Option<AcceptReason> {
        if let Some(id) = account_id {
            if self.listening.contains(&id) || self.tracked_id == Some(id) {
                return Some(AcceptReason::KnownId);
            }
        }
        if self.state == PairingState::Connecting {
            return Some(AcceptReason::Connecting);
        }
        if let (Some(invite), Some(name)) = (self.policy.invite_name.as_deref(), account_name) {
            let invite = invite.trim().to_lowercase();
            if !invite.is_empty() && name.to_lowercase().contains(&invite) {
                return Some(AcceptReason::NameMatch);
            }
        }
        if self.policy.invite_page {
            return Some(AcceptReason::InvitePage);
        }
        None
    }

    pub fn handle(&mut self, signal: PairingSignal) -> Vec<PairingEffect> {
        match signal {
            PairingSignal::Qr {
                account_id,
                account_name,
                qr,
                channel,
            } => {
                if self
                    .acceptance(account_id, account_name.as_deref())
                    .is_none()
                {
                    return Vec::new();
                }
                match (self.state, channel) {
                    (PairingState::Connecting, _) => {
                        self.state = PairingState::AwaitingScan;
                        self.qr = Some(qr.clone());
                        vec![PairingEffect::StopPolling, PairingEffect::ShowQr(qr)]
                    }
                    // A poll response landing after a push QR is stale.
                    (PairingState::AwaitingScan, Channel::Push) => {
                        self.qr = Some(qr.clone());
                        vec![PairingEffect::ShowQr(qr)]
                    }
                    _ => Vec::new(),
                }
            }
            PairingSignal::Succeeded {
                account_id,
                account_name,
            } => {
                if !matches!(
                    self.state,
                    PairingState::Connecting | PairingState::AwaitingScan
                ) {
                    return Vec::new();
                }
                if self
                    .acceptance(account_id, account_name.as_deref())
                    .is_none()
                {
                    return Vec::new();
                }
                if let Some(id) = account_id {
                    self.adopt_server_id(id);
                }
                self.state = PairingState::Connected;
                self.qr = None;
                let mut effects = vec![PairingEffect::StopPolling];
                if self.policy.invite_name.is_some() || self.policy.invite_page {
                    effects.push(PairingEffect::MarkInviteAccepted);
                }
                effects.push(PairingEffect::Redirect);
                effects
            }
            PairingSignal::Expired { account_id } => {
                if !matches!(
                    self.state,
                    PairingState::Connecting | PairingState::AwaitingScan
                ) || self.acceptance(account_id, None).is_none()
                {
                    return Vec::new();
                }
                self.state = PairingState::Expired;
                self.qr = None;
                vec![
                    PairingEffect::StopPolling,
                    PairingEffect::Notify("QR code expired, try again".into()),
                ]
            }
            PairingSignal::PollTimedOut { attempts } => {
                if self.state != PairingState::Connecting {
                    return Vec::new();
                }
                self.state = PairingState::Expired;
                vec![PairingEffect::Notify(format!(
                    "no QR code after {attempts} attempts, try again"
                ))]
            }
            PairingSignal::PollFailed(reason) => {
                if self.state != PairingState::Connecting {
                    return Vec::new();
                }
                self.state = PairingState::Failed;
                vec![PairingEffect::Notify(format!(
                    "could not fetch QR code: {reason}"
                ))]
            }
        }
    }
}
