use super::*;
use crate::poll::{QrFetcher, QrPoll};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use zapdesk_core::{
    dto::{AccountCreated, InviteInfo, ReconnectInfo},
    model::{AccountStatus, Role},
};

struct FakeApi {
    /// Id the server hands back from create_account.
    server_id: Uuid,
    /// Status create_account reports for that account.
    created_status: AccountStatus,
    organization_id: Uuid,
    user_id: Uuid,
    polls: AtomicU32,
    accepts: AtomicU32,
    regenerations: AtomicU32,
}

impl FakeApi {
    fn new() -> Self {
        Self {
            server_id: Uuid::new_v4(),
            created_status: AccountStatus::Connecting,
            organization_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            polls: AtomicU32::new(0),
            accepts: AtomicU32::new(0),
            regenerations: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl QrFetcher for FakeApi {
    async fn fetch_qr(&self, _account_id: Uuid) -> Result<QrPoll, PollError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(QrPoll::NotReady)
    }
}

#[async_trait]
impl PairingApi for FakeApi {
    async fn validate_invite(&self, token: &str) -> Result<InviteInfo, ZapdeskError> {
        if token != "abc123" {
            return Err(ZapdeskError::NotFound("invite".into()));
        }
        Ok(InviteInfo {
            name: "Maria".into(),
            email: "maria@x.com".into(),
            role: Role::Agent,
            organization_id: self.organization_id,
            user_id: self.user_id,
        })
    }

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> Result<AccountCreated, ZapdeskError> {
        Ok(AccountCreated {
            account_id: self.server_id,
            name: request.name.clone().unwrap_or_default(),
            status: self.created_status,
        })
    }

    async fn accept_invite(&self, _token: &str) -> Result<(), ZapdeskError> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn validate_reconnect(&self, _token: &str) -> Result<ReconnectInfo, ZapdeskError> {
        Ok(ReconnectInfo {
            account_id: self.server_id,
            account_name: "Maria - WhatsApp".into(),
            phone_number: Some("5511988887777".into()),
            status: AccountStatus::Disconnected,
            organization_id: self.organization_id,
            user_id: self.user_id,
        })
    }

    async fn regenerate_qr(&self, _token: &str) -> Result<(), ZapdeskError> {
        self.regenerations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Joins(StdMutex<Vec<Room>>);

#[async_trait]
impl RoomSubscriber for Joins {
    async fn join(&self, room: Room) {
        self.0.lock().unwrap().push(room);
    }
}

#[derive(Default)]
struct RecordingView {
    qrs: Vec<String>,
    raw_codes: Vec<Option<String>>,
    notices: Vec<String>,
    connected: Option<Option<Uuid>>,
}

impl PairingView for RecordingView {
    fn show_qr(&mut self, qr: &QrImage, _countdown: Duration) {
        self.qrs.push(qr.image.clone());
        self.raw_codes.push(qr.raw.clone());
    }

    fn notify(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    fn connected(&mut self, account_id: Option<Uuid>) {
        self.connected = Some(account_id);
    }
}

fn timing(initial_delay_ms: u64, max_attempts: u32) -> FlowTiming {
    FlowTiming {
        schedule: PollSchedule {
            initial_delay: Duration::from_millis(initial_delay_ms),
            fast_interval: Duration::from_millis(2),
            fast_attempts: 2,
            slow_interval: Duration::from_millis(4),
            max_attempts,
        },
        redirect_delay: Duration::from_millis(5),
        qr_countdown: Duration::from_secs(120),
    }
}

const QR: &str = "data:image/png;base64,QQ==";

#[tokio::test]
async fn test_push_qr_stops_polling_before_first_attempt() {
    let api = Arc::new(FakeApi::new());
    let server_id = api.server_id;
    let flow = PairingFlow::new(api.clone(), timing(150, 45));
    let (tx, mut rx) = mpsc::channel(8);

    tx.send((
        "whatsapp-qr-code".into(),
        json!({ "accountId": server_id.to_string(), "qrCode": QR }),
    ))
    .await
    .unwrap();

    let sender = tx.clone();
    let api_watch = api.clone();
    let script = tokio::spawn(async move {
        // Well past the poll loop's initial delay.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let polls = api_watch.polls.load(Ordering::SeqCst);
        sender
            .send((
                "whatsapp-connection-success".into(),
                json!({ "accountId": server_id.to_string(), "accountName": "Maria - WhatsApp" }),
            ))
            .await
            .unwrap();
        polls
    });

    let joins = Joins::default();
    let mut view = RecordingView::default();
    let outcome = flow.run("abc123", &joins, &mut rx, &mut view).await.unwrap();

    assert_eq!(script.await.unwrap(), 0, "poll loop made requests");
    assert_eq!(
        outcome,
        PairingOutcome::Connected {
            account_id: Some(server_id)
        }
    );
    assert_eq!(view.qrs, vec![QR.to_string()]);
    assert_eq!(api.accepts.load(Ordering::SeqCst), 1);
    assert_eq!(
        joins.0.lock().unwrap().as_slice(),
        &[
            Room::User(api.user_id),
            Room::Organization(api.organization_id)
        ]
    );
}

#[tokio::test]
async fn test_duplicate_success_marks_invite_once() {
    let api = Arc::new(FakeApi::new());
    let server_id = api.server_id;
    let flow = PairingFlow::new(api.clone(), timing(1000, 45));
    let (tx, mut rx) = mpsc::channel(8);
    for name in ["whatsapp-connected", "whatsapp-invite-success"] {
        tx.send((name.into(), json!({ "accountId": server_id.to_string() })))
            .await
            .unwrap();
    }

    let mut view = RecordingView::default();
    let outcome = flow
        .run("abc123", &Joins::default(), &mut rx, &mut view)
        .await
        .unwrap();
    assert!(matches!(outcome, PairingOutcome::Connected { .. }));
    assert_eq!(api.accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_success_for_unknown_id_accepted_on_invite() {
    let api = Arc::new(FakeApi::new());
    let server_id = api.server_id;
    let flow = PairingFlow::new(api.clone(), timing(1000, 45));
    let (tx, mut rx) = mpsc::channel(8);
    // QR for the server id moves the tracker out of Connecting first.
    tx.send((
        "whatsapp-qr-code".into(),
        json!({ "accountId": server_id.to_string(), "qr": QR }),
    ))
    .await
    .unwrap();
    let recreated = Uuid::new_v4();
    tx.send((
        "whatsapp-connection-success".into(),
        json!({ "accountId": recreated.to_string(), "accountName": "Maria - WhatsApp" }),
    ))
    .await
    .unwrap();

    let mut view = RecordingView::default();
    let outcome = flow
        .run("abc123", &Joins::default(), &mut rx, &mut view)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PairingOutcome::Connected {
            account_id: Some(recreated)
        }
    );
    assert_eq!(view.connected, Some(Some(recreated)));
}

#[tokio::test]
async fn test_poll_timeout_expires_session() {
    let api = Arc::new(FakeApi::new());
    let flow = PairingFlow::new(api.clone(), timing(1, 4));
    let (_tx, mut rx) = mpsc::channel(8);

    let mut view = RecordingView::default();
    let outcome = flow
        .run("abc123", &Joins::default(), &mut rx, &mut view)
        .await
        .unwrap();
    assert_eq!(outcome, PairingOutcome::Expired);
    assert_eq!(api.polls.load(Ordering::SeqCst), 4);
    assert_eq!(view.notices.len(), 1);
    assert_eq!(api.accepts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_invite_fails_before_anything_else() {
    let api = Arc::new(FakeApi::new());
    let flow = PairingFlow::new(api.clone(), timing(1, 4));
    let (_tx, mut rx) = mpsc::channel(8);
    let joins = Joins::default();
    let err = flow
        .run("nope", &joins, &mut rx, &mut RecordingView::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ZapdeskError::NotFound(_)));
    assert!(joins.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reconnect_uses_push_only() {
    let api = Arc::new(FakeApi::new());
    let account_id = api.server_id;
    let flow = ReconnectFlow::new(api.clone(), timing(1, 4));
    let (tx, mut rx) = mpsc::channel(8);
    tx.send((
        "whatsapp-qr-code".into(),
        json!({ "accountId": account_id.to_string(), "code": "2@abc,def" }),
    ))
    .await
    .unwrap();
    tx.send((
        "whatsapp-connected".into(),
        json!({ "accountId": account_id.to_string() }),
    ))
    .await
    .unwrap();

    let mut view = RecordingView::default();
    let outcome = flow
        .run("rc-token", &Joins::default(), &mut rx, &mut view)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PairingOutcome::Connected {
            account_id: Some(account_id)
        }
    );
    assert_eq!(api.regenerations.load(Ordering::SeqCst), 1);
    assert_eq!(api.polls.load(Ordering::SeqCst), 0);
    assert_eq!(api.accepts.load(Ordering::SeqCst), 0);
    assert!(view.qrs[0].starts_with("data:image/png;base64,"));
    assert_eq!(view.raw_codes, vec![Some("2@abc,def".to_string())]);
}

#[tokio::test]
async fn test_already_linked_account_finishes_without_qr() {
    let api = Arc::new(FakeApi {
        created_status: AccountStatus::Connected,
        ..FakeApi::new()
    });
    let server_id = api.server_id;
    let flow = PairingFlow::new(api.clone(), timing(1, 4));
    let (_tx, mut rx) = mpsc::channel(8);

    let mut view = RecordingView::default();
    let outcome = flow
        .run("abc123", &Joins::default(), &mut rx, &mut view)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PairingOutcome::Connected {
            account_id: Some(server_id)
        }
    );
    assert_eq!(api.accepts.load(Ordering::SeqCst), 1);
    assert_eq!(api.polls.load(Ordering::SeqCst), 0);
    assert!(view.qrs.is_empty());
    assert_eq!(view.connected, Some(Some(server_id)));
}
