use super::*;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex as StdMutex;
use zapdesk_core::{
    events::Room,
    model::{Account, Profile, Role},
    traits::InboundMessage,
};

/// Driver whose events are injected by the test through the captured sender.
#[derive(Default)]
struct MockState {
    senders: StdMutex<HashMap<Uuid, mpsc::Sender<DriverEvent>>>,
    sent: StdMutex<Vec<(String, String)>>,
    logouts: StdMutex<Vec<Uuid>>,
    names: StdMutex<HashMap<String, String>>,
}

struct MockFactory(Arc<MockState>);

struct MockDriver {
    account_id: Uuid,
    state: Arc<MockState>,
}

#[async_trait]
impl DriverFactory for MockFactory {
    async fn create(&self, account_id: Uuid) -> Result<Box<dyn WhatsAppDriver>, ZapdeskError> {
        Ok(Box::new(MockDriver {
            account_id,
            state: self.0.clone(),
        }))
    }
}

#[async_trait]
impl WhatsAppDriver for MockDriver {
    async fn connect(&self, events: mpsc::Sender<DriverEvent>) -> Result<(), ZapdeskError> {
        self.state
            .senders
            .lock()
            .unwrap()
            .insert(self.account_id, events);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ZapdeskError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), ZapdeskError> {
        self.state.logouts.lock().unwrap().push(self.account_id);
        Ok(())
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<String, ZapdeskError> {
        self.state
            .sent
            .lock()
            .unwrap()
            .push((jid.to_string(), text.to_string()));
        Ok("3EB0TEST".to_string())
    }

    async fn contact_name(&self, jid: &str) -> Result<Option<String>, ZapdeskError> {
        Ok(self.state.names.lock().unwrap().get(jid).cloned())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    events: StdMutex<Vec<(Room, RealtimeEvent)>>,
}

impl EventPublisher for RecordingPublisher {
    fn emit(&self, room: Room, event: RealtimeEvent) {
        self.events.lock().unwrap().push((room, event));
    }
}

impl RecordingPublisher {
    fn names_in(&self, room: Room) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == room)
            .map(|(_, e)| e.name())
            .collect()
    }

    fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.name() == name)
            .count()
    }
}

struct Harness {
    manager: Arc<ConnectionManager>,
    store: Store,
    state: Arc<MockState>,
    publisher: Arc<RecordingPublisher>,
    org: Uuid,
    owner: Profile,
}

async fn harness(config: WhatsAppConfig, pairing_timeout: Duration) -> Harness {
    let store = Store::open_in_memory().await.unwrap();
    let org = store.create_organization("Acme").await.unwrap();
    let (owner, _) = store
        .create_profile(Some(org), "Maria", "maria@x.com", Role::Agent)
        .await
        .unwrap();
    let state = Arc::new(MockState::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let manager = Arc::new(
        ConnectionManager::new(
            store.clone(),
            publisher.clone(),
            Arc::new(MockFactory(state.clone())),
            &config,
        )
        .with_pairing_timeout(pairing_timeout),
    );
    Harness {
        manager,
        store,
        state,
        publisher,
        org,
        owner,
    }
}

impl Harness {
    async fn account(&self, invite_id: Option<Uuid>) -> Account {
        self.store
            .create_account(
                Uuid::new_v4(),
                "Maria - WhatsApp",
                self.org,
                self.owner.id,
                invite_id,
            )
            .await
            .unwrap()
    }

    async fn send(&self, account_id: Uuid, event: DriverEvent) {
        let tx = self
            .state
            .senders
            .lock()
            .unwrap()
            .get(&account_id)
            .cloned()
            .expect("driver connected");
        tx.send(event).await.unwrap();
    }

    async fn status(&self, account_id: Uuid) -> AccountStatus {
        self.store
            .get_account(account_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

/// Poll `check` until it holds or a second passes.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn qr(code: &str) -> DriverEvent {
    DriverEvent::Qr {
        code: code.to_string(),
        timeout: Duration::from_secs(20),
    }
}

fn inbound(chat_jid: &str, push_name: Option<&str>, text: &str) -> InboundMessage {
    InboundMessage {
        id: "ABCD1234".to_string(),
        chat_jid: chat_jid.to_string(),
        sender_jid: chat_jid.to_string(),
        push_name: push_name.map(str::to_string),
        text: text.to_string(),
        is_from_me: false,
        is_group: false,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_qr_is_cached_and_published_to_both_rooms() {
    let h = harness(WhatsAppConfig::default(), Duration::from_secs(60)).await;
    let account = h.account(None).await;
    h.manager.start(account.account_id).await.unwrap();
    assert_eq!(h.status(account.account_id).await, AccountStatus::Connecting);
    assert_eq!(
        h.manager.latest_qr(account.account_id).await.unwrap(),
        QrLookup::NotReady
    );

    h.send(account.account_id, qr("2@abc,def")).await;
    let id = account.account_id;
    let m = h.manager.clone();
    assert!(
        eventually(|| {
            let m = m.clone();
            async move { matches!(m.latest_qr(id).await, Ok(QrLookup::Ready { .. })) }
        })
        .await
    );

    let QrLookup::Ready { image, code } = h.manager.latest_qr(id).await.unwrap() else {
        panic!("qr not cached");
    };
    assert!(image.starts_with("data:image/png;base64,"));
    assert_eq!(code, "2@abc,def");
    assert_eq!(h.status(id).await, AccountStatus::QrPending);
    assert_eq!(
        h.publisher.names_in(Room::User(h.owner.id)),
        vec!["whatsapp-qr-code"]
    );
    assert_eq!(
        h.publisher.names_in(Room::Organization(h.org)),
        vec!["whatsapp-qr-code"]
    );
}

#[tokio::test]
async fn test_failed_status_write_leaves_no_connection() {
    let h = harness(WhatsAppConfig::default(), Duration::from_secs(60)).await;
    let account = h.account(None).await;
    sqlx::query(
        "CREATE TRIGGER block_status BEFORE UPDATE OF status ON whatsapp_accounts \
         BEGIN SELECT RAISE(ABORT, 'status locked'); END",
    )
    .execute(h.store.pool())
    .await
    .unwrap();

    let err = h.manager.start(account.account_id).await.unwrap_err();
    assert!(matches!(err, ZapdeskError::Store(_)), "{err:?}");
    assert!(!h.manager.is_active(account.account_id).await);
    assert_eq!(h.manager.active_count().await, 0);

    sqlx::query("DROP TRIGGER block_status")
        .execute(h.store.pool())
        .await
        .unwrap();
    h.manager.start(account.account_id).await.unwrap();
    assert!(h.manager.is_active(account.account_id).await);
    assert_eq!(h.status(account.account_id).await, AccountStatus::Connecting);
    assert!(h
        .state
        .senders
        .lock()
        .unwrap()
        .contains_key(&account.account_id));
}

#[tokio::test]
async fn test_pairing_publishes_success_once() {
    let h = harness(WhatsAppConfig::default(), Duration::from_secs(60)).await;
    let invite = h
        .store
        .create_invite(
            h.org,
            h.owner.id,
            "maria@x.com",
            "Maria",
            Role::Agent,
            chrono::Duration::hours(1),
        )
        .await
        .unwrap();
    let account = h.account(Some(invite.id)).await;
    let id = account.account_id;
    let reconnect = h
        .store
        .create_reconnect_token(id, chrono::Duration::hours(1))
        .await
        .unwrap();

    h.manager.start(id).await.unwrap();
    h.send(id, qr("2@abc")).await;
    h.send(
        id,
        DriverEvent::PairSuccess {
            phone: Some("5511988887777".into()),
        },
    )
    .await;
    h.send(
        id,
        DriverEvent::Connected {
            phone: None,
            push_name: None,
        },
    )
    .await;

    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move {
                store.get_account(id).await.unwrap().unwrap().status == AccountStatus::Connected
            }
        })
        .await
    );
    // Let the trailing Connected event drain.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = h.store.get_account(id).await.unwrap().unwrap();
    assert_eq!(stored.phone_number.as_deref(), Some("5511988887777"));
    assert_eq!(h.manager.latest_qr(id).await.unwrap(), QrLookup::NotReady);
    assert_eq!(
        h.publisher.names_in(Room::User(h.owner.id)),
        vec![
            "whatsapp-qr-code",
            "whatsapp-connected",
            "whatsapp-connection-success",
            "whatsapp-invite-success",
        ]
    );
    assert!(h
        .store
        .reconnect_token(&reconnect.token)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_pairing_window_expires_without_scan() {
    let h = harness(WhatsAppConfig::default(), Duration::from_millis(150)).await;
    let account = h.account(None).await;
    let id = account.account_id;
    h.manager.start(id).await.unwrap();
    h.send(id, qr("2@first")).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    // A rotated QR does not extend the window.
    h.send(id, qr("2@second")).await;

    let m = h.manager.clone();
    assert!(
        eventually(|| {
            let m = m.clone();
            async move { !m.is_active(id).await }
        })
        .await
    );
    assert_eq!(h.status(id).await, AccountStatus::Disconnected);
    assert_eq!(h.publisher.count("whatsapp-qr-expired"), 2);
    assert_eq!(h.manager.latest_qr(id).await.unwrap(), QrLookup::NotReady);
}

#[tokio::test]
async fn test_inbound_message_is_ingested() {
    let h = harness(WhatsAppConfig::default(), Duration::from_secs(60)).await;
    let account = h.account(None).await;
    let id = account.account_id;
    h.store
        .create_rule(h.org, "refunds", &["refund".to_string()], h.owner.id)
        .await
        .unwrap();
    h.manager.start(id).await.unwrap();
    h.send(
        id,
        DriverEvent::Connected {
            phone: Some("5511900001111".into()),
            push_name: None,
        },
    )
    .await;
    h.send(
        id,
        DriverEvent::Message(inbound(
            "5511977776666:12@s.whatsapp.net",
            Some("João"),
            "I want a REFUND",
        )),
    )
    .await;

    let store = h.store.clone();
    let org = h.org;
    assert!(
        eventually(|| {
            let store = store.clone();
            async move {
                store
                    .find_chat_by_jid(org, "5511977776666@s.whatsapp.net")
                    .await
                    .unwrap()
                    .is_some_and(|c| c.unread_count == 1)
            }
        })
        .await
    );

    let chat = h
        .store
        .find_chat_by_jid(h.org, "5511977776666@s.whatsapp.net")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chat.name, "João");
    let messages = h.store.list_messages(chat.id, 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].metadata["account_id"], id.to_string());
    assert_eq!(messages[0].metadata["account_phone"], "5511900001111");

    let contacts = h.store.list_contacts(h.org).await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].phone_number.as_deref(), Some("5511977776666"));

    let rules = h.store.list_rules(h.org).await.unwrap();
    let report = h
        .store
        .rule_report(rules[0].id, Utc::now() - chrono::Duration::days(1))
        .await
        .unwrap();
    assert_eq!(report.total_hits, 1);
    assert_eq!(h.publisher.count("new-message"), 1);

    // The reply goes out through the account that carried the chat.
    assert_eq!(
        h.manager.route_account_for_chat(&chat).await.unwrap(),
        Some(id)
    );
    h.manager
        .send_text(id, "5511977776666@s.whatsapp.net", "on it")
        .await
        .unwrap();
    assert_eq!(h.state.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_qr_lookup_is_rate_limited() {
    let config = WhatsAppConfig {
        qr_rate_limit_max: 2,
        ..Default::default()
    };
    let h = harness(config, Duration::from_secs(60)).await;
    let id = h.account(None).await.account_id;
    assert_eq!(h.manager.latest_qr(id).await.unwrap(), QrLookup::NotReady);
    assert_eq!(h.manager.latest_qr(id).await.unwrap(), QrLookup::NotReady);
    assert!(matches!(
        h.manager.latest_qr(id).await,
        Err(ZapdeskError::RateLimited(_))
    ));
}

#[tokio::test]
async fn test_logged_out_wipes_session() {
    let h = harness(WhatsAppConfig::default(), Duration::from_secs(60)).await;
    let id = h.account(None).await.account_id;
    h.manager.start(id).await.unwrap();
    h.send(
        id,
        DriverEvent::Connected {
            phone: None,
            push_name: None,
        },
    )
    .await;
    h.send(id, DriverEvent::LoggedOut).await;

    let m = h.manager.clone();
    assert!(
        eventually(|| {
            let m = m.clone();
            async move { !m.is_active(id).await }
        })
        .await
    );
    assert_eq!(h.state.logouts.lock().unwrap().as_slice(), &[id]);
    assert_eq!(h.status(id).await, AccountStatus::Disconnected);
    assert!(h.manager.send_text(id, "1@s.whatsapp.net", "x").await.is_err());
}

#[tokio::test]
async fn test_regenerate_qr_restarts_pairing() {
    let h = harness(WhatsAppConfig::default(), Duration::from_secs(60)).await;
    let id = h.account(None).await.account_id;
    h.manager.start(id).await.unwrap();
    h.manager.regenerate_qr(id).await.unwrap();

    assert!(h.manager.is_active(id).await);
    assert_eq!(h.state.logouts.lock().unwrap().as_slice(), &[id]);
    assert_eq!(h.status(id).await, AccountStatus::Connecting);
}

#[tokio::test]
async fn test_contact_names_refresh() {
    let h = harness(WhatsAppConfig::default(), Duration::from_secs(60)).await;
    let id = h.account(None).await.account_id;
    let chat = h
        .store
        .create_chat(h.org, "5511955554444", Some("5511955554444@s.whatsapp.net"), None)
        .await
        .unwrap();
    assert!(h.manager.update_existing_contact_info(h.org).await.is_err());

    h.state.names.lock().unwrap().insert(
        "5511955554444@s.whatsapp.net".to_string(),
        "Carla".to_string(),
    );
    h.manager.start(id).await.unwrap();
    h.send(
        id,
        DriverEvent::Connected {
            phone: None,
            push_name: None,
        },
    )
    .await;
    let m = h.manager.clone();
    let org = h.org;
    assert!(
        eventually(|| {
            let m = m.clone();
            async move { matches!(m.update_existing_contact_info(org).await, Ok(1)) }
        })
        .await
    );
    assert_eq!(h.store.get_chat(chat.id).await.unwrap().unwrap().name, "Carla");
}
