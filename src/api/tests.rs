use super::*;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use crate::realtime::{resolve_grant, SocketAuth};
use http_body_util::BodyExt;
use std::sync::Mutex as StdMutex;
use tokio::sync::mpsc;
use tower::ServiceExt;
use zapdesk_core::{
    config::WhatsAppConfig,
    events::{RealtimeEvent, Room},
    model::{MessageStatus, NewMessage},
    traits::{DriverEvent, DriverFactory, WhatsAppDriver},
};

// ---------------------------------------------------------------------------
// Driver that connects but never pairs
// ---------------------------------------------------------------------------

struct IdleDriver;

#[async_trait]
impl WhatsAppDriver for IdleDriver {
    async fn connect(&self, _events: mpsc::Sender<DriverEvent>) -> Result<(), ZapdeskError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ZapdeskError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), ZapdeskError> {
        Ok(())
    }

    async fn send_text(&self, _jid: &str, _text: &str) -> Result<String, ZapdeskError> {
        Ok("wamid-1".into())
    }
}

struct IdleFactory;

#[async_trait]
impl DriverFactory for IdleFactory {
    async fn create(&self, _account_id: Uuid) -> Result<Box<dyn WhatsAppDriver>, ZapdeskError> {
        Ok(Box::new(IdleDriver))
    }
}

/// Keeps what handlers publish.
#[derive(Default)]
struct Published(StdMutex<Vec<(Room, RealtimeEvent)>>);

impl EventPublisher for Published {
    fn emit(&self, room: Room, event: RealtimeEvent) {
        self.0.lock().unwrap().push((room, event));
    }
}

impl Published {
    fn rooms_of(&self, name: &str) -> Vec<Room> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.name() == name)
            .map(|(room, _)| *room)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    app: Router,
    state: ApiState,
    published: Arc<Published>,
    store: Store,
    org: Uuid,
    super_token: String,
    admin_token: String,
    agent: Profile,
    agent_token: String,
    other_agent_token: String,
}

async fn fixture() -> Fixture {
    let store = Store::open_in_memory().await.unwrap();
    let hub = Arc::new(RoomHub::new());
    let manager = Arc::new(ConnectionManager::new(
        store.clone(),
        hub.clone(),
        Arc::new(IdleFactory),
        &WhatsAppConfig::default(),
    ));

    let org = store.create_organization("Acme").await.unwrap();
    let (_, super_token) = store
        .create_profile(None, "Root", "root@acme.com", Role::SuperAdmin)
        .await
        .unwrap();
    let (_, admin_token) = store
        .create_profile(Some(org), "Ana", "ana@acme.com", Role::Admin)
        .await
        .unwrap();
    let (agent, agent_token) = store
        .create_profile(Some(org), "Bruno", "bruno@acme.com", Role::Agent)
        .await
        .unwrap();
    let (_, other_agent_token) = store
        .create_profile(Some(org), "Carla", "carla@acme.com", Role::Agent)
        .await
        .unwrap();

    let published = Arc::new(Published::default());
    let state = ApiState::new(
        store.clone(),
        manager,
        hub,
        published.clone(),
        None,
        TokensConfig::default(),
    );
    Fixture {
        app: build_router(state.clone(), 1024 * 1024),
        state,
        published,
        store,
        org,
        super_token,
        admin_token,
        agent,
        agent_token,
        other_agent_token,
    }
}

impl Fixture {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(v) => req
                .header("Content-Type", "application/json")
                .body(Body::from(v.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        send(&self.app, req).await
    }

    /// A chat assigned to the fixture agent, with `messages` inbound messages.
    async fn chat_with_messages(&self, messages: usize) -> Uuid {
        let chat = self
            .store
            .create_chat(
                self.org,
                "João",
                Some("5511999990000@s.whatsapp.net"),
                Some(self.agent.id),
            )
            .await
            .unwrap();
        for i in 0..messages {
            self.store
                .insert_message(&NewMessage {
                    chat_id: chat.id,
                    content: format!("msg {i}"),
                    is_from_me: false,
                    status: MessageStatus::Sent,
                    sender_jid: Some("5511999990000@s.whatsapp.net".into()),
                    metadata: json!({}),
                })
                .await
                .unwrap();
        }
        chat.id
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_is_public() {
    let f = fixture().await;
    let (status, json) = f.call(Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["active_connections"], 0);
}

#[tokio::test]
async fn test_missing_or_unknown_token_is_401() {
    let f = fixture().await;
    let (status, _) = f
        .call(Method::GET, "/api/chat-operations/chats", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = f
        .call(Method::GET, "/api/chat-operations/chats", Some("zd_nope"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "invalid token");
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_visibility_by_role() {
    let f = fixture().await;
    f.chat_with_messages(0).await;
    f.store
        .create_chat(f.org, "Unassigned", None, None)
        .await
        .unwrap();

    let count = |json: &Value| json["chats"].as_array().unwrap().len();
    let (_, json) = f
        .call(Method::GET, "/api/chat-operations/chats", Some(&f.agent_token), None)
        .await;
    assert_eq!(count(&json), 1);
    let (_, json) = f
        .call(Method::GET, "/api/chat-operations/chats", Some(&f.admin_token), None)
        .await;
    assert_eq!(count(&json), 2);
    let (_, json) = f
        .call(
            Method::GET,
            "/api/chat-operations/chats",
            Some(&f.other_agent_token),
            None,
        )
        .await;
    assert_eq!(count(&json), 0);
}

#[tokio::test]
async fn test_create_chat_validation() {
    let f = fixture().await;
    let (status, json) = f
        .call(
            Method::POST,
            "/api/chat-operations/chats",
            Some(&f.admin_token),
            Some(json!({ "name": "  " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "name is required");

    // Super-admin has no organization to put the chat in.
    let (status, _) = f
        .call(
            Method::POST,
            "/api/chat-operations/chats",
            Some(&f.super_token),
            Some(json!({ "name": "Lead" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = f
        .call(
            Method::POST,
            "/api/chat-operations/chats",
            Some(&f.agent_token),
            Some(json!({ "name": "Lead", "whatsapp_jid": "5511988887777@c.us" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["whatsapp_jid"], "5511988887777@s.whatsapp.net");
    assert_eq!(json["assigned_agent_id"], f.agent.id.to_string());
}

#[tokio::test]
async fn test_delete_chat_returns_message_count_then_404() {
    let f = fixture().await;
    let chat_id = f.chat_with_messages(3).await;
    let uri = format!("/api/chat-operations/chats/{chat_id}");

    let (status, json) = f
        .call(Method::DELETE, &uri, Some(&f.super_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted_messages"], 3);
    assert_eq!(json["chat_id"], chat_id.to_string());
    assert_eq!(f.store.count_messages(chat_id).await.unwrap(), 0);

    let (status, _) = f
        .call(
            Method::GET,
            &format!("{uri}/messages"),
            Some(&f.super_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = f
        .call(Method::DELETE, &uri, Some(&f.super_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_chat_requires_super_admin() {
    let f = fixture().await;
    let chat_id = f.chat_with_messages(1).await;
    let (status, _) = f
        .call(
            Method::DELETE,
            &format!("/api/chat-operations/chats/{chat_id}"),
            Some(&f.admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(f.store.count_messages(chat_id).await.unwrap(), 1);

    let audit = AuditLogger::new(f.store.pool().clone());
    let rows = audit.recent(f.org, 5).await.unwrap();
    assert_eq!(rows[0].0, "delete_chat");
    assert_eq!(rows[0].2, "denied");
}

#[tokio::test]
async fn test_send_to_unassigned_chat_is_404() {
    let f = fixture().await;
    let chat_id = f.chat_with_messages(0).await;
    let uri = format!("/api/chat-operations/chats/{chat_id}/messages");

    let (status, json) = f
        .call(
            Method::POST,
            &uri,
            Some(&f.other_agent_token),
            Some(json!({ "content": "hello" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "chat not found");
    assert_eq!(f.store.count_messages(chat_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_send_without_connection_stores_failed_message() {
    let f = fixture().await;
    let chat_id = f.chat_with_messages(0).await;
    let uri = format!("/api/chat-operations/chats/{chat_id}/messages");

    let (status, json) = f
        .call(
            Method::POST,
            &uri,
            Some(&f.agent_token),
            Some(json!({ "content": "Olá, tudo bem?" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["delivered"], false);
    assert_eq!(json["message"]["status"], "failed");
    assert_eq!(json["message"]["is_from_me"], true);

    // Contact captured as a side effect.
    let contacts = f.store.list_contacts(f.org).await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].phone_number.as_deref(), Some("5511999990000"));

    let (status, _) = f
        .call(Method::POST, &uri, Some(&f.agent_token), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sent_message_published_to_agent_and_organization() {
    let f = fixture().await;
    let chat_id = f.chat_with_messages(0).await;
    let (status, _) = f
        .call(
            Method::POST,
            &format!("/api/chat-operations/chats/{chat_id}/messages"),
            Some(&f.agent_token),
            Some(json!({ "content": "Bom dia" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        f.published.rooms_of("new-message"),
        vec![Room::User(f.agent.id), Room::Organization(f.org)]
    );
}

#[tokio::test]
async fn test_mark_read_and_fix_jids() {
    let f = fixture().await;
    let chat_id = f.chat_with_messages(2).await;
    let (status, _) = f
        .call(
            Method::POST,
            "/api/chat-operations/mark-read",
            Some(&f.agent_token),
            Some(json!({ "chat_id": chat_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        f.store.get_chat(chat_id).await.unwrap().unwrap().unread_count,
        0
    );

    let legacy = f
        .store
        .create_chat(f.org, "Legacy", Some("5511911112222:3@c.us"), None)
        .await
        .unwrap();
    let (status, _) = f
        .call(
            Method::POST,
            "/api/chat-operations/fix-whatsapp-jids",
            Some(&f.agent_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = f
        .call(
            Method::POST,
            "/api/chat-operations/fix-whatsapp-jids",
            Some(&f.admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fixed"], 1);
    assert_eq!(
        f.store
            .get_chat(legacy.id)
            .await
            .unwrap()
            .unwrap()
            .whatsapp_jid
            .as_deref(),
        Some("5511911112222@s.whatsapp.net")
    );
}

#[tokio::test]
async fn test_transfer_and_rename_contact() {
    let f = fixture().await;
    let chat_id = f.chat_with_messages(0).await;
    let target = f
        .store
        .profile_by_email("carla@acme.com")
        .await
        .unwrap()
        .unwrap();

    let (status, _) = f
        .call(
            Method::POST,
            &format!("/api/chat-operations/chats/{chat_id}/transfer"),
            Some(&f.admin_token),
            Some(json!({ "agent_id": target.id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let chat = f.store.get_chat(chat_id).await.unwrap().unwrap();
    assert_eq!(chat.assigned_agent_id, Some(target.id));

    // The previous assignee can no longer see it.
    let (status, _) = f
        .call(
            Method::POST,
            "/api/chat-operations/update-specific-contact",
            Some(&f.agent_token),
            Some(json!({ "chat_id": chat_id, "name": "João Silva" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = f
        .call(
            Method::POST,
            "/api/chat-operations/update-specific-contact",
            Some(&f.other_agent_token),
            Some(json!({ "chat_id": chat_id, "name": "João Silva" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["updated"], true);
    assert_eq!(
        f.store.get_chat(chat_id).await.unwrap().unwrap().name,
        "João Silva"
    );
}

#[tokio::test]
async fn test_summary_disabled_is_503() {
    let f = fixture().await;
    let chat_id = f.chat_with_messages(1).await;
    let (status, _) = f
        .call(
            Method::POST,
            &format!("/api/chat-operations/chats/{chat_id}/summary"),
            Some(&f.agent_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ---------------------------------------------------------------------------
// Invites, accounts, QR
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invite_lifecycle() {
    let f = fixture().await;
    let (status, _) = f
        .call(
            Method::POST,
            "/api/invites",
            Some(&f.agent_token),
            Some(json!({ "email": "maria@x.com", "name": "Maria" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = f
        .call(
            Method::POST,
            "/api/invites",
            Some(&f.admin_token),
            Some(json!({ "email": "maria@x.com", "name": "Maria" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = created["token"].as_str().unwrap().to_string();
    assert!(created["api_token"].as_str().unwrap().starts_with("zd_"));

    let (status, info) = f
        .call(Method::GET, &format!("/api/invites/{token}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["name"], "Maria");
    assert_eq!(info["email"], "maria@x.com");
    assert_eq!(info["role"], "agent");
    assert_eq!(info["organization_id"], f.org.to_string());

    let accept = format!("/api/invites/{token}/accept");
    let (status, json) = f.call(Method::POST, &accept, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accepted"], true);
    let (status, json) = f.call(Method::POST, &accept, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accepted"], false);

    let (status, _) = f
        .call(Method::GET, &format!("/api/invites/{token}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = f
        .call(Method::POST, "/api/invites/bogus/accept", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invitee_creates_account_and_polls_qr() {
    let f = fixture().await;
    let (_, created) = f
        .call(
            Method::POST,
            "/api/invites",
            Some(&f.admin_token),
            Some(json!({ "email": "maria@x.com", "name": "Maria" })),
        )
        .await;
    let invite = created["token"].as_str().unwrap().to_string();

    let with_invite = |method: Method, uri: &str, body: Option<Value>| {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(INVITE_TOKEN_HEADER, invite.as_str());
        match body {
            Some(v) => req
                .header("Content-Type", "application/json")
                .body(Body::from(v.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap()
    };

    let proposed = Uuid::new_v4();
    let (status, account) = send(
        &f.app,
        with_invite(
            Method::POST,
            "/api/accounts/whatsapp",
            Some(json!({ "account_id": proposed })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(account["account_id"], proposed.to_string());
    assert_eq!(account["name"], "Maria - WhatsApp");

    // Asking again for the same invite hands back the same account.
    let (status, again) = send(
        &f.app,
        with_invite(
            Method::POST,
            "/api/accounts/whatsapp",
            Some(json!({ "account_id": Uuid::new_v4() })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["account_id"], proposed.to_string());

    // The driver never produced a QR.
    let qr_uri = format!("/api/accounts/whatsapp/{proposed}/qr");
    let (status, _) = send(&f.app, with_invite(Method::GET, &qr_uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = f.call(Method::GET, &qr_uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    // Another agent of the organization does not own it.
    let (status, _) = f
        .call(Method::GET, &qr_uri, Some(&f.agent_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = f
        .call(
            Method::GET,
            &format!("/api/accounts/whatsapp/{proposed}/status"),
            Some(&f.admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "connecting");
    assert_eq!(json["active"], true);
}

#[tokio::test]
async fn test_reconnect_token_flow() {
    let f = fixture().await;
    let account_id = Uuid::new_v4();
    f.store
        .create_account(account_id, "Bruno - WhatsApp", f.org, f.agent.id, None)
        .await
        .unwrap();

    let issue = format!("/api/accounts/whatsapp/{account_id}/reconnect-token");
    let (status, _) = f.call(Method::POST, &issue, Some(&f.agent_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, json) = f.call(Method::POST, &issue, Some(&f.admin_token), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let token = json["token"].as_str().unwrap().to_string();

    let (status, info) = f
        .call(Method::GET, &format!("/api/reconnect/{token}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["account_id"], account_id.to_string());
    assert_eq!(info["account_name"], "Bruno - WhatsApp");
    assert_eq!(info["user_id"], f.agent.id.to_string());

    let (status, _) = f
        .call(Method::POST, &format!("/api/reconnect/{token}/qr"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = f
        .call(Method::GET, "/api/reconnect/not-a-token", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chats_scoped_to_unpaired_account_are_empty() {
    let f = fixture().await;
    f.chat_with_messages(2).await;
    let account_id = Uuid::new_v4();
    f.store
        .create_account(account_id, "Ana - WhatsApp", f.org, f.agent.id, None)
        .await
        .unwrap();

    let (status, json) = f
        .call(
            Method::GET,
            &format!("/api/chat-operations/chats?account_id={account_id}"),
            Some(&f.admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["chats"].as_array().unwrap().is_empty());

    let (status, _) = f
        .call(
            Method::GET,
            &format!("/api/chat-operations/chats?account_id={}", Uuid::new_v4()),
            Some(&f.admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Rules, analytics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rules_crud_and_report() {
    let f = fixture().await;
    let body = json!({ "name": "Complaints", "keywords": ["refund", "cancel"] });
    let (status, _) = f
        .call(Method::POST, "/api/rules", Some(&f.agent_token), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = f
        .call(
            Method::POST,
            "/api/rules",
            Some(&f.admin_token),
            Some(json!({ "name": "Empty", "keywords": [" "] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, rule) = f
        .call(Method::POST, "/api/rules", Some(&f.admin_token), Some(body))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let rule_id = rule["id"].as_str().unwrap().to_string();

    let (_, list) = f
        .call(Method::GET, "/api/rules", Some(&f.agent_token), None)
        .await;
    assert_eq!(list["rules"].as_array().unwrap().len(), 1);

    let (status, report) = f
        .call(
            Method::GET,
            &format!("/api/rules/{rule_id}/report?days=7"),
            Some(&f.agent_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total_hits"], 0);

    let (status, _) = f
        .call(
            Method::DELETE,
            &format!("/api/rules/{rule_id}"),
            Some(&f.admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = f
        .call(
            Method::GET,
            &format!("/api/rules/{rule_id}/report"),
            Some(&f.admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analytics_overview_admin_only() {
    let f = fixture().await;
    f.chat_with_messages(4).await;

    let (status, _) = f
        .call(Method::GET, "/api/analytics/overview", Some(&f.agent_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = f
        .call(
            Method::GET,
            "/api/analytics/overview?days=30",
            Some(&f.admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["days"], 30);
    assert_eq!(json["messages_received"], 4);
}

// ---------------------------------------------------------------------------
// Realtime room grants
// ---------------------------------------------------------------------------

fn socket_auth(token: Option<&str>, invite: Option<&str>) -> SocketAuth {
    SocketAuth {
        token: token.map(str::to_string),
        invite: invite.map(str::to_string),
        reconnect: None,
    }
}

#[tokio::test]
async fn test_socket_joins_only_its_own_user_room() {
    let f = fixture().await;
    let other_agent = f
        .store
        .profile_by_token(&f.other_agent_token)
        .await
        .unwrap()
        .unwrap();

    let anonymous = resolve_grant(&f.state, &SocketAuth::default()).await;
    assert!(!anonymous.allows(Room::User(f.agent.id)));
    assert!(!anonymous.allows(Room::Organization(f.org)));

    let unknown = resolve_grant(&f.state, &socket_auth(Some("zd_bogus"), None)).await;
    assert!(!unknown.allows(Room::User(f.agent.id)));

    let agent = resolve_grant(&f.state, &socket_auth(Some(&f.agent_token), None)).await;
    assert!(agent.allows(Room::User(f.agent.id)));
    assert!(agent.allows(Room::Organization(f.org)));
    assert!(!agent.allows(Room::User(other_agent.id)));

    let root = resolve_grant(&f.state, &socket_auth(Some(&f.super_token), None)).await;
    assert!(root.allows(Room::User(other_agent.id)));
}

#[tokio::test]
async fn test_invite_socket_joins_invitee_room() {
    let f = fixture().await;
    let (_, created) = f
        .call(
            Method::POST,
            "/api/invites",
            Some(&f.admin_token),
            Some(json!({ "email": "maria@x.com", "name": "Maria" })),
        )
        .await;
    let token = created["token"].as_str().unwrap();
    let invite = f.store.invite_by_token(token).await.unwrap().unwrap();

    let grant = resolve_grant(&f.state, &socket_auth(None, Some(token))).await;
    assert!(grant.allows(Room::User(invite.user_id)));
    assert!(grant.allows(Room::Organization(f.org)));
    assert!(!grant.allows(Room::User(f.agent.id)));
}
