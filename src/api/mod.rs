//! HTTP API for the dashboard and the pairing client.
//!
//! Every `/api/*` route except invite/reconnect-token validation and health
//! requires `Authorization: Bearer <token>`. The QR and account-creation
//! endpoints also accept an invite token in `x-invite-token`.

mod accounts;
mod chats;
mod rules;

#[cfg(test)]
mod tests;

use crate::realtime::{self, RoomHub};
use crate::summarizer::Summarizer;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;
use zapdesk_core::{
    config::{ApiConfig, TokensConfig},
    dto::INVITE_TOKEN_HEADER,
    error::ZapdeskError,
    model::{Account, Invite, Profile, Role},
    traits::EventPublisher,
};
use zapdesk_store::{AuditEntry, AuditLogger, AuditStatus, Store};
use zapdesk_whatsapp::ConnectionManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub(crate) store: Store,
    pub(crate) manager: Arc<ConnectionManager>,
    /// Socket side of the realtime bridge: `/ws` subscriptions and listener count.
    pub(crate) hub: Arc<RoomHub>,
    /// Where handlers publish realtime events.
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) audit: AuditLogger,
    pub(crate) summarizer: Option<Arc<Summarizer>>,
    pub(crate) tokens: TokensConfig,
    pub(crate) uptime: Instant,
}

impl ApiState {
    pub fn new(
        store: Store,
        manager: Arc<ConnectionManager>,
        hub: Arc<RoomHub>,
        publisher: Arc<dyn EventPublisher>,
        summarizer: Option<Summarizer>,
        tokens: TokensConfig,
    ) -> Self {
        let audit = AuditLogger::new(store.pool().clone());
        Self {
            store,
            manager,
            hub,
            publisher,
            audit,
            summarizer: summarizer.map(Arc::new),
            tokens,
            uptime: Instant::now(),
        }
    }

    /// Best-effort audit write.
    pub(crate) async fn audit(
        &self,
        actor: &Profile,
        action: &str,
        target: impl ToString,
        detail: Option<String>,
        status: AuditStatus,
    ) {
        let entry = AuditEntry {
            actor_id: actor.id,
            organization_id: actor.organization_id,
            action: action.to_string(),
            target: target.to_string(),
            detail,
            status,
        };
        if let Err(e) = self.audit.log(&entry).await {
            warn!("audit write for {action} failed: {e}");
        }
    }
}

/// Error response: status plus `{ "error": message }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub(crate) fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub(crate) fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl From<ZapdeskError> for ApiError {
    fn from(e: ZapdeskError) -> Self {
        match e {
            ZapdeskError::Validation(m) => Self::bad_request(m),
            ZapdeskError::Forbidden(m) => Self::forbidden(m),
            ZapdeskError::NotFound(what) => Self::not_found(&what),
            ZapdeskError::RateLimited(m) => Self::new(StatusCode::TOO_MANY_REQUESTS, m),
            other => {
                error!("request failed: {other}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// Unwrap a JSON body, turning rejections into 400s.
pub(crate) fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(format!("invalid request: {e}")))
}

fn bearer(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(header) = headers.get("authorization") else {
        return Ok(None);
    };
    let value = header
        .to_str()
        .map_err(|_| ApiError::unauthorized("invalid Authorization header"))?;
    value
        .strip_prefix("Bearer ")
        .map(|t| Some(t.trim()))
        .ok_or_else(|| ApiError::unauthorized("invalid Authorization header"))
}

/// Resolve the bearer token to a profile.
pub(crate) async fn authenticate(state: &ApiState, headers: &HeaderMap) -> ApiResult<Profile> {
    let token =
        bearer(headers)?.ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;
    state
        .store
        .profile_by_token(token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid token"))
}

/// Who is calling an endpoint that also serves invitees.
pub(crate) enum Caller {
    Profile(Profile),
    Invite(Invite),
}

pub(crate) async fn authenticate_caller(
    state: &ApiState,
    headers: &HeaderMap,
) -> ApiResult<Caller> {
    if bearer(headers)?.is_some() {
        return authenticate(state, headers).await.map(Caller::Profile);
    }
    let token = headers
        .get(INVITE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;
    state
        .store
        .invite_by_token(token)
        .await?
        .map(Caller::Invite)
        .ok_or_else(|| ApiError::unauthorized("invalid invite token"))
}

impl Caller {
    /// Whether this caller may see and drive `account`.
    pub(crate) fn can_access(&self, account: &Account) -> bool {
        match self {
            Self::Profile(p) => can_manage_account(p, account),
            Self::Invite(invite) => {
                account.invite_id == Some(invite.id) || account.user_id == invite.user_id
            }
        }
    }
}

/// Owner, admins of its organization, and super-admins.
pub(crate) fn can_manage_account(profile: &Profile, account: &Account) -> bool {
    match profile.role {
        Role::SuperAdmin => true,
        Role::Admin => profile.organization_id == Some(account.organization_id),
        Role::Agent => account.user_id == profile.id,
    }
}

pub(crate) fn require_admin(profile: &Profile) -> ApiResult<()> {
    if profile.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("admin role required"))
    }
}

pub(crate) fn require_organization(profile: &Profile) -> ApiResult<Uuid> {
    profile
        .organization_id
        .ok_or_else(|| ApiError::bad_request("caller has no organization"))
}

/// `GET /api/health`
async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "active_connections": state.manager.active_count().await,
        "realtime_listeners": state.hub.listeners(),
    }))
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState, max_body_bytes: usize) -> Router {
    let chat_ops = Router::new()
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(chats::list_messages).post(chats::send_message),
        )
        .route("/chats/{chat_id}", delete(chats::delete_chat))
        .route("/chats/{chat_id}/transfer", post(chats::transfer_chat))
        .route("/chats/{chat_id}/summary", post(chats::summarize_chat))
        .route("/mark-read", post(chats::mark_read))
        .route("/update-contacts", post(chats::update_contacts))
        .route(
            "/update-specific-contact",
            post(chats::update_specific_contact),
        )
        .route("/fix-whatsapp-jids", post(chats::fix_whatsapp_jids));

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/chat-operations", chat_ops)
        .route(
            "/api/accounts/whatsapp",
            get(accounts::list_accounts).post(accounts::create_account),
        )
        .route("/api/accounts/whatsapp/{account_id}/qr", get(accounts::account_qr))
        .route(
            "/api/accounts/whatsapp/{account_id}/status",
            get(accounts::account_status),
        )
        .route(
            "/api/accounts/whatsapp/{account_id}/disconnect",
            post(accounts::disconnect),
        )
        .route(
            "/api/accounts/whatsapp/{account_id}/reconnect-token",
            post(accounts::issue_reconnect_token),
        )
        .route("/api/invites", post(accounts::create_invite))
        .route("/api/invites/{token}", get(accounts::validate_invite))
        .route("/api/invites/{token}/accept", post(accounts::accept_invite))
        .route("/api/reconnect/{token}", get(accounts::validate_reconnect))
        .route("/api/reconnect/{token}/qr", post(accounts::reconnect_qr))
        .route("/api/rules", get(rules::list_rules).post(rules::create_rule))
        .route("/api/rules/{rule_id}", delete(rules::delete_rule))
        .route("/api/rules/{rule_id}/report", get(rules::rule_report))
        .route("/api/analytics/overview", get(rules::analytics_overview))
        .route("/ws", get(realtime::ws_handler))
        .layer(axum::extract::DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Run the API server until ctrl-c.
pub async fn serve(config: &ApiConfig, state: ApiState) -> Result<(), ZapdeskError> {
    let app = build_router(state, config.max_body_bytes);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ZapdeskError::Config(format!("failed to bind {addr}: {e}")))?;

    info!("api server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .map_err(ZapdeskError::Io)
}
