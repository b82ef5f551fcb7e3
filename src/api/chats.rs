//! `/api/chat-operations/*`: chat CRUD, sending, and contact maintenance.

use super::{
    authenticate, parse_body, require_admin, require_organization, ApiError, ApiResult, ApiState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;
use zapdesk_core::{
    events::{NewMessagePayload, RealtimeEvent},
    jid::{is_group_jid, normalize_jid, phone_from_jid},
    model::{Chat, MessageStatus, NewMessage, Profile, Role},
    traits::EventPublisher,
};
use zapdesk_store::{AuditStatus, ChatScope};

const DEFAULT_PAGE: i64 = 100;
const MAX_PAGE: i64 = 500;

/// Agents see chats assigned to them, admins their organization, super-admins everything.
fn can_view(profile: &Profile, chat: &Chat) -> bool {
    match profile.role {
        Role::SuperAdmin => true,
        Role::Admin => profile.organization_id == Some(chat.organization_id),
        Role::Agent => chat.assigned_agent_id == Some(profile.id),
    }
}

/// The chat, or 404 when it is missing or hidden from the caller.
async fn visible_chat(state: &ApiState, profile: &Profile, chat_id: Uuid) -> ApiResult<Chat> {
    match state.store.get_chat(chat_id).await? {
        Some(chat) if can_view(profile, &chat) => Ok(chat),
        _ => Err(ApiError::not_found("chat")),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChatListQuery {
    account_id: Option<Uuid>,
}

/// `GET /api/chat-operations/chats?account_id=`
pub(super) async fn list_chats(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Query(query): Query<ChatListQuery>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let scope = ChatScope::for_profile(&profile);

    let account_phone = match query.account_id {
        None => None,
        Some(account_id) => {
            let account = state
                .store
                .get_account(account_id)
                .await?
                .filter(|a| {
                    profile.role == Role::SuperAdmin
                        || profile.organization_id == Some(a.organization_id)
                })
                .ok_or_else(|| ApiError::not_found("account"))?;
            match account.phone_number {
                Some(phone) => Some(phone),
                // Never paired: no traffic can have gone through it.
                None => return Ok(Json(json!({ "chats": [] }))),
            }
        }
    };

    let chats = state
        .store
        .list_chats(scope, account_phone.as_deref())
        .await?;
    Ok(Json(json!({ "chats": chats })))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateChatRequest {
    name: Option<String>,
    whatsapp_jid: Option<String>,
    assigned_agent_id: Option<Uuid>,
}

/// `POST /api/chat-operations/chats`
pub(super) async fn create_chat(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<CreateChatRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Chat>)> {
    let profile = authenticate(&state, &headers).await?;
    let request = parse_body(body)?;
    let organization_id = require_organization(&profile)?;

    let name = request.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let jid = match request.whatsapp_jid.as_deref() {
        Some(raw) => Some(
            normalize_jid(raw)
                .ok_or_else(|| ApiError::bad_request(format!("invalid whatsapp_jid '{raw}'")))?,
        ),
        None => None,
    };
    let assignee = match profile.role {
        Role::Agent => Some(profile.id),
        _ => request.assigned_agent_id,
    };

    let chat = state
        .store
        .create_chat(organization_id, name, jid.as_deref(), assignee)
        .await?;
    info!("chat {} created by {}", chat.id, profile.id);
    Ok((StatusCode::CREATED, Json(chat)))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct PageQuery {
    limit: Option<i64>,
}

/// `GET /api/chat-operations/chats/{chat_id}/messages`
pub(super) async fn list_messages(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(chat_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let chat = visible_chat(&state, &profile, chat_id).await?;
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let messages = state.store.list_messages(chat.id, limit).await?;
    Ok(Json(json!({ "chat_id": chat.id, "messages": messages })))
}

#[derive(Debug, Deserialize)]
pub(super) struct SendMessageRequest {
    content: Option<String>,
}

/// `POST /api/chat-operations/chats/{chat_id}/messages`
///
/// The message is stored either way; delivery, the realtime event, and the
/// contact capture are best-effort.
pub(super) async fn send_message(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(chat_id): Path<Uuid>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let profile = authenticate(&state, &headers).await?;
    let request = parse_body(body)?;
    let content = request.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ApiError::bad_request("content is required"));
    }
    let chat = visible_chat(&state, &profile, chat_id).await?;

    let mut metadata = json!({ "sent_by": profile.id });
    let mut delivered = false;
    match (chat.whatsapp_jid.as_deref(), state.manager.route_account_for_chat(&chat).await) {
        (Some(jid), Ok(Some(account_id))) => {
            metadata["account_id"] = json!(account_id);
            if let Ok(Some(account)) = state.store.get_account(account_id).await {
                metadata["account_phone"] = json!(account.phone_number);
            }
            match state.manager.send_text(account_id, jid, &content).await {
                Ok(whatsapp_id) => {
                    metadata["whatsapp_id"] = json!(whatsapp_id);
                    delivered = true;
                }
                Err(e) => warn!("delivery to chat {} failed: {e}", chat.id),
            }
        }
        (None, _) => warn!("chat {} has no whatsapp jid, storing only", chat.id),
        (_, Ok(None)) => warn!("no connected account for chat {}, storing only", chat.id),
        (_, Err(e)) => warn!("routing chat {} failed: {e}", chat.id),
    }

    let message = state
        .store
        .insert_message(&NewMessage {
            chat_id: chat.id,
            content,
            is_from_me: true,
            status: if delivered {
                MessageStatus::Sent
            } else {
                MessageStatus::Failed
            },
            sender_jid: None,
            metadata,
        })
        .await?;
    if let Err(e) = state.store.touch_chat(chat.id, false).await {
        warn!("touch chat {} failed: {e}", chat.id);
    }

    let event = RealtimeEvent::NewMessage(NewMessagePayload {
        chat_id: chat.id,
        message: message.clone(),
    });
    if let Some(agent) = chat.assigned_agent_id {
        state.publisher.emit_to_user(agent, event.clone());
    }
    state.publisher.emit_to_organization(chat.organization_id, event);

    if let Some(jid) = chat.whatsapp_jid.as_deref().filter(|j| !is_group_jid(j)) {
        let phone = phone_from_jid(jid);
        if let Err(e) = state
            .store
            .upsert_contact(chat.organization_id, jid, &chat.name, phone.as_deref())
            .await
        {
            warn!("contact capture for {jid} failed: {e}");
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": message, "delivered": delivered })),
    ))
}

/// `DELETE /api/chat-operations/chats/{chat_id}` (super-admin only)
pub(super) async fn delete_chat(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    if profile.role != Role::SuperAdmin {
        state
            .audit(&profile, "delete_chat", chat_id, None, AuditStatus::Denied)
            .await;
        return Err(ApiError::forbidden("only super admins can delete chats"));
    }

    let deleted = state
        .store
        .delete_chat_cascade(chat_id)
        .await?
        .ok_or_else(|| ApiError::not_found("chat"))?;
    info!("chat {chat_id} deleted with {deleted} message(s)");
    state
        .audit(
            &profile,
            "delete_chat",
            chat_id,
            Some(format!("{deleted} message(s)")),
            AuditStatus::Ok,
        )
        .await;
    Ok(Json(json!({ "deleted_messages": deleted, "chat_id": chat_id })))
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatRef {
    chat_id: Uuid,
}

/// `POST /api/chat-operations/mark-read`
pub(super) async fn mark_read(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<ChatRef>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let request = parse_body(body)?;
    let chat = visible_chat(&state, &profile, request.chat_id).await?;
    state.store.mark_chat_read(chat.id).await?;
    Ok(Json(json!({ "success": true, "chat_id": chat.id })))
}

/// `POST /api/chat-operations/update-contacts`
pub(super) async fn update_contacts(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let organization_id = require_organization(&profile)?;
    let updated = state
        .manager
        .update_existing_contact_info(organization_id)
        .await
        .map_err(|e| {
            warn!("contact refresh for {organization_id} failed: {e}");
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "no connected whatsapp account",
            )
        })?;
    state
        .audit(
            &profile,
            "update_contacts",
            organization_id,
            Some(format!("{updated} renamed")),
            AuditStatus::Ok,
        )
        .await;
    Ok(Json(json!({ "success": true, "updated": updated })))
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateContactRequest {
    chat_id: Uuid,
    name: Option<String>,
}

/// `POST /api/chat-operations/update-specific-contact`
///
/// Uses the given name, or asks WhatsApp through the account that carries the chat.
pub(super) async fn update_specific_contact(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<UpdateContactRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let request = parse_body(body)?;
    let chat = visible_chat(&state, &profile, request.chat_id).await?;
    let jid = chat
        .whatsapp_jid
        .clone()
        .ok_or_else(|| ApiError::bad_request("chat has no whatsapp jid"))?;

    let name = match request.name.map(|n| n.trim().to_string()) {
        Some(n) if !n.is_empty() => n,
        _ => {
            let account_id = state
                .manager
                .route_account_for_chat(&chat)
                .await?
                .ok_or_else(|| {
                    ApiError::new(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "no connected whatsapp account",
                    )
                })?;
            state
                .manager
                .contact_info(account_id, &jid)
                .await?
                .ok_or_else(|| ApiError::not_found("contact name"))?
        }
    };

    let renamed = name != chat.name;
    if renamed {
        state.store.set_chat_name(chat.id, &name).await?;
    }
    if !is_group_jid(&jid) {
        let phone = phone_from_jid(&jid);
        state
            .store
            .upsert_contact(chat.organization_id, &jid, &name, phone.as_deref())
            .await?;
    }
    Ok(Json(json!({
        "success": true,
        "chat_id": chat.id,
        "name": name,
        "updated": renamed,
    })))
}

/// `POST /api/chat-operations/fix-whatsapp-jids` (admin)
pub(super) async fn fix_whatsapp_jids(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    require_admin(&profile)?;
    let organization_id = require_organization(&profile)?;

    let chats = state.store.chats_with_jids(organization_id).await?;
    let checked = chats.len();
    let mut fixed = 0usize;
    for chat in chats {
        let Some(current) = chat.whatsapp_jid.as_deref() else {
            continue;
        };
        match normalize_jid(current) {
            Some(normalized) if normalized != current => {
                state.store.set_chat_jid(chat.id, &normalized).await?;
                fixed += 1;
            }
            Some(_) => {}
            None => warn!("chat {} has unusable jid '{current}'", chat.id),
        }
    }

    info!("fixed {fixed} of {checked} jid(s) in organization {organization_id}");
    state
        .audit(
            &profile,
            "fix_whatsapp_jids",
            organization_id,
            Some(format!("{fixed} of {checked}")),
            AuditStatus::Ok,
        )
        .await;
    Ok(Json(json!({ "success": true, "checked": checked, "fixed": fixed })))
}

#[derive(Debug, Deserialize)]
pub(super) struct TransferRequest {
    agent_id: Uuid,
}

/// `POST /api/chat-operations/chats/{chat_id}/transfer` (admin)
pub(super) async fn transfer_chat(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(chat_id): Path<Uuid>,
    body: Result<Json<TransferRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let request = parse_body(body)?;
    if let Err(e) = require_admin(&profile) {
        state
            .audit(&profile, "transfer_chat", chat_id, None, AuditStatus::Denied)
            .await;
        return Err(e);
    }
    let chat = visible_chat(&state, &profile, chat_id).await?;

    let agent = state
        .store
        .get_profile(request.agent_id)
        .await?
        .filter(|a| a.organization_id == Some(chat.organization_id))
        .ok_or_else(|| ApiError::bad_request("agent is not a member of the chat's organization"))?;

    state.store.reassign_chat(chat.id, agent.id).await?;
    state
        .audit(
            &profile,
            "transfer_chat",
            chat.id,
            Some(format!(
                "{} -> {}",
                chat.assigned_agent_id
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "unassigned".into()),
                agent.id
            )),
            AuditStatus::Ok,
        )
        .await;
    Ok(Json(json!({
        "success": true,
        "chat_id": chat.id,
        "agent_id": agent.id,
    })))
}

/// `POST /api/chat-operations/chats/{chat_id}/summary`
pub(super) async fn summarize_chat(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let chat = visible_chat(&state, &profile, chat_id).await?;
    let summarizer = state.summarizer.clone().ok_or_else(|| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "summarizer is disabled")
    })?;

    let messages = state
        .store
        .recent_messages_for_summary(chat.id, summarizer.max_messages())
        .await?;
    let summary = summarizer.summarize(&chat.name, &messages).await?;
    Ok(Json(json!({
        "chat_id": chat.id,
        "messages": messages.len(),
        "summary": summary,
    })))
}
