//! WhatsApp accounts, invites, and reconnection tokens.

use super::{
    authenticate, authenticate_caller, can_manage_account, parse_body, require_admin,
    require_organization, ApiError, ApiResult, ApiState, Caller,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;
use zapdesk_core::{
    dto::{AccountCreated, CreateAccountRequest, InviteInfo, QrResponse, ReconnectInfo},
    model::{Account, AccountStatus, Invite, Role},
};
use zapdesk_store::AuditStatus;
use zapdesk_whatsapp::QrLookup;

/// The account, or 404 when it is missing or the caller may not touch it.
async fn accessible_account(
    state: &ApiState,
    caller: &Caller,
    account_id: Uuid,
) -> ApiResult<Account> {
    match state.store.get_account(account_id).await? {
        Some(account) if caller.can_access(&account) => Ok(account),
        _ => Err(ApiError::not_found("account")),
    }
}

/// `GET /api/accounts/whatsapp`
pub(super) async fn list_accounts(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let organization_id = require_organization(&profile)?;
    let accounts: Vec<Account> = state
        .store
        .list_accounts(organization_id)
        .await?
        .into_iter()
        .filter(|a| can_manage_account(&profile, a))
        .collect();
    Ok(Json(json!({ "accounts": accounts })))
}

/// `POST /api/accounts/whatsapp`
///
/// Creates (or, for an invite that already has one, reuses) the account and
/// starts its connection. The returned id is authoritative and may differ
/// from the one the client proposed.
pub(super) async fn create_account(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AccountCreated>)> {
    let caller = authenticate_caller(&state, &headers).await?;
    let request = parse_body(body)?;

    let invite = match (&caller, request.invite_token.as_deref()) {
        (Caller::Invite(invite), _) => Some(invite.clone()),
        (Caller::Profile(_), Some(token)) => Some(
            state
                .store
                .invite_by_token(token)
                .await?
                .ok_or_else(|| ApiError::not_found("invite"))?,
        ),
        (Caller::Profile(_), None) => None,
    };

    let (organization_id, user_id, default_name) = match (&caller, &invite) {
        (_, Some(invite)) => (
            invite.organization_id,
            invite.user_id,
            format!("{} - WhatsApp", invite.name),
        ),
        (Caller::Profile(profile), None) => (
            require_organization(profile)?,
            profile.id,
            format!("{} - WhatsApp", profile.name),
        ),
        (Caller::Invite(_), None) => return Err(ApiError::unauthorized("invalid invite token")),
    };

    if let Some(invite) = &invite {
        if let Some(existing) = state.store.account_for_invite(invite.id).await? {
            if existing.status != AccountStatus::Connected {
                info!(
                    "invite {} already has account {}, restarting it",
                    invite.id, existing.account_id
                );
                state.manager.start(existing.account_id).await?;
            }
            return Ok((
                StatusCode::OK,
                Json(AccountCreated {
                    account_id: existing.account_id,
                    name: existing.name,
                    status: existing.status,
                }),
            ));
        }
    }

    let account_id = match request.account_id {
        Some(proposed) if state.store.get_account(proposed).await?.is_none() => proposed,
        Some(proposed) => {
            warn!("proposed account id {proposed} is taken, assigning a new one");
            Uuid::new_v4()
        }
        None => Uuid::new_v4(),
    };
    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or(default_name);

    let account = state
        .store
        .create_account(
            account_id,
            &name,
            organization_id,
            user_id,
            invite.as_ref().map(|i| i.id),
        )
        .await?;
    state.manager.start(account.account_id).await?;
    info!("account {} ({}) created", account.account_id, account.name);

    Ok((
        StatusCode::CREATED,
        Json(AccountCreated {
            account_id: account.account_id,
            name: account.name,
            status: AccountStatus::Connecting,
        }),
    ))
}

/// `GET /api/accounts/whatsapp/{account_id}/qr`
pub(super) async fn account_qr(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<QrResponse>> {
    let caller = authenticate_caller(&state, &headers).await?;
    let account = accessible_account(&state, &caller, account_id).await?;
    match state.manager.latest_qr(account.account_id).await? {
        QrLookup::Ready { image, code } => Ok(Json(QrResponse {
            success: true,
            qr_code: Some(image),
            code: Some(code),
            ..Default::default()
        })),
        QrLookup::NotReady => Err(ApiError::not_found("qr code")),
    }
}

/// `GET /api/accounts/whatsapp/{account_id}/status`
pub(super) async fn account_status(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let caller = authenticate_caller(&state, &headers).await?;
    let account = accessible_account(&state, &caller, account_id).await?;
    Ok(Json(json!({
        "account_id": account.account_id,
        "name": account.name,
        "status": account.status,
        "phone_number": account.phone_number,
        "active": state.manager.is_active(account.account_id).await,
    })))
}

/// `POST /api/accounts/whatsapp/{account_id}/disconnect`
pub(super) async fn disconnect(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let account = state
        .store
        .get_account(account_id)
        .await?
        .filter(|a| can_manage_account(&profile, a))
        .ok_or_else(|| ApiError::not_found("account"))?;

    let was_active = state.manager.stop(account.account_id).await?;
    state
        .audit(
            &profile,
            "disconnect_account",
            account.account_id,
            None,
            AuditStatus::Ok,
        )
        .await;
    Ok(Json(json!({
        "success": true,
        "account_id": account.account_id,
        "was_active": was_active,
    })))
}

/// `POST /api/accounts/whatsapp/{account_id}/reconnect-token` (admin)
pub(super) async fn issue_reconnect_token(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let profile = authenticate(&state, &headers).await?;
    require_admin(&profile)?;
    let account = state
        .store
        .get_account(account_id)
        .await?
        .filter(|a| can_manage_account(&profile, a))
        .ok_or_else(|| ApiError::not_found("account"))?;

    let token = state
        .store
        .create_reconnect_token(
            account.account_id,
            Duration::hours(state.tokens.reconnect_ttl_hours),
        )
        .await?;
    state
        .audit(
            &profile,
            "issue_reconnect_token",
            account.account_id,
            None,
            AuditStatus::Ok,
        )
        .await;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": token.token,
            "account_id": token.account_id,
            "expires_at": token.expires_at,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateInviteRequest {
    email: Option<String>,
    name: Option<String>,
    role: Option<Role>,
}

/// `POST /api/invites` (admin)
///
/// The invitee's profile is created up front so linked accounts have an
/// owner; its API token is returned once, here.
pub(super) async fn create_invite(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<CreateInviteRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let profile = authenticate(&state, &headers).await?;
    let request = parse_body(body)?;
    require_admin(&profile)?;
    let organization_id = require_organization(&profile)?;

    let email = request.email.as_deref().map(str::trim).unwrap_or_default();
    if !email.contains('@') {
        return Err(ApiError::bad_request("a valid email is required"));
    }
    let name = request.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let role = request.role.unwrap_or(Role::Agent);
    if role == Role::SuperAdmin && profile.role != Role::SuperAdmin {
        return Err(ApiError::forbidden("cannot invite a super admin"));
    }

    let (user_id, api_token) = match state.store.profile_by_email(email).await? {
        Some(existing) if existing.organization_id == Some(organization_id) => (existing.id, None),
        Some(_) => {
            return Err(ApiError::bad_request(
                "email belongs to another organization",
            ))
        }
        None => {
            let (created, token) = state
                .store
                .create_profile(Some(organization_id), name, email, role)
                .await?;
            (created.id, Some(token))
        }
    };

    let invite = state
        .store
        .create_invite(
            organization_id,
            user_id,
            email,
            name,
            role,
            Duration::hours(state.tokens.invite_ttl_hours),
        )
        .await?;
    info!("invite {} issued for {email}", invite.id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": invite.token,
            "user_id": invite.user_id,
            "expires_at": invite.expires_at,
            "api_token": api_token,
        })),
    ))
}

fn invite_info(invite: Invite) -> InviteInfo {
    InviteInfo {
        name: invite.name,
        email: invite.email,
        role: invite.role,
        organization_id: invite.organization_id,
        user_id: invite.user_id,
    }
}

/// `GET /api/invites/{token}`
pub(super) async fn validate_invite(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> ApiResult<Json<InviteInfo>> {
    let invite = state
        .store
        .invite_by_token(&token)
        .await?
        .ok_or_else(|| ApiError::not_found("invite"))?;
    Ok(Json(invite_info(invite)))
}

/// `POST /api/invites/{token}/accept`
///
/// Idempotent: accepting twice succeeds, `accepted` tells whether this call did it.
pub(super) async fn accept_invite(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.store.invite_by_token_any(&token).await?.is_none() {
        return Err(ApiError::not_found("invite"));
    }
    let accepted = state.store.mark_invite_accepted(&token).await?;
    if accepted {
        info!("invite accepted");
    }
    Ok(Json(json!({ "success": true, "accepted": accepted })))
}

/// `GET /api/reconnect/{token}`
pub(super) async fn validate_reconnect(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> ApiResult<Json<ReconnectInfo>> {
    let account = reconnect_account(&state, &token).await?;
    Ok(Json(ReconnectInfo {
        account_id: account.account_id,
        account_name: account.name,
        phone_number: account.phone_number,
        status: account.status,
        organization_id: account.organization_id,
        user_id: account.user_id,
    }))
}

/// `POST /api/reconnect/{token}/qr`
pub(super) async fn reconnect_qr(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> ApiResult<Json<Value>> {
    let account = reconnect_account(&state, &token).await?;
    state.manager.regenerate_qr(account.account_id).await?;
    Ok(Json(json!({ "success": true, "account_id": account.account_id })))
}

async fn reconnect_account(state: &ApiState, token: &str) -> ApiResult<Account> {
    let token = state
        .store
        .reconnect_token(token)
        .await?
        .ok_or_else(|| ApiError::not_found("reconnect token"))?;
    state
        .store
        .get_account(token.account_id)
        .await?
        .ok_or_else(|| ApiError::not_found("account"))
}
