//! Keyword rules and the analytics overview.

use super::{
    authenticate, parse_body, require_admin, require_organization, ApiError, ApiResult, ApiState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use zapdesk_core::model::{AnalyticsOverview, Profile, Role, Rule, RuleReport};
use zapdesk_store::AuditStatus;

const DEFAULT_REPORT_DAYS: i64 = 30;
const DEFAULT_OVERVIEW_DAYS: i64 = 7;
const MAX_DAYS: i64 = 365;

#[derive(Debug, Default, Deserialize)]
pub(super) struct DaysQuery {
    days: Option<i64>,
}

impl DaysQuery {
    fn resolve(&self, default: i64) -> i64 {
        self.days.unwrap_or(default).clamp(1, MAX_DAYS)
    }
}

async fn visible_rule(state: &ApiState, profile: &Profile, rule_id: Uuid) -> ApiResult<Rule> {
    match state.store.get_rule(rule_id).await? {
        Some(rule)
            if profile.role == Role::SuperAdmin
                || profile.organization_id == Some(rule.organization_id) =>
        {
            Ok(rule)
        }
        _ => Err(ApiError::not_found("rule")),
    }
}

/// `GET /api/rules`
pub(super) async fn list_rules(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    let organization_id = require_organization(&profile)?;
    let rules = state.store.list_rules(organization_id).await?;
    Ok(Json(json!({ "rules": rules })))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateRuleRequest {
    name: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// `POST /api/rules` (admin)
pub(super) async fn create_rule(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<CreateRuleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Rule>)> {
    let profile = authenticate(&state, &headers).await?;
    let request = parse_body(body)?;
    require_admin(&profile)?;
    let organization_id = require_organization(&profile)?;

    let name = request.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    if request.keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(ApiError::bad_request("at least one keyword is required"));
    }

    let rule = state
        .store
        .create_rule(organization_id, name, &request.keywords, profile.id)
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// `DELETE /api/rules/{rule_id}` (admin)
pub(super) async fn delete_rule(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(rule_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let profile = authenticate(&state, &headers).await?;
    require_admin(&profile)?;
    let rule = visible_rule(&state, &profile, rule_id).await?;
    state.store.delete_rule(rule.id).await?;
    state
        .audit(&profile, "delete_rule", rule.id, Some(rule.name), AuditStatus::Ok)
        .await;
    Ok(Json(json!({ "success": true, "rule_id": rule.id })))
}

/// `GET /api/rules/{rule_id}/report?days=`
pub(super) async fn rule_report(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(rule_id): Path<Uuid>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<Json<RuleReport>> {
    let profile = authenticate(&state, &headers).await?;
    let rule = visible_rule(&state, &profile, rule_id).await?;
    let since = Utc::now() - Duration::days(query.resolve(DEFAULT_REPORT_DAYS));
    let report = state.store.rule_report(rule.id, since).await?;
    Ok(Json(report))
}

/// `GET /api/analytics/overview?days=` (admin)
pub(super) async fn analytics_overview(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<Json<AnalyticsOverview>> {
    let profile = authenticate(&state, &headers).await?;
    require_admin(&profile)?;
    let organization_id = require_organization(&profile)?;
    let overview = state
        .store
        .analytics_overview(organization_id, query.resolve(DEFAULT_OVERVIEW_DAYS))
        .await?;
    Ok(Json(overview))
}
