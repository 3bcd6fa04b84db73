/// Usage metering endpoints
use crate::{
    api::middleware::{AdminAuth, CallerAuth},
    context::AppContext,
    error::{HubError, HubResult},
    identity::{AccountIdentifier, PlatformPair},
    quota::{day_bucket, QuotaDecision},
    subscriptions::Tier,
};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Build usage routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/v1/usage/check", post(check_usage))
        .route("/v1/usage/today", get(usage_today))
        .route("/v1/admin/usage", get(admin_usage))
}

#[derive(Debug, Deserialize)]
pub struct CheckUsageRequest {
    /// Primary key form
    pub key: Option<String>,
    /// Platform pair form; both or neither
    pub provider: Option<String>,
    pub external_id: Option<String>,
}

/// The metering gate: resolve the identifier and spend one request
///
/// Exhausted quotas surface as 429 through the error type.
pub async fn check_usage(
    State(ctx): State<AppContext>,
    Json(req): Json<CheckUsageRequest>,
) -> HubResult<Json<QuotaDecision>> {
    let identifier = match (req.key, req.provider, req.external_id) {
        (Some(key), None, None) => AccountIdentifier::Key(key),
        (None, Some(provider), Some(external_id)) => {
            AccountIdentifier::Platform(PlatformPair {
                provider,
                external_id,
            })
        }
        _ => {
            return Err(HubError::Validation(
                "Supply either key or provider+external_id".to_string(),
            ))
        }
    };

    let decision = ctx.quota_tracker.check_identifier(&identifier).await?;

    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
pub struct UsageTodayParams {
    /// Another account's usage; admin only
    pub key: Option<String>,
}

/// Read-only view of the current day's usage, without spending a request
pub async fn usage_today(
    State(ctx): State<AppContext>,
    caller: CallerAuth,
    Query(params): Query<UsageTodayParams>,
) -> HubResult<Json<QuotaDecision>> {
    let target = params.key.unwrap_or_else(|| caller.account_key.clone());

    if target != caller.account_key && !caller.is_admin {
        return Err(HubError::Authorization(
            "Cannot read another account's usage".to_string(),
        ));
    }

    ctx.identity_graph
        .get_account(&target)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("No account {}", target)))?;

    let decision = ctx.quota_tracker.current_usage(&target).await?;

    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
pub struct AdminUsageParams {
    /// Day bucket to report on; defaults to today
    pub bucket: Option<i64>,
    /// Restrict to accounts whose effective tier matches
    pub tier: Option<String>,
    /// Keep only the N busiest accounts
    pub top: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UsageReportRow {
    pub account_key: String,
    pub day_bucket: i64,
    pub requests_used: i64,
    pub limit_snapshot: Option<i64>,
    pub effective_tier: Tier,
}

#[derive(Debug, Serialize)]
pub struct AdminUsageResponse {
    pub bucket: i64,
    pub rows: Vec<UsageReportRow>,
}

/// Reporting view over usage records
pub async fn admin_usage(
    State(ctx): State<AppContext>,
    _auth: AdminAuth,
    Query(params): Query<AdminUsageParams>,
) -> HubResult<Json<AdminUsageResponse>> {
    let bucket = params.bucket.unwrap_or_else(|| day_bucket(Utc::now()));

    let tier_filter = match params.tier.as_deref() {
        Some(s) => Some(
            Tier::parse(s).ok_or_else(|| HubError::Validation(format!("Unknown tier: {}", s)))?,
        ),
        None => None,
    };

    let rows = ctx
        .quota_tracker
        .list_usage(bucket, tier_filter, params.top)
        .await?
        .into_iter()
        .map(|(record, effective_tier)| UsageReportRow {
            account_key: record.account_key,
            day_bucket: record.day_bucket,
            requests_used: record.requests_used,
            limit_snapshot: record.limit_snapshot,
            effective_tier,
        })
        .collect();

    Ok(Json(AdminUsageResponse { bucket, rows }))
}
