/// Billing ingest and subscription endpoints
use crate::{
    api::middleware::{AdminAuth, CallerAuth},
    context::AppContext,
    db::models::Subscription,
    error::{HubError, HubResult},
    metrics,
    subscriptions::Tier,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Build billing routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/v1/billing/events", post(ingest_billing_event))
        .route("/v1/subscriptions/:key", get(get_subscription))
        .route("/v1/admin/subscriptions", get(admin_subscriptions))
}

#[derive(Debug, Deserialize)]
pub struct BillingEventRequest {
    /// One of payment_confirmed, subscription_cancelled, downgrade
    pub event: String,
    pub account_key: String,
    /// Paid-through instant for payment_confirmed
    pub expires_at: Option<DateTime<Utc>>,
}

/// Apply an already-verified billing event to the registry
///
/// Gateway signature checking happens upstream; by the time an event
/// reaches this endpoint it is trusted.
pub async fn ingest_billing_event(
    State(ctx): State<AppContext>,
    _auth: AdminAuth,
    Json(req): Json<BillingEventRequest>,
) -> HubResult<Json<Subscription>> {
    let subscription = match req.event.as_str() {
        "payment_confirmed" => {
            ctx.subscription_registry
                .set_tier(&req.account_key, Tier::Pro, req.expires_at)
                .await?
        }
        "subscription_cancelled" => {
            ctx.subscription_registry
                .cancel(&req.account_key)
                .await?
        }
        "downgrade" => {
            ctx.subscription_registry
                .set_tier(&req.account_key, Tier::Free, None)
                .await?
        }
        other => {
            return Err(HubError::Validation(format!(
                "Unknown billing event: {}",
                other
            )))
        }
    };

    info!(
        account = %req.account_key,
        event = %req.event,
        "Billing event applied"
    );
    metrics::record_billing_event(&req.event);

    Ok(Json(subscription))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub account_key: String,
    pub effective_tier: Tier,
    pub subscription: Option<Subscription>,
}

/// Effective tier plus the stored record, if any
pub async fn get_subscription(
    State(ctx): State<AppContext>,
    caller: CallerAuth,
    Path(key): Path<String>,
) -> HubResult<Json<SubscriptionResponse>> {
    if key != caller.account_key && !caller.is_admin {
        return Err(HubError::Authorization(
            "Cannot read another account's subscription".to_string(),
        ));
    }

    ctx.identity_graph
        .get_account(&key)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("No account {}", key)))?;

    let effective_tier = ctx.subscription_registry.effective_tier(&key).await?;
    let subscription = ctx.subscription_registry.get_subscription(&key).await?;

    Ok(Json(SubscriptionResponse {
        account_key: key,
        effective_tier,
        subscription,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AdminSubscriptionsParams {
    /// Restrict to records whose effective tier matches
    pub tier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionRow {
    pub effective_tier: Tier,
    #[serde(flatten)]
    pub subscription: Subscription,
}

#[derive(Debug, Serialize)]
pub struct AdminSubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionRow>,
}

/// Listing view over subscription records
pub async fn admin_subscriptions(
    State(ctx): State<AppContext>,
    _auth: AdminAuth,
    Query(params): Query<AdminSubscriptionsParams>,
) -> HubResult<Json<AdminSubscriptionsResponse>> {
    let tier_filter = match params.tier.as_deref() {
        Some(s) => Some(
            Tier::parse(s).ok_or_else(|| HubError::Validation(format!("Unknown tier: {}", s)))?,
        ),
        None => None,
    };

    let subscriptions = ctx
        .subscription_registry
        .list(tier_filter)
        .await?
        .into_iter()
        .map(|(subscription, effective_tier)| SubscriptionRow {
            effective_tier,
            subscription,
        })
        .collect();

    Ok(Json(AdminSubscriptionsResponse { subscriptions }))
}
