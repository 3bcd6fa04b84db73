/// Identity endpoints: account creation, resolution and platform linking
use crate::{
    api::middleware::AccountAuth,
    context::AppContext,
    db::models::{Account, PlatformLink},
    error::{HubError, HubResult},
    identity::{AccountIdentifier, PlatformPair},
    metrics,
};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build identity routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/v1/accounts", post(create_account))
        .route("/v1/identity/resolve", get(resolve_identity))
        .route("/v1/identity/link", post(link_platform))
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub account_key: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account: Account,
    pub links: Vec<PlatformLink>,
}

/// Idempotent create-or-get for an account
pub async fn create_account(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateAccountRequest>,
) -> HubResult<Json<AccountResponse>> {
    let account = ctx.identity_graph.ensure_account(&req.account_key).await?;
    let links = ctx
        .identity_graph
        .links_for_account(&account.account_key)
        .await?;

    Ok(Json(AccountResponse { account, links }))
}

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    /// Primary key lookup
    pub key: Option<String>,
    /// Platform pair lookup; both or neither
    pub provider: Option<String>,
    pub external_id: Option<String>,
}

/// Resolve an identifier to its canonical account
///
/// Exactly one identifier form must be supplied: either `key`, or the
/// `provider`/`external_id` pair. Resolution never creates an account.
pub async fn resolve_identity(
    State(ctx): State<AppContext>,
    Query(params): Query<ResolveParams>,
) -> HubResult<Json<AccountResponse>> {
    let identifier = match (params.key, params.provider, params.external_id) {
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

    let account = ctx.identity_graph.resolve_required(&identifier).await?;
    let links = ctx
        .identity_graph
        .links_for_account(&account.account_key)
        .await?;

    Ok(Json(AccountResponse { account, links }))
}

#[derive(Debug, Deserialize)]
pub struct LinkPlatformRequest {
    pub provider: String,
    pub external_id: String,
    /// Link token code authorizing this pair
    pub code: String,
}

/// Attach a platform identity to the caller's account, consuming a link token
pub async fn link_platform(
    State(ctx): State<AppContext>,
    auth: AccountAuth,
    Json(req): Json<LinkPlatformRequest>,
) -> HubResult<Json<PlatformLink>> {
    let pair = PlatformPair {
        provider: req.provider,
        external_id: req.external_id,
    };

    let link = ctx
        .identity_graph
        .link_platform(&auth.account.account_key, &pair, &req.code)
        .await?;

    metrics::record_platform_link(&link.provider);

    Ok(Json(link))
}
