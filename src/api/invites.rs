/// Invite and link-token endpoints
use crate::{
    api::middleware::{AccountAuth, CallerAuth},
    context::AppContext,
    db::models::{Account, TokenRecord},
    error::{HubError, HubResult},
    identity::PlatformPair,
    metrics,
    tokens::{NewToken, TokenKind},
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Build invite routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/v1/invites", post(create_invite).get(list_invites))
        .route("/v1/invites/:code", get(preview_invite))
        .route("/v1/invites/:code/redeem", post(redeem_invite))
        .route("/v1/invites/:code/revoke", post(revoke_invite))
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub kind: String,
    pub subject_hint: String,
    pub email_hint: Option<String>,
    /// Overrides the kind's configured default lifetime
    pub ttl_secs: Option<i64>,
    /// Platform identity a link token will authorize; both or neither
    pub provider: Option<String>,
    pub external_id: Option<String>,
}

/// Issue a new token with the caller as issuer
pub async fn create_invite(
    State(ctx): State<AppContext>,
    auth: AccountAuth,
    Json(req): Json<CreateInviteRequest>,
) -> HubResult<Json<TokenRecord>> {
    let kind = TokenKind::parse(&req.kind)
        .ok_or_else(|| HubError::Validation(format!("Unknown token kind: {}", req.kind)))?;

    let link_target = match (req.provider, req.external_id) {
        (Some(provider), Some(external_id)) => Some(PlatformPair {
            provider,
            external_id,
        }),
        (None, None) => None,
        _ => {
            return Err(HubError::Validation(
                "provider and external_id must be supplied together".to_string(),
            ))
        }
    };

    let token = ctx
        .token_ledger
        .issue(NewToken {
            kind,
            issuer_id: auth.account.account_key,
            subject_hint: req.subject_hint,
            email_hint: req.email_hint,
            ttl: req.ttl_secs.map(Duration::seconds),
            link_target,
        })
        .await?;

    metrics::record_token_issued(kind.as_str());

    Ok(Json(token))
}

#[derive(Debug, Serialize)]
pub struct ListInvitesResponse {
    pub invites: Vec<TokenRecord>,
}

/// List active tokens: admins see all, everyone else their own
pub async fn list_invites(
    State(ctx): State<AppContext>,
    caller: CallerAuth,
) -> HubResult<Json<ListInvitesResponse>> {
    let invites = if caller.is_admin {
        ctx.token_ledger.list_active(None).await?
    } else {
        ctx.token_ledger
            .list_active(Some(&caller.account_key))
            .await?
    };

    Ok(Json(ListInvitesResponse { invites }))
}

/// Public fields shown when previewing an invite
#[derive(Debug, Serialize)]
pub struct InvitePreview {
    pub kind: String,
    pub subject_hint: String,
    pub issuer_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Validate a code and return its public fields
///
/// The code itself is the credential here, so no caller header is required.
pub async fn preview_invite(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
) -> HubResult<Json<InvitePreview>> {
    let token = ctx.token_ledger.validate(&code).await?;

    Ok(Json(InvitePreview {
        kind: token.kind,
        subject_hint: token.subject_hint,
        issuer_id: token.issuer_id,
        expires_at: token.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub account_key: String,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub account: Account,
    pub token_id: String,
    pub kind: String,
}

/// Redeem an invite: ensure the account exists, then burn the token onto it
pub async fn redeem_invite(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
    Json(req): Json<RedeemRequest>,
) -> HubResult<Json<RedeemResponse>> {
    // The account row must exist before the token can bind to it
    let account = ctx.identity_graph.ensure_account(&req.account_key).await?;

    let kind_label = TokenKind::from_code(&code)
        .map(|k| k.as_str())
        .unwrap_or("unknown");

    match ctx.token_ledger.redeem(&code, &account.account_key).await {
        Ok(token) => {
            metrics::record_token_redemption(&token.kind, "used");
            Ok(Json(RedeemResponse {
                account,
                token_id: token.token_id,
                kind: token.kind,
            }))
        }
        Err(e) => {
            metrics::record_token_redemption(kind_label, redemption_failure_label(&e));
            Err(e)
        }
    }
}

/// Revoke a pending token; only its issuer may do this
pub async fn revoke_invite(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
    caller: CallerAuth,
) -> HubResult<Json<TokenRecord>> {
    let token = ctx
        .token_ledger
        .get_by_code(&code)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("No token with code {}", code)))?;

    let revoked = ctx
        .token_ledger
        .revoke(&token.token_id, &caller.account_key)
        .await?;

    metrics::record_token_revoked(&revoked.kind);

    Ok(Json(revoked))
}

fn redemption_failure_label(err: &HubError) -> &'static str {
    match err {
        HubError::NotFound(_) => "not_found",
        HubError::AlreadyUsed => "already_used",
        HubError::Revoked => "revoked",
        HubError::Expired => "expired",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_labels_track_the_error_taxonomy() {
        assert_eq!(
            redemption_failure_label(&HubError::NotFound("x".to_string())),
            "not_found"
        );
        assert_eq!(redemption_failure_label(&HubError::AlreadyUsed), "already_used");
        assert_eq!(redemption_failure_label(&HubError::Revoked), "revoked");
        assert_eq!(redemption_failure_label(&HubError::Expired), "expired");
        assert_eq!(
            redemption_failure_label(&HubError::Internal("boom".to_string())),
            "error"
        );
    }
}
