/// Caller identification middleware and extractors
///
/// Transport authentication lives in the fronting layer; requests arrive
/// here with the caller's key already verified and injected as
/// `X-Account-Key`. These extractors only read it and classify the caller.
use crate::{context::AppContext, db::models::Account, error::HubError, metrics};
use axum::{
    async_trait,
    extract::{FromRequestParts, MatchedPath, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Extract the caller's account key from the X-Account-Key header
pub fn extract_account_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-account-key")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Caller identity as asserted by the fronting auth layer
#[derive(Debug, Clone)]
pub struct CallerAuth {
    pub account_key: String,
    pub is_admin: bool,
}

#[async_trait]
impl FromRequestParts<AppContext> for CallerAuth {
    type Rejection = HubError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let account_key = extract_account_key(&parts.headers)
            .ok_or_else(|| HubError::Authentication("Missing X-Account-Key header".to_string()))?;

        let is_admin = state.config.admin.admin_keys.contains(&account_key);

        Ok(CallerAuth {
            account_key,
            is_admin,
        })
    }
}

/// Caller bound to an existing account record
#[derive(Debug, Clone)]
pub struct AccountAuth {
    pub account: Account,
}

#[async_trait]
impl FromRequestParts<AppContext> for AccountAuth {
    type Rejection = HubError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let caller = CallerAuth::from_request_parts(parts, state).await?;

        let account = state
            .identity_graph
            .get_account(&caller.account_key)
            .await?
            .ok_or_else(|| HubError::Authentication("Unknown account key".to_string()))?;

        Ok(AccountAuth { account })
    }
}

/// Admin caller - the key must appear in the configured admin list
#[derive(Debug, Clone)]
pub struct AdminAuth {
    pub account_key: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuth {
    type Rejection = HubError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let caller = CallerAuth::from_request_parts(parts, state).await?;

        if !caller.is_admin {
            return Err(HubError::Authorization("Admin access required".to_string()));
        }

        Ok(AdminAuth {
            account_key: caller.account_key,
        })
    }
}

/// Request metrics middleware
///
/// Labels use the matched route pattern rather than the raw path so that
/// codes and account keys never end up as metric label values.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn account_key_read_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-account-key", HeaderValue::from_static("acct:alice"));
        assert_eq!(extract_account_key(&headers), Some("acct:alice".to_string()));
    }

    #[test]
    fn blank_or_missing_header_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_account_key(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert("x-account-key", HeaderValue::from_static("   "));
        assert_eq!(extract_account_key(&headers), None);
    }
}
