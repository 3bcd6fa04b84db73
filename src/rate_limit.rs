/// Transport-level rate limiting
use crate::error::{HubError, HubResult};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

/// Per-class request budgets, derived from the single global knob
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Requests per minute for requests carrying an account key
    pub account_rpm: u32,
    /// Requests per minute for anonymous requests
    pub anonymous_rpm: u32,
    /// Requests per minute for admin endpoints
    pub admin_rpm: u32,
    /// Burst size
    pub burst_size: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self::from_global(3000)
    }
}

impl RateLimitSettings {
    /// Split a global requests-per-minute budget across the three classes.
    /// Admin traffic gets the full budget, account traffic a fifth of it,
    /// anonymous traffic a twenty-fifth.
    pub fn from_global(global_rpm: u32) -> Self {
        Self {
            account_rpm: (global_rpm / 5).max(1),
            anonymous_rpm: (global_rpm / 25).max(1),
            admin_rpm: global_rpm.max(1),
            burst_size: 50,
        }
    }
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    account: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    anonymous: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    admin: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    account_rpm: u32,
    anonymous_rpm: u32,
    admin_rpm: u32,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        let account_quota = Quota::per_minute(
            NonZeroU32::new(settings.account_rpm).unwrap_or(NonZeroU32::new(600).unwrap()),
        )
        .allow_burst(NonZeroU32::new(settings.burst_size).unwrap_or(NonZeroU32::new(50).unwrap()));

        let anonymous_quota = Quota::per_minute(
            NonZeroU32::new(settings.anonymous_rpm).unwrap_or(NonZeroU32::new(120).unwrap()),
        )
        .allow_burst(
            NonZeroU32::new(settings.burst_size / 5).unwrap_or(NonZeroU32::new(10).unwrap()),
        );

        let admin_quota = Quota::per_minute(
            NonZeroU32::new(settings.admin_rpm).unwrap_or(NonZeroU32::new(3000).unwrap()),
        )
        .allow_burst(
            NonZeroU32::new(settings.burst_size * 2).unwrap_or(NonZeroU32::new(100).unwrap()),
        );

        Self {
            account: Arc::new(GovernorLimiter::direct(account_quota)),
            anonymous: Arc::new(GovernorLimiter::direct(anonymous_quota)),
            admin: Arc::new(GovernorLimiter::direct(admin_quota)),
            account_rpm: settings.account_rpm,
            anonymous_rpm: settings.anonymous_rpm,
            admin_rpm: settings.admin_rpm,
        }
    }

    /// Check rate limit for a request carrying an account key
    pub fn check_account(&self) -> HubResult<()> {
        match self.account.check() {
            Ok(_) => Ok(()),
            Err(_) => Err(HubError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            }),
        }
    }

    /// Check rate limit for an anonymous request
    pub fn check_anonymous(&self) -> HubResult<()> {
        match self.anonymous.check() {
            Ok(_) => Ok(()),
            Err(_) => Err(HubError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            }),
        }
    }

    /// Check rate limit for an admin request
    pub fn check_admin(&self) -> HubResult<()> {
        match self.admin.check() {
            Ok(_) => Ok(()),
            Err(_) => Err(HubError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            }),
        }
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !ctx.config.rate_limit.enabled {
        return Ok(next.run(request).await);
    }

    let is_admin = request.uri().path().starts_with("/v1/admin");
    let has_account_key = request.headers().get("x-account-key").is_some();

    let (rate_limit_result, limit) = if is_admin {
        (ctx.rate_limiter.check_admin(), ctx.rate_limiter.admin_rpm)
    } else if has_account_key {
        (
            ctx.rate_limiter.check_account(),
            ctx.rate_limiter.account_rpm,
        )
    } else {
        (
            ctx.rate_limiter.check_anonymous(),
            ctx.rate_limiter.anonymous_rpm,
        )
    };

    match rate_limit_result {
        Ok(_) => {
            let mut response = next.run(request).await;

            let headers = response.headers_mut();
            if let Ok(value) = limit.to_string().parse() {
                headers.insert("X-RateLimit-Limit", value);
            }

            Ok(response)
        }
        Err(_) => Err(StatusCode::TOO_MANY_REQUESTS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let settings = RateLimitSettings::default();
        let limiter = RateLimiter::new(settings);

        // Should allow first request
        assert!(limiter.check_account().is_ok());
        assert!(limiter.check_anonymous().is_ok());
        assert!(limiter.check_admin().is_ok());
    }

    #[test]
    fn test_burst_limit() {
        let settings = RateLimitSettings {
            account_rpm: 10,
            anonymous_rpm: 5,
            admin_rpm: 100,
            burst_size: 5,
        };
        let limiter = RateLimiter::new(settings);

        // Should allow burst requests
        for _ in 0..5 {
            assert!(limiter.check_account().is_ok());
        }

        // Should hit rate limit after burst
        assert!(limiter.check_account().is_err());
    }

    #[test]
    fn test_global_budget_split() {
        let settings = RateLimitSettings::from_global(3000);
        assert_eq!(settings.admin_rpm, 3000);
        assert_eq!(settings.account_rpm, 600);
        assert_eq!(settings.anonymous_rpm, 120);

        // A tiny budget never rounds a class down to zero
        let tiny = RateLimitSettings::from_global(3);
        assert!(tiny.account_rpm >= 1);
        assert!(tiny.anonymous_rpm >= 1);
    }
}
