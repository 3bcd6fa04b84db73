/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    db,
    error::HubResult,
    identity::IdentityGraph,
    quota::QuotaTracker,
    rate_limit::{RateLimitSettings, RateLimiter},
    subscriptions::SubscriptionRegistry,
    tokens::TokenLedger,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub hub_db: SqlitePool,
    pub token_ledger: Arc<TokenLedger>,
    pub identity_graph: Arc<IdentityGraph>,
    pub subscription_registry: Arc<SubscriptionRegistry>,
    pub quota_tracker: Arc<QuotaTracker>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> HubResult<Self> {
        // Validate configuration
        config.validate()?;

        // Initialize the hub database; create_pool makes the parent
        // directory as needed
        let hub_db = db::create_pool(&config.storage.hub_db, db::DatabaseOptions::default()).await?;

        // Run migrations
        db::run_migrations(&hub_db).await?;

        // Test connection
        db::test_connection(&hub_db).await?;

        // Wire up the domain managers. The graph owns a ledger handle so
        // linking can consume tokens; the tracker reads tiers through the
        // registry on every check.
        let token_ledger = TokenLedger::new(hub_db.clone(), config.invites.clone());
        let identity_graph = IdentityGraph::new(hub_db.clone(), token_ledger.clone());
        let subscription_registry = SubscriptionRegistry::new(hub_db.clone());
        let quota_tracker = QuotaTracker::new(
            hub_db.clone(),
            identity_graph.clone(),
            subscription_registry.clone(),
            config.quota.clone(),
        );

        // Initialize rate limiter from the global budget
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitSettings::from_global(
            config.rate_limit.global_requests_per_minute,
        )));

        Ok(Self {
            config: Arc::new(config),
            hub_db,
            token_ledger: Arc::new(token_ledger),
            identity_graph: Arc::new(identity_graph),
            subscription_registry: Arc::new(subscription_registry),
            quota_tracker: Arc::new(quota_tracker),
            rate_limiter,
        })
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
