/// HTTP server setup and routing
use crate::{
    api::middleware::track_metrics,
    context::AppContext,
    error::{HubError, HubResult},
    metrics,
    rate_limit::rate_limit_middleware,
};
use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    // Create CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-account-key"),
        ]);

    Router::new()
        // Health and service metadata endpoints
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/describe", get(describe_service))
        // Domain API routes
        .merge(crate::api::routes())
        // Per-route so the matched path pattern is available as a label
        .route_layer(middleware::from_fn(track_metrics))
        // Provide state - converts Router<AppContext> to Router<()>
        .with_state(ctx.clone())
        // Apply rate limiting middleware (after state so it can access AppContext)
        .layer(middleware::from_fn_with_state(ctx, rate_limit_middleware))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// Health check handler
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness check: can we serve traffic?
async fn readiness_check(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = sqlx::query("SELECT 1").fetch_one(&ctx.hub_db).await {
        tracing::warn!(error = %e, "readiness_check_failed: database check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(json!({
        "status": "ready",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// Prometheus metrics in text exposition format
async fn metrics_endpoint() -> String {
    metrics::render_metrics()
}

/// Service description handler
async fn describe_service(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "propel-hub",
        "version": ctx.config.service.version,
        "invites": {
            "kinds": ["startup_invite", "team_invite", "platform_link"],
            "startup_ttl_secs": ctx.config.invites.startup_ttl_secs,
            "team_ttl_secs": ctx.config.invites.team_ttl_secs,
            "link_ttl_secs": ctx.config.invites.link_ttl_secs,
        },
        "quota": {
            "free_daily_limit": ctx.config.quota.free_daily_limit,
            "pro_daily_limit": ctx.config.quota.pro_daily_limit,
        }
    }))
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server
pub async fn serve(ctx: AppContext) -> HubResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("🚀 Propel Hub listening on {}", addr);
    info!("   Service URL: {}", ctx.service_url());

    let app = build_router(ctx);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| HubError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| HubError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AdminConfig, InviteConfig, LoggingConfig, QuotaConfig, RateLimitConfig, ServerConfig,
        ServiceConfig, StorageConfig,
    };
    use crate::db::testing::memory_pool;
    use crate::identity::IdentityGraph;
    use crate::quota::QuotaTracker;
    use crate::rate_limit::{RateLimitSettings, RateLimiter};
    use crate::subscriptions::SubscriptionRegistry;
    use crate::tokens::TokenLedger;
    use std::path::PathBuf;
    use std::sync::Arc;

    async fn test_context() -> AppContext {
        let pool = memory_pool().await;
        let config = ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 0,
                version: "test".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                hub_db: PathBuf::from("./data/hub.sqlite"),
            },
            invites: InviteConfig {
                startup_ttl_secs: 2_592_000,
                team_ttl_secs: 604_800,
                link_ttl_secs: 3_600,
            },
            quota: QuotaConfig {
                free_daily_limit: 50,
                pro_daily_limit: None,
                usage_retention_days: 90,
            },
            admin: AdminConfig {
                admin_keys: vec!["admin:root".to_string()],
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                global_requests_per_minute: 3000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        };

        let ledger = TokenLedger::new(pool.clone(), config.invites.clone());
        let graph = IdentityGraph::new(pool.clone(), ledger.clone());
        let registry = SubscriptionRegistry::new(pool.clone());
        let tracker = QuotaTracker::new(
            pool.clone(),
            graph.clone(),
            registry.clone(),
            config.quota.clone(),
        );

        AppContext {
            config: Arc::new(config),
            hub_db: pool,
            token_ledger: Arc::new(ledger),
            identity_graph: Arc::new(graph),
            subscription_registry: Arc::new(registry),
            quota_tracker: Arc::new(tracker),
            rate_limiter: Arc::new(RateLimiter::new(RateLimitSettings::default())),
        }
    }

    // Conflicting routes panic when the router is assembled
    #[tokio::test]
    async fn router_assembles_without_route_conflicts() {
        let ctx = test_context().await;
        let _app = build_router(ctx);
    }
}
