/// Background task implementations
use crate::{context::AppContext, error::HubResult, metrics};

/// Flip expired pending tokens to the stored `expired` state
pub async fn sweep_expired_tokens(ctx: &AppContext) -> HubResult<u64> {
    let flipped = ctx.token_ledger.sweep_expired().await?;

    // Refresh the pending gauge while we are here
    let pending = ctx.token_ledger.list_active(None).await?.len() as i64;
    metrics::TOKENS_PENDING.set(pending);

    Ok(flipped)
}

/// Delete usage records older than the retention window
pub async fn prune_usage_records(ctx: &AppContext) -> HubResult<u64> {
    ctx.quota_tracker.prune_usage().await
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> HubResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.hub_db).await?;

    Ok(())
}
