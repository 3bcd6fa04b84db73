/// Propel Hub - accelerator platform core
///
/// Canonical identity, single-use invite and link tokens, daily usage
/// metering and subscription tiers behind one JSON-over-HTTP service.

mod api;
mod config;
mod context;
mod db;
mod error;
mod identity;
mod jobs;
mod metrics;
mod quota;
mod rate_limit;
mod server;
mod subscriptions;
mod tokens;

use config::ServerConfig;
use context::AppContext;
use error::HubResult;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> HubResult<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Print banner
    print_banner();

    // Create application context
    let ctx = AppContext::new(config).await?;
    let ctx = Arc::new(ctx);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ____                        __   __  __      __
   / __ \_________  ____  ___  / /  / / / /_  __/ /_
  / /_/ / ___/ __ \/ __ \/ _ \/ /  / /_/ / / / / __ \
 / ____/ /  / /_/ / /_/ /  __/ /  / __  / /_/ / /_/ /
/_/   /_/   \____/ .___/\___/_/  /_/ /_/\__,_/_.___/
                /_/

        Accelerator Platform Core v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
