use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::metrics;

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
    started_at: Instant,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self {
            context,
            started_at: Instant::now(),
        }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::token_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::usage_prune_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Flip long-expired pending tokens to their terminal state (runs every hour)
    ///
    /// Correctness never depends on this; reads already treat stale pending
    /// tokens as expired. The sweep only keeps listings small.
    async fn token_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600)); // Every hour

        loop {
            interval.tick().await;
            info!("Running expired token sweep");

            let start = Instant::now();
            match tasks::sweep_expired_tokens(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Swept {} expired tokens", count);
                    } else {
                        info!("Token sweep: nothing to flip");
                    }
                    metrics::record_background_job(
                        "token_sweep",
                        "success",
                        start.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => {
                    error!("Failed to sweep expired tokens: {}", e);
                    metrics::record_background_job(
                        "token_sweep",
                        "failure",
                        start.elapsed().as_secs_f64(),
                    );
                }
            }
        }
    }

    /// Prune usage records past the retention horizon (runs daily)
    async fn usage_prune_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(86400)); // Every 24 hours

        loop {
            interval.tick().await;
            info!("Running usage record prune");

            let start = Instant::now();
            match tasks::prune_usage_records(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Pruned {} old usage records", count);
                    } else {
                        info!("Usage prune: nothing past retention");
                    }
                    metrics::record_background_job(
                        "usage_prune",
                        "success",
                        start.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => {
                    error!("Failed to prune usage records: {}", e);
                    metrics::record_background_job(
                        "usage_prune",
                        "failure",
                        start.elapsed().as_secs_f64(),
                    );
                }
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300)); // Every 5 minutes

        loop {
            interval.tick().await;

            metrics::UPTIME_SECONDS.set(scheduler.started_at.elapsed().as_secs_f64());

            match tasks::health_check(&scheduler.context).await {
                Ok(_) => {
                    // Silent success - health is good
                }
                Err(e) => error!("Health check failed: {}", e),
            }
        }
    }
}
