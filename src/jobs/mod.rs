use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::identity_watchdog_job(Arc::clone(&self)));
        tokio::spawn(Self::rate_limit_sweep_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Identity self-check on the configured interval (first run after one period)
    async fn identity_watchdog_job(scheduler: Arc<Self>) {
        let period = scheduler.context.config.identity.check_interval;
        let mut interval = interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let started = Instant::now();

            match tasks::run_identity_check(&scheduler.context).await {
                Ok(status) => {
                    crate::metrics::record_background_job(
                        "identity_check",
                        "success",
                        started.elapsed().as_secs_f64(),
                    );
                    tracing::debug!("Identity check finished with status {}", status);
                }
                Err(e) => {
                    crate::metrics::record_background_job(
                        "identity_check",
                        "failure",
                        started.elapsed().as_secs_f64(),
                    );
                    error!("Identity check failed, retrying next interval: {}", e);
                }
            }
        }
    }

    /// Drop idle rate-limit buckets
    async fn rate_limit_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(scheduler.context.config.rate_limit.sweep_interval);

        loop {
            interval.tick().await;
            let started = Instant::now();

            let removed = tasks::sweep_rate_limit_buckets(&scheduler.context);
            crate::metrics::record_background_job(
                "rate_limit_sweep",
                "success",
                started.elapsed().as_secs_f64(),
            );
            if removed > 0 {
                tracing::debug!(
                    "Evicted {} idle rate limit buckets, {} remain",
                    removed,
                    scheduler.context.rate_limiter.len()
                );
            }
        }
    }
}
