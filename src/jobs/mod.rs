use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Scheduler for the periodic reconciliation sweeps
///
/// Each job runs on its own timer and completes before its next firing;
/// a failed run (including an unparseable duration property) is logged
/// and aborted without touching the other jobs.
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all reconciliation jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting reconciliation scheduler");

        tokio::spawn(Self::expire_unverified_job(Arc::clone(&self)));
        tokio::spawn(Self::activation_reminder_job(Arc::clone(&self)));
        tokio::spawn(Self::auto_unblock_job(Arc::clone(&self)));

        info!("Reconciliation jobs started");
    }

    /// Delete registrations that never activated in time
    async fn expire_unverified_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(
            scheduler.context.config.scheduler.expire_interval_secs,
        ));

        loop {
            interval.tick().await;

            match tasks::expire_unverified_registrations(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Removed {} expired registrations", count);
                    }
                }
                Err(e) => error!("Registration expiry sweep aborted: {}", e),
            }
        }
    }

    /// Remind owners of stale unactivated registrations, once
    async fn activation_reminder_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(
            scheduler.context.config.scheduler.reminder_interval_secs,
        ));

        loop {
            interval.tick().await;

            match tasks::resend_activation_reminders(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Sent {} activation reminders", count);
                    }
                }
                Err(e) => error!("Activation reminder sweep aborted: {}", e),
            }
        }
    }

    /// Lift failed-login blocks whose window has elapsed
    async fn auto_unblock_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(
            scheduler.context.config.scheduler.unblock_interval_secs,
        ));

        loop {
            interval.tick().await;

            match tasks::auto_unblock_expired(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Auto-unblocked {} accounts", count);
                    }
                }
                Err(e) => error!("Auto-unblock sweep aborted: {}", e),
            }
        }
    }
}
