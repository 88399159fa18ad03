//! Rollout sweeper worker.
//!
//! Periodically re-attaches poll and teardown tasks to projects that have
//! none: after a process restart, or if a task died. Attachment is
//! idempotent, so sweeping over healthy state is free.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::monitor::RolloutMonitor;

pub struct RolloutSweeper {
    monitor: Arc<RolloutMonitor>,
    interval: Duration,
}

impl RolloutSweeper {
    pub fn new(monitor: Arc<RolloutMonitor>, interval: Duration) -> Self {
        Self { monitor, interval }
    }

    /// Run the sweeper until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting rollout sweeper");

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // first tick completes immediately

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.monitor.resume().await {
                        error!(error = %e, "Rollout sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Rollout sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
