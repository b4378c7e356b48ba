//! Fixed-interval cycle driver.
//!
//! Runs one cycle at startup, then one per interval tick. Cycles never
//! overlap: the loop awaits the running cycle, and ticks that elapse
//! meanwhile are skipped, not queued. Each cycle runs under its own child
//! token and a wall-clock timeout.

use std::sync::Arc;
use std::time::Duration;

use adapters::Adapter;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::manager::SyncManager;

pub struct Scheduler {
    interval: Duration,
    cycle_timeout: Duration,
    adapters: Vec<Arc<dyn Adapter>>,
}

impl Scheduler {
    pub fn new(
        interval: Duration,
        cycle_timeout: Duration,
        adapters: Vec<Arc<dyn Adapter>>,
    ) -> Self {
        Self {
            interval,
            cycle_timeout,
            adapters,
        }
    }

    /// Drive cycles until the token trips. Blocks the calling task.
    pub async fn run(&self, manager: &mut SyncManager, cancel: &CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        info!("Running initial sync");
        self.run_one(manager, cancel).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a fresh interval completes immediately; the
        // initial sync already covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    info!("Running scheduled sync");
                    self.run_one(manager, cancel).await;
                }
            }
        }
    }

    async fn run_one(&self, manager: &mut SyncManager, cancel: &CancellationToken) {
        let cycle_cancel = cancel.child_token();
        let cycle = manager.run_cycle(&self.adapters, &cycle_cancel);

        match tokio::time::timeout(self.cycle_timeout, cycle).await {
            Ok(Ok(report)) => {
                info!(
                    uploaded = report.uploaded,
                    skipped = report.skipped,
                    orphans_removed = report.orphans_removed,
                    errors = report.errors.len(),
                    "Cycle completed"
                );
            }
            Ok(Err(e)) => {
                error!(error = %e, "Cycle failed");
            }
            Err(_) => {
                cycle_cancel.cancel();
                warn!(
                    timeout_secs = self.cycle_timeout.as_secs(),
                    "Cycle timed out, abandoning until next tick"
                );
            }
        }
    }
}
