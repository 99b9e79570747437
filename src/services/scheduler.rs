//! Recurring pipeline runs
//!
//! Runs immediately on startup, then periodically.
//! A failed run is logged and the loop keeps going.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

use crate::services::orchestrator::Orchestrator;

/// Configuration for the schedule
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// How often to run the pipeline (in seconds)
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 3600, // Every 6 hours
        }
    }
}

/// Start the background schedule
///
/// This should be spawned as a background task using `tokio::spawn`.
pub async fn start_schedule(orchestrator: Arc<Orchestrator>, config: ScheduleConfig) {
    let period = Duration::from_secs(config.interval_secs.max(1));
    tracing::info!("Starting pipeline schedule (interval: {}s)", period.as_secs());

    let mut interval = time::interval(period);
    // A long run must not trigger a burst of catch-up runs
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately
        interval.tick().await;

        let summary = orchestrator.run().await;
        if summary.is_success() {
            tracing::info!(
                "Scheduled run {} done: {} entries published",
                summary.run_id,
                summary.published()
            );
        } else {
            tracing::warn!(
                "Scheduled run {} failed: {}",
                summary.run_id,
                summary.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
