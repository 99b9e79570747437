//! Prometheus metrics for pipeline runs
//!
//! Registered in the default registry and served by `GET /metrics`.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGauge, IntGaugeVec,
};

use crate::error::Result;
use crate::models::{RunState, RunSummary, Verdict};
use crate::services::orchestrator::StageObserver;

lazy_static::lazy_static! {
    /// Finished runs by final state
    static ref RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "iptv_pipeline_runs_total",
        "Pipeline runs by final state",
        &["state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Time spent in each stage
    static ref STAGE_DURATION: HistogramVec = register_histogram_vec!(
        "iptv_pipeline_stage_duration_seconds",
        "Time spent in each pipeline stage",
        &["stage"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Whether a run is in progress
    static ref RUN_IN_PROGRESS: IntGauge = register_int_gauge!(
        "iptv_pipeline_run_in_progress",
        "1 while a pipeline run is executing"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Verdict counts from the last finished run
    static ref LAST_RUN_VERDICTS: IntGaugeVec = register_int_gauge_vec!(
        "iptv_pipeline_last_run_verdicts",
        "Verdicts assigned in the last run",
        &["verdict"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Entries published per tier in the last successful run
    static ref PUBLISHED_ENTRIES: IntGaugeVec = register_int_gauge_vec!(
        "iptv_pipeline_published_entries",
        "Entries in each published playlist",
        &["tier"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Duplicates removed in the last run
    static ref LAST_RUN_DUPLICATES: IntGauge = register_int_gauge!(
        "iptv_pipeline_last_run_duplicates_removed",
        "Duplicate entries removed in the last run"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Unix timestamp (ms) of the last successful run
    static ref LAST_SUCCESS_TIMESTAMP: IntGauge = register_int_gauge!(
        "iptv_pipeline_last_success_timestamp_ms",
        "Finish time of the last successful run"
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Default observer: records transitions and outcomes as metrics
#[derive(Debug, Default)]
pub struct MetricsObserver;

impl StageObserver for MetricsObserver {
    fn on_transition(&self, from: Option<RunState>, to: RunState, summary: &RunSummary) -> Result<()> {
        if from.is_none() {
            RUN_IN_PROGRESS.set(1);
        }
        tracing::debug!(run_id = %summary.run_id, to = %to, "Stage transition");
        Ok(())
    }

    fn on_finish(&self, summary: &RunSummary) {
        RUN_IN_PROGRESS.set(0);
        RUNS_TOTAL.with_label_values(&[summary.state.as_str()]).inc();

        for (stage, ms) in &summary.stage_millis {
            STAGE_DURATION
                .with_label_values(&[stage.as_str()])
                .observe(*ms as f64 / 1000.0);
        }

        for verdict in Verdict::ALL {
            let count = match verdict {
                Verdict::Playable => summary.verdicts.playable,
                Verdict::Unreachable => summary.verdicts.unreachable,
                Verdict::TimedOut => summary.verdicts.timed_out,
                Verdict::Malformed => summary.verdicts.malformed,
            };
            LAST_RUN_VERDICTS
                .with_label_values(&[verdict.as_str()])
                .set(count as i64);
        }
        LAST_RUN_DUPLICATES.set(summary.duplicates_removed as i64);

        if summary.is_success() {
            for tier in &summary.tiers {
                PUBLISHED_ENTRIES
                    .with_label_values(&[tier.tier.as_str()])
                    .set(tier.entries as i64);
            }
            if let Some(finished) = summary.finished_at {
                LAST_SUCCESS_TIMESTAMP.set(finished);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TierReport;

    #[test]
    fn test_finish_records_run() {
        let observer = MetricsObserver;
        let mut summary = RunSummary::new("metrics-test".to_string());
        observer.on_transition(None, RunState::Scraping, &summary).unwrap();
        assert_eq!(RUN_IN_PROGRESS.get(), 1);

        summary.state = RunState::Done;
        summary.finished_at = Some(42);
        summary.tiers.push(TierReport {
            tier: "metrics-test-tier".to_string(),
            file: "metrics-test-tier.m3u".to_string(),
            entries: 7,
        });
        let before = RUNS_TOTAL.with_label_values(&["done"]).get();
        observer.on_finish(&summary);

        assert_eq!(RUN_IN_PROGRESS.get(), 0);
        assert_eq!(RUNS_TOTAL.with_label_values(&["done"]).get(), before + 1);
        assert_eq!(PUBLISHED_ENTRIES.with_label_values(&["metrics-test-tier"]).get(), 7);
    }
}
