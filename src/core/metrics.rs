//! Metrics collection for the bot using Prometheus
//!
//! This module provides a centralized metrics registry for tracking:
//! - Pipeline outcomes by media kind and failing stage
//! - Fetch retries
//! - Encoder execution time
//! - Bytes saved by compression

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_gauge, Counter, CounterVec,
    HistogramVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Finished pipeline runs
    /// Labels: kind (video/animation/document/audio), outcome (success/failure)
    pub static ref PIPELINE_RUNS_TOTAL: CounterVec = register_counter_vec!(
        "kompressor_pipeline_runs_total",
        "Total number of finished pipeline runs",
        &["kind", "outcome"]
    )
    .unwrap();

    /// Failed runs by stage
    /// Labels: stage (fetching/encoding/delivering)
    pub static ref STAGE_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "kompressor_stage_failures_total",
        "Total number of pipeline failures by stage",
        &["stage"]
    )
    .unwrap();

    /// Retry attempts
    /// Labels: attempt (attempt number that failed)
    pub static ref TASK_RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "kompressor_task_retries_total",
        "Total number of retried attempts",
        &["attempt"]
    )
    .unwrap();

    /// ffmpeg execution duration
    /// Labels: profile (remux/compress/audio)
    pub static ref ENCODE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "kompressor_encode_duration_seconds",
        "Time spent executing ffmpeg",
        &["profile"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    )
    .unwrap();

    /// Bytes saved by compression across all successful runs
    pub static ref BYTES_SAVED_TOTAL: Counter = register_counter!(
        "kompressor_bytes_saved_total",
        "Total number of bytes saved by compression"
    )
    .unwrap();

    /// Runs currently in flight
    pub static ref ACTIVE_JOBS: IntGauge = register_int_gauge!(
        "kompressor_active_jobs",
        "Number of pipeline runs currently executing"
    )
    .unwrap();
}

/// Holds one slot of [`ACTIVE_JOBS`] for as long as it lives. The slot is returned
/// on drop, including unwinding and task cancellation.
pub struct ActiveJobGuard(());

impl ActiveJobGuard {
    pub fn start() -> Self {
        ACTIVE_JOBS.inc();
        Self(())
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        ACTIVE_JOBS.dec();
    }
}

/// Records one finished run.
pub fn record_run(kind: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    PIPELINE_RUNS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Records a stage failure.
pub fn record_stage_failure(stage: &str) {
    STAGE_FAILURES_TOTAL.with_label_values(&[stage]).inc();
}

/// Records savings; growth (output larger than input) is not counted.
pub fn record_bytes_saved(original: u64, output: u64) {
    if original > output {
        BYTES_SAVED_TOTAL.inc_by((original - output) as f64);
    }
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_else(|e| format!("# failed to encode metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_run_increments_counter() {
        record_run("metrics_test", false);
        let value = PIPELINE_RUNS_TOTAL.with_label_values(&["metrics_test", "failure"]).get();
        assert_eq!(value, 1.0);
    }

    #[test]
    fn test_active_job_guard_releases_on_drop_and_panic() {
        let before = ACTIVE_JOBS.get();
        {
            let _guard = ActiveJobGuard::start();
            assert_eq!(ACTIVE_JOBS.get(), before + 1);
        }
        assert_eq!(ACTIVE_JOBS.get(), before);

        let crashed = std::panic::catch_unwind(|| {
            let _guard = ActiveJobGuard::start();
            panic!("run crashed");
        });
        assert!(crashed.is_err());
        assert_eq!(ACTIVE_JOBS.get(), before);
    }

    #[test]
    fn test_gather_contains_metric_names() {
        record_stage_failure("encoding");
        let text = gather_text();
        assert!(text.contains("kompressor_stage_failures_total"));
    }
}
