//! Prometheus metrics for composition jobs.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

use vcompose_models::{CompositionStatus, EncoderTier};

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_TOTAL: &str = "vcompose_jobs_total";
    pub const JOBS_IN_FLIGHT: &str = "vcompose_jobs_in_flight";
    pub const JOB_DURATION_SECONDS: &str = "vcompose_job_duration_seconds";

    // Encoder metrics
    pub const ENCODE_ATTEMPTS_TOTAL: &str = "vcompose_encode_attempts_total";
    pub const ENCODE_DURATION_SECONDS: &str = "vcompose_encode_duration_seconds";
    pub const RETRY_CYCLES_TOTAL: &str = "vcompose_retry_cycles_total";

    // Timeline metrics
    pub const TIMELINE_DURATION_SECONDS: &str = "vcompose_timeline_prepare_duration_seconds";
    pub const PLACEHOLDERS_TOTAL: &str = "vcompose_placeholders_total";
}

/// Record one encoder attempt. `outcome` is `success`, `invalid` or an
/// encode error kind.
pub fn record_encode_attempt(tier: EncoderTier, outcome: &str, duration_secs: f64) {
    let labels = [
        ("tier", tier.as_str().to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::ENCODE_ATTEMPTS_TOTAL, &labels).increment(1);

    let labels = [("tier", tier.as_str().to_string())];
    histogram!(names::ENCODE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_retry_cycle() {
    counter!(names::RETRY_CYCLES_TOTAL).increment(1);
}

/// Record a finished job.
pub fn record_job(status: CompositionStatus, duration_secs: f64) {
    let labels = [("status", status.as_str().to_string())];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

/// Record timeline preparation, with the number of synthesized placeholders.
pub fn record_timeline(duration_secs: f64, visual_placeholders: usize, audio_placeholders: usize) {
    histogram!(names::TIMELINE_DURATION_SECONDS).record(duration_secs);

    let labels = [("kind", "visual".to_string())];
    counter!(names::PLACEHOLDERS_TOTAL, &labels).increment(visual_placeholders as u64);
    let labels = [("kind", "narration".to_string())];
    counter!(names::PLACEHOLDERS_TOTAL, &labels).increment(audio_placeholders as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_encode_attempt(EncoderTier::Primary, "success", 1.5);
        record_job(CompositionStatus::Degraded, 10.0);
        record_timeline(0.2, 1, 0);
        set_jobs_in_flight(0);
    }
}
