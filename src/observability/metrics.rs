//! Metrics collection.
//!
//! Prometheus-compatible counters and gauges behind the `metrics` facade.
//! Every `record_*` function is a no-op until [`init_metrics`] installs a
//! recorder, so library users and tests pay nothing for them.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::ExamwardenError;
use crate::session::model::ViolationAction;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// With `Some(port)` a Prometheus scrape endpoint is served on
/// `127.0.0.1:<port>`; with `None` the recorder is installed without one.
///
/// # Errors
///
/// Returns `ExamwardenError::Io` if the recorder or listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), ExamwardenError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| ExamwardenError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "examwarden_phase_transitions_total",
        "Phase transitions by trigger"
    );
    describe_counter!(
        "examwarden_violations_total",
        "Counted integrity violations by resulting action"
    );
    describe_counter!(
        "examwarden_submissions_total",
        "Submission attempts by outcome"
    );
    describe_counter!(
        "examwarden_persistence_failures_total",
        "Snapshot writes that failed and were skipped"
    );
    describe_counter!(
        "examwarden_activity_log_failures_total",
        "Activity log appends that failed and were swallowed"
    );
    describe_counter!("examwarden_heartbeats_total", "Heartbeats sent");
    describe_gauge!(
        "examwarden_remaining_seconds",
        "Seconds left in the active phase"
    );
}

/// Records a phase transition; `trigger` is `"expiry"`, `"finish"` or `"override"`.
pub fn record_phase_transition(trigger: &'static str) {
    counter!("examwarden_phase_transitions_total", "trigger" => trigger).increment(1);
}

/// Records a counted violation.
pub fn record_violation(action: ViolationAction) {
    let label = match action {
        ViolationAction::Warned => "warned",
        ViolationAction::Disqualified => "disqualified",
    };
    counter!("examwarden_violations_total", "action" => label).increment(1);
}

/// Records a submission attempt; `outcome` is `"committed"`,
/// `"already_completed"` or `"failed"`.
pub fn record_submission(outcome: &'static str) {
    counter!("examwarden_submissions_total", "outcome" => outcome).increment(1);
}

/// Records a snapshot write that failed.
pub fn record_persistence_failure() {
    counter!("examwarden_persistence_failures_total").increment(1);
}

/// Records an activity log append that failed.
pub fn record_activity_log_failure() {
    counter!("examwarden_activity_log_failures_total").increment(1);
}

/// Records a heartbeat.
pub fn record_heartbeat() {
    counter!("examwarden_heartbeats_total").increment(1);
}

/// Sets the remaining-seconds gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_remaining_seconds(seconds: u64) {
    gauge!("examwarden_remaining_seconds").set(seconds as f64);
}
