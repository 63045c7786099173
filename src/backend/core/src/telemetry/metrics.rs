//! Policy engine metrics.
//!
//! Metrics go through the `metrics` facade; the embedding process installs
//! whichever recorder it exports with. Without a recorder every call is a
//! no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::Once;
use std::time::Duration;

use crate::error::ErrorCode;

static DESCRIBED: Once = Once::new();

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    DESCRIBED.call_once(register_metric_descriptions);
}

fn register_metric_descriptions() {
    // Evaluation
    describe_counter!(
        "warden_evaluations_total",
        "Capability evaluations by outcome (effective or the denying layer)"
    );
    describe_histogram!(
        "warden_evaluation_duration_seconds",
        "Capability evaluation latency in seconds"
    );

    // RBAC
    describe_counter!(
        "warden_invariant_violations_total",
        "Mutations rejected by a safety invariant"
    );
    describe_counter!(
        "warden_auto_attach_warnings_total",
        "Permissions created whose owner attach step failed"
    );

    // Errors
    describe_counter!("warden_errors_total", "Errors by code and kind");
}

/// Recorders for the engine's business metrics.
pub struct PolicyMetrics;

impl PolicyMetrics {
    pub fn evaluation(outcome: &'static str, elapsed: Duration) {
        counter!("warden_evaluations_total", "outcome" => outcome).increment(1);
        histogram!("warden_evaluation_duration_seconds", "outcome" => outcome)
            .record(elapsed.as_secs_f64());
    }

    pub fn invariant_violation(code: ErrorCode) {
        counter!("warden_invariant_violations_total", "code" => code.to_string()).increment(1);
    }

    pub fn auto_attach_warning() {
        counter!("warden_auto_attach_warnings_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        init_metrics();
        PolicyMetrics::evaluation("effective", Duration::from_millis(1));
        PolicyMetrics::invariant_violation(ErrorCode::LastTenantOwner);
        PolicyMetrics::auto_attach_warning();
    }
}
