//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Agreement lifecycle (starts/stops, registered count)
//! - Hot-path change offers (delivered vs dropped by the fractional filter)
//! - Per-session change counters
//! - Status slot writes
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `agreement_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state.

use metrics::{counter, gauge};

/// Record a worker start.
pub fn record_agreement_started() {
    counter!("agreement_starts_total").increment(1);
}

/// Record a worker stop.
pub fn record_agreement_stopped() {
    counter!("agreement_stops_total").increment(1);
}

/// Set the number of agreements currently registered in the store.
pub fn set_registered_agreements(count: usize) {
    gauge!("agreement_registered").set(count as f64);
}

/// Record a local change offered to an agreement.
pub fn record_change_offered(delivered: bool) {
    let outcome = if delivered { "delivered" } else { "dropped" };
    counter!("agreement_changes_offered_total", "outcome" => outcome).increment(1);
}

/// Record a change counted against a remote replica id.
pub fn record_change_counted(skipped: bool) {
    let outcome = if skipped { "skipped" } else { "replayed" };
    counter!("agreement_changes_counted_total", "outcome" => outcome).increment(1);
}

/// Record a write to a status slot.
pub fn record_status_written(slot: &'static str) {
    counter!("agreement_status_writes_total", "slot" => slot).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_do_not_panic_without_recorder() {
        record_agreement_started();
        record_agreement_stopped();
        set_registered_agreements(3);
        record_change_offered(true);
        record_change_offered(false);
        record_change_counted(true);
        record_status_written("update");
    }
}
