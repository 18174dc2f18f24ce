//! Prometheus metrics, exposed alongside the health endpoints when the
//! `metrics` feature is enabled.

use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub controller: &'static str,
    pub result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueueLabels {
    pub queue: &'static str,
}

struct Metrics {
    registry: Registry,
    reconcile_total: Family<ReconcileLabels, Counter>,
    queue_depth: Family<QueueLabels, Gauge>,
}

fn build() -> Metrics {
    let mut registry = Registry::default();
    let reconcile_total = Family::<ReconcileLabels, Counter>::default();
    let queue_depth = Family::<QueueLabels, Gauge>::default();

    registry.register(
        "reconcile_total",
        "Total reconcile attempts, by controller and outcome",
        reconcile_total.clone(),
    );
    registry.register(
        "work_queue_depth",
        "Current number of pending items in a work queue",
        queue_depth.clone(),
    );

    Metrics {
        registry,
        reconcile_total,
        queue_depth,
    }
}

static METRICS: Lazy<Metrics> = Lazy::new(build);

/// Record the outcome of one reconcile attempt (spec.md §7 error taxonomy:
/// `ok`, `retry`, `terminal`).
pub fn record_reconcile(controller: &'static str, result: &'static str) {
    METRICS
        .reconcile_total
        .get_or_create(&ReconcileLabels { controller, result })
        .inc();
}

/// Set the current depth of a named work queue (spec.md §5 scheduling model).
pub fn set_queue_depth(queue: &'static str, depth: usize) {
    METRICS
        .queue_depth
        .get_or_create(&QueueLabels { queue })
        .set(depth as i64);
}

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> String {
    let mut buf = String::new();
    encode(&mut buf, &METRICS.registry).unwrap_or_default();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_recorded_series() {
        record_reconcile("backend-claim", "ok");
        set_queue_depth("backend-claim", 3);
        let text = render();
        assert!(text.contains("reconcile_total"));
        assert!(text.contains("work_queue_depth"));
    }
}
