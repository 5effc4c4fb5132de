//! Metrics facade for the connector
//!
//! Lightweight wrappers over the `metrics` crate. Every recorder is a no-op
//! unless the `metrics-prometheus` feature is enabled, so call sites stay
//! unconditional.

use std::time::Duration;

/// Register metric descriptions with the installed recorder.
///
/// Call once at startup; harmless to skip.
pub fn init_metrics() {
    #[cfg(feature = "metrics-prometheus")]
    {
        metrics::describe_counter!(
            "rookery_reconciler_actions_total",
            "Actions executed by the reconciler worker"
        );
        metrics::describe_counter!(
            "rookery_reconciler_action_failures_total",
            "Actions whose side effect or transition failed"
        );
        metrics::describe_histogram!(
            "rookery_reconciler_action_seconds",
            "Wall time per reconciler action"
        );
        metrics::describe_gauge!(
            "rookery_cluster_siblings",
            "Sibling records currently retained (including stale)"
        );
        metrics::describe_counter!(
            "rookery_stream_reconnects_total",
            "Substrate watch resubscriptions"
        );
        metrics::describe_counter!(
            "rookery_stream_events_total",
            "Events received from the substrate watches"
        );
    }
}

/// Reconciler worker metrics
pub struct ReconcilerMetrics;

impl ReconcilerMetrics {
    /// Record one executed action and its outcome
    pub fn record_action(latency: Duration, ok: bool) {
        #[cfg(feature = "metrics-prometheus")]
        {
            metrics::counter!("rookery_reconciler_actions_total").increment(1);
            if !ok {
                metrics::counter!("rookery_reconciler_action_failures_total").increment(1);
            }
            metrics::histogram!("rookery_reconciler_action_seconds")
                .record(latency.as_secs_f64());
        }
        #[cfg(not(feature = "metrics-prometheus"))]
        {
            let _ = (latency, ok);
        }
    }

    /// Track the size of the retained sibling map
    pub fn set_sibling_count(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("rookery_cluster_siblings").set(count as f64);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = count;
    }
}

/// Substrate watch stream metrics
pub struct StreamMetrics;

impl StreamMetrics {
    /// Count a resubscription of the named stream
    pub fn increment_reconnects(stream: &'static str) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("rookery_stream_reconnects_total", "stream" => stream).increment(1);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = stream;
    }

    /// Count an event received on the named stream
    pub fn increment_events(stream: &'static str) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("rookery_stream_events_total", "stream" => stream).increment(1);
        #[cfg(not(feature = "metrics-prometheus"))]
        let _ = stream;
    }
}
