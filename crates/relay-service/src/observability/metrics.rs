//! Metric definitions for the relay service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signaling relay step latency (p99 target < 10ms)
        .set_buckets_for_metric(
            Matcher::Prefix("relay_message".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Metric: `relay_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_connections_active").set(count as f64);
}

/// Metric: `relay_meetings_active`
pub fn set_meetings_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_meetings_active").set(count as f64);
}

/// Metric: `relay_participants_active`
pub fn set_participants_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_participants_active").set(count as f64);
}

/// Metric: `relay_messages_total`
/// Labels: `event`
pub fn record_message(event: &'static str) {
    counter!("relay_messages_total", "event" => event).increment(1);
}

/// Metric: `relay_message_latency_seconds`
/// Labels: `event`
pub fn record_message_latency(event: &'static str, duration: Duration) {
    histogram!("relay_message_latency_seconds", "event" => event).record(duration.as_secs_f64());
}

/// Metric: `relay_signaling_errors_total`
/// Labels: `kind`
pub fn record_signaling_error(kind: &'static str) {
    counter!("relay_signaling_errors_total", "kind" => kind).increment(1);
}

/// Metric: `relay_health_probes_total`
pub fn record_health_probes(count: usize) {
    counter!("relay_health_probes_total").increment(count as u64);
}

/// Metric: `relay_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Metric: `relay_messages_dropped_total`
/// Labels: `actor_type`
pub fn record_message_dropped(actor_type: &'static str) {
    counter!("relay_messages_dropped_total", "actor_type" => actor_type).increment(1);
}

/// Metric: `relay_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("relay_actor_panics_total", "actor_type" => actor_type).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Recording without an installed recorder is a no-op and must not panic.
    #[test]
    fn test_recording_without_recorder() {
        set_connections_active(3);
        set_meetings_active(1);
        set_participants_active(3);
        record_message("join-meeting");
        record_message_latency("join-meeting", Duration::from_micros(250));
        record_signaling_error("forbidden");
        record_health_probes(2);
        set_actor_mailbox_depth("relay", 4);
        record_message_dropped("connection");
        record_actor_panic("connection");
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_message("offer");
            record_message("offer");
            record_signaling_error("locked");
            set_meetings_active(7);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let offers = metrics
            .iter()
            .find(|(key, _, _, _)| {
                key.key().name() == "relay_messages_total"
                    && key.key().labels().any(|l| l.value() == "offer")
            })
            .expect("relay_messages_total{event=offer} recorded");
        assert!(matches!(offers.3, DebugValue::Counter(2)));

        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "relay_signaling_errors_total"));

        let meetings = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "relay_meetings_active")
            .expect("relay_meetings_active recorded");
        assert!(matches!(meetings.3, DebugValue::Gauge(v) if v.into_inner() == 7.0));
    }
}
