// EVTC Exporter - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for EVTC monitoring.
//!
//! This module defines all Prometheus metrics exposed by the exporter
//! and provides functions to update them from emitted metric records.

use evtc::{DiagnosticLevel, MetricRecord};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge, GaugeVec,
    TextEncoder,
};

lazy_static! {
    // ============================================================
    // Counter Windows (from MetricRecord)
    // ============================================================

    /// Mean of the last window, per `source|counter`.
    pub static ref COUNTER_VALUE: GaugeVec = register_gauge_vec!(
        "evtc_counter_value",
        "Mean of the last completed window (0 when idle)",
        &["source", "counter"]
    ).unwrap();

    /// Samples aggregated in the last window.
    pub static ref COUNTER_SAMPLES: GaugeVec = register_gauge_vec!(
        "evtc_counter_samples",
        "Samples aggregated in the last completed window",
        &["source", "counter"]
    ).unwrap();

    /// Completed windows received from the collector.
    pub static ref WINDOWS_TOTAL: CounterVec = register_counter_vec!(
        "evtc_windows_total",
        "Total windows emitted by the collector",
        &["source", "counter"]
    ).unwrap();

    // ============================================================
    // Collector Self-Diagnostics
    // ============================================================

    /// Diagnostic events by name and level.
    pub static ref DIAGNOSTIC_EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "evtc_diagnostic_events_total",
        "Total diagnostic events reported by the collector",
        &["event", "level"]
    ).unwrap();

    // ============================================================
    // Exporter Metrics
    // ============================================================

    pub static ref SAMPLES_DELIVERED_TOTAL: Gauge = register_gauge!(
        "evtc_exporter_samples_total",
        "Total samples delivered to the collector by the replay"
    ).unwrap();

    pub static ref REPLAY_POSITION: Gauge = register_gauge!(
        "evtc_exporter_replay_position",
        "Current replay position (row index)"
    ).unwrap();

    pub static ref REPLAY_TOTAL_ROWS: Gauge = register_gauge!(
        "evtc_exporter_replay_total_rows",
        "Total rows in the replay dataset"
    ).unwrap();

    pub static ref REPLAY_SPEED: Gauge = register_gauge!(
        "evtc_exporter_replay_speed",
        "Replay speed multiplier"
    ).unwrap();
}

/// Split `source|counter` into its label values.
pub fn split_metric_name(name: &str) -> (&str, &str) {
    match name.split_once('|') {
        Some((source, counter)) => (source, counter),
        None => ("", name),
    }
}

/// Update the window gauges from one emitted record.
pub fn record_window(record: &MetricRecord) {
    let (source, counter) = split_metric_name(&record.name);
    COUNTER_VALUE
        .with_label_values(&[source, counter])
        .set(record.value);
    COUNTER_SAMPLES
        .with_label_values(&[source, counter])
        .set(record.count as f64);
    WINDOWS_TOTAL.with_label_values(&[source, counter]).inc();
}

/// Count one diagnostic event.
pub fn record_diagnostic(event: &str, level: DiagnosticLevel) {
    DIAGNOSTIC_EVENTS_TOTAL
        .with_label_values(&[event, level.as_str()])
        .inc();
}

/// Update replay position metrics.
pub fn update_replay_metrics(position: usize, total: usize, speed: f64) {
    REPLAY_POSITION.set(position as f64);
    REPLAY_TOTAL_ROWS.set(total as f64);
    REPLAY_SPEED.set(speed);
}

/// Increment samples delivered counter.
pub fn increment_samples_delivered() {
    SAMPLES_DELIVERED_TOTAL.inc();
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
