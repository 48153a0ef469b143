//! # Metrics
//!
//! Prometheus metrics for monitoring the exporter.
//!
//! ## Metrics Exposed
//!
//! - `volume_events_exporter_reconciliations_total` - Total number of reconciliations
//! - `volume_events_exporter_reconciliation_errors_total` - Total number of reconciliation errors
//! - `volume_events_exporter_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `volume_events_exporter_events_sent_total` - Events accepted by the collector, by kind
//! - `volume_events_exporter_event_send_failures_total` - Events the collector did not accept, by kind
//! - `volume_events_exporter_finalizers_removed_total` - Events finalizers released
//! - `volume_events_exporter_requeues_total` - Requeues, by reason

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "volume_events_exporter_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "volume_events_exporter_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "volume_events_exporter_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static EVENTS_SENT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "volume_events_exporter_events_sent_total",
            "Total number of volume events accepted by the collector",
        ),
        &["kind"],
    )
    .expect("Failed to create EVENTS_SENT_TOTAL metric - this should never happen")
});

static EVENT_SEND_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "volume_events_exporter_event_send_failures_total",
            "Total number of volume events the collector did not accept",
        ),
        &["kind"],
    )
    .expect("Failed to create EVENT_SEND_FAILURES_TOTAL metric - this should never happen")
});

static FINALIZERS_REMOVED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "volume_events_exporter_finalizers_removed_total",
        "Total number of events finalizers removed",
    )
    .expect("Failed to create FINALIZERS_REMOVED_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "volume_events_exporter_requeues_total",
            "Total number of requeues",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(EVENTS_SENT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVENT_SEND_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FINALIZERS_REMOVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_events_sent(kind: &str) {
    EVENTS_SENT_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_event_send_failures(kind: &str) {
    EVENT_SEND_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn add_finalizers_removed(count: usize) {
    FINALIZERS_REMOVED_TOTAL.inc_by(count as u64);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

/// Current value of `events_sent_total{kind}`
#[must_use]
pub fn events_sent(kind: &str) -> u64 {
    EVENTS_SENT_TOTAL.with_label_values(&[kind]).get()
}

/// Current value of `event_send_failures_total{kind}`
#[must_use]
pub fn event_send_failures(kind: &str) -> u64 {
    EVENT_SEND_FAILURES_TOTAL.with_label_values(&[kind]).get()
}
