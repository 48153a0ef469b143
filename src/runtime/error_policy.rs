//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::observability;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Handle reconciliation errors with per-volume exponential backoff
///
/// Backoff state is tracked per volume so one failing volume does not delay the
/// others. The state is cleared by the next successful reconcile.
pub fn handle_reconciliation_error(
    obj: Arc<PersistentVolume>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        volume.name = name,
        error = %error
    );
    let _error_guard = error_span.enter();

    if error.is_misconfiguration() {
        warn!("Volume {} cannot be exported: {}", name, error);
    } else {
        error!("Reconciliation error for {}: {:?}", name, error);
    }
    observability::metrics::increment_reconciliation_errors();

    let (delay, failures) = next_retry_delay(&ctx, name);
    info!(
        volume.name = name,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        failures = failures,
        "reconcile.retry_scheduled"
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}

/// Delay before the next attempt for `name`, and the failure count including this one
pub fn next_retry_delay(ctx: &Reconciler, name: &str) -> (Duration, u32) {
    let now = Instant::now();
    let pruned = ctx.prune_backoff(now);
    if pruned > 0 {
        debug!(pruned = pruned, "reconcile.backoff.pruned");
    }

    match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(name.to_string())
                .or_insert_with(|| BackoffState::new(&ctx.config));
            let delay = state.record_failure(now);
            (delay, state.backoff.failures())
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using backoff ceiling", e);
            (ctx.config.backoff_max(), 0)
        }
    }
}

/// Watch stream error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 401: credentials or RBAC
    Unauthorized,
    /// 410: resource version expired, the watcher relists
    Expired,
    /// 429: API server throttling or storage reinitializing
    Throttled,
    /// 404
    NotFound,
    Other,
}

/// Classify a watch stream error by its debug rendering
///
/// 404 is checked before 401: a plain text 404 body surfaces as a serde error that
/// mentions `WatchFailed`.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if is_not_found {
        return WatchErrorClass::NotFound;
    }
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        return WatchErrorClass::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorClass::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorClass::Throttled;
    }
    WatchErrorClass::Other
}

/// Log a watch stream error; the watcher retries on its own backoff
pub fn handle_watch_stream_error(error_string: &str) -> WatchErrorClass {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    let class = classify_watch_error(error_string);
    match class {
        WatchErrorClass::Unauthorized => {
            error!(
                "Watch authentication failed (401 Unauthorized) - check the ClusterRole granting get/list/watch/update/patch on persistentvolumes and persistentvolumeclaims"
            );
        }
        WatchErrorClass::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
        }
        WatchErrorClass::Throttled => {
            warn!(error_type = "429", "watch.error.throttled");
        }
        WatchErrorClass::NotFound => {
            warn!(
                "Resource not found (404) - this may be normal if the object was deleted. Error: {}",
                error_string
            );
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
        }
    }
    class
}
