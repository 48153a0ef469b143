//! # Types
//!
//! Core types for the reconciler.

use super::registry::CollectorRegistry;
use crate::collector::{CollectorError, EncodeError, EventKind};
use crate::config::SharedExporterConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::diagnostics::DiagnosticsSink;
use crate::sign::{SignError, Signer};
use crate::store::{ResourceStore, StoreError};
use crate::transport::{EventSender, SendError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// No backend label, CAS type or events finalizer identifies the volume
    #[error("unable to determine the volume type of {volume}")]
    UnknownBackend { volume: String },

    /// The volume names a backend without a registered collector
    #[error("event sender is not available for volume {volume} of type {backend}")]
    UnsupportedBackend { volume: String, backend: String },

    #[error("failed to get {kind} event data of volume {volume}: {source}")]
    Collect {
        kind: EventKind,
        volume: String,
        #[source]
        source: CollectorError,
    },

    #[error("failed to sign {kind} event data of volume {volume}: {source}")]
    Sign {
        kind: EventKind,
        volume: String,
        #[source]
        source: SignError,
    },

    #[error("failed to encode {kind} event data of volume {volume}: {source}")]
    Encode {
        kind: EventKind,
        volume: String,
        #[source]
        source: EncodeError,
    },

    #[error("failed to send {kind} event data of volume {volume} to server: {source}")]
    Send {
        kind: EventKind,
        volume: String,
        #[source]
        source: SendError,
    },

    #[error("failed to annotate volume {volume} with {kind} event information: {source}")]
    Annotate {
        kind: EventKind,
        volume: String,
        #[source]
        source: CollectorError,
    },

    #[error("failed to remove finalizers on volume {volume}: {source}")]
    RemoveFinalizer {
        volume: String,
        #[source]
        source: CollectorError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcilerError {
    /// True for errors that retrying cannot fix without operator action
    #[must_use]
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            ReconcilerError::UnknownBackend { .. } | ReconcilerError::UnsupportedBackend { .. }
        )
    }

    /// Event kind whose delivery path failed, if any
    #[must_use]
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            ReconcilerError::Collect { kind, .. }
            | ReconcilerError::Sign { kind, .. }
            | ReconcilerError::Encode { kind, .. }
            | ReconcilerError::Send { kind, .. }
            | ReconcilerError::Annotate { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Backoff state for a specific volume
/// Tracks the failure streak used to delay the next retry
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    /// When the streak last grew
    pub last_failure: Instant,
}

impl BackoffState {
    #[must_use]
    pub fn new(config: &crate::config::ExporterConfig) -> Self {
        Self {
            backoff: ExponentialBackoff::new(config.backoff_base(), config.backoff_max()),
            last_failure: Instant::now(),
        }
    }

    /// Delay before the next attempt; counts one more failure
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.last_failure = now;
        self.backoff.next_backoff()
    }
}

/// Shared reconcile context
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ResourceStore>,
    pub registry: Arc<CollectorRegistry>,
    pub signer: Arc<dyn Signer>,
    pub sender: Arc<dyn EventSender>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    pub config: SharedExporterConfig,
    // Backoff state per volume name, owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("signer", &self.signer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Build a reconciler with the default collector registry
    pub fn new(
        store: Arc<dyn ResourceStore>,
        signer: Arc<dyn Signer>,
        sender: Arc<dyn EventSender>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        config: SharedExporterConfig,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(CollectorRegistry::with_defaults()),
            signer,
            sender,
            diagnostics,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the collector registry
    #[must_use]
    pub fn with_registry(mut self, registry: CollectorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Forget the failure streak of a volume after a successful pass
    pub fn reset_backoff(&self, name: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(name);
        }
    }

    /// Drop streaks that have not grown for longer than any retry can be delayed
    ///
    /// A volume removed from the cluster while failing is never reconciled again, so
    /// its streak would otherwise stay forever. Returns the number of streaks dropped.
    pub fn prune_backoff(&self, now: Instant) -> usize {
        let stale_after = self.config.backoff_max() + self.config.resync_interval();
        let Ok(mut states) = self.backoff_states.lock() else {
            return 0;
        };
        let before = states.len();
        states.retain(|_, state| now.saturating_duration_since(state.last_failure) <= stale_after);
        before - states.len()
    }
}
