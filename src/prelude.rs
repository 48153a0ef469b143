//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use volume_events_exporter::prelude::*;
//! ```

// Collector capability set and payload types
pub use crate::collector::{
    BackendType, CollectorError, DataType, EventKind, EventPayload, NfsVolume,
    VolumeData, VolumeEventCollector,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, reconcile_key, BackoffState, CollectorRegistry, DeliveryPhase, ReconcileOutcome,
    Reconciler, ReconcilerError,
};

pub use crate::controller::diagnostics::{DiagnosticsSink, KubeEventRecorder, NoopDiagnostics};

pub use crate::config::{ExporterConfig, SharedExporterConfig};

pub use crate::sign::{NoopSigner, NoopVerifier, SignError, Signer, Verification, Verifier};

pub use crate::store::{KubeStore, MemoryStore, ResourceStore, StoreError};

pub use crate::transport::{EventSender, SendError, TokenSender};
