//! # Reconciler
//!
//! Core reconciliation logic for `PersistentVolume` resources.
//!
//! The reconciler:
//! - Watches every `PersistentVolume` in the cluster
//! - Exports a create event once per volume that requires it
//! - Exports a delete event once the volume is being deleted
//! - Releases the events finalizers so deletion can complete
//!
//! ## Reconciliation Flow
//!
//! 1. Derive the delivery phase from annotations and finalizers
//! 2. Resolve the collector for the volume's backend
//! 3. Collect, sign, send and mark each pending event
//! 4. Remove the events finalizers of a deleting volume

pub mod phase;
pub mod reconcile;
pub mod registry;
pub mod types;

// Re-export public API
pub use phase::DeliveryPhase;
pub use reconcile::{reconcile, reconcile_key, ReconcileOutcome, ResourceKey};
pub use registry::{CollectorContext, CollectorFactory, CollectorRegistry};
pub use types::{BackoffState, Reconciler, ReconcilerError};
