//! # Delivery Phase
//!
//! The delivery state of a volume is never stored; it is derived from the
//! required flag, the delivery markers, the deletion timestamp and the events
//! finalizers every time the volume is observed.
//!
//! ```text
//! NotApplicable
//! CreatePending ──► CreateDelivered ──► DeletePending ──► DeleteDelivered ──► FinalizersCleared
//! ```

use crate::collector::meta::annotation_is;
use crate::collector::{AnnotationKeys, EventKind};
use crate::constants::{EVENT_REQUIRED_ANNOTATION, EVENT_REQUIRED_VALUE};
use k8s_openapi::api::core::v1::PersistentVolume;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPhase {
    /// Export is not required for this volume
    NotApplicable,
    /// Create event not delivered yet (also while deleting)
    CreatePending,
    /// Create event delivered, volume not being deleted
    CreateDelivered,
    /// Volume being deleted, delete event not delivered yet
    DeletePending,
    /// Delete event delivered, an events finalizer still holds the volume
    DeleteDelivered,
    /// Delete event delivered and the volume is released
    FinalizersCleared,
}

impl DeliveryPhase {
    /// Derive the phase of `volume`
    #[must_use]
    pub fn observe(volume: &PersistentVolume, keys: &AnnotationKeys) -> Self {
        let meta = &volume.metadata;
        if !annotation_is(meta, EVENT_REQUIRED_ANNOTATION, EVENT_REQUIRED_VALUE) {
            return DeliveryPhase::NotApplicable;
        }

        let create_sent = keys.any_marked(meta, EventKind::Create);
        if meta.deletion_timestamp.is_none() {
            return if create_sent {
                DeliveryPhase::CreateDelivered
            } else {
                DeliveryPhase::CreatePending
            };
        }

        if !create_sent {
            DeliveryPhase::CreatePending
        } else if !keys.any_marked(meta, EventKind::Delete) {
            DeliveryPhase::DeletePending
        } else if keys.any_finalizer(meta) {
            DeliveryPhase::DeleteDelivered
        } else {
            DeliveryPhase::FinalizersCleared
        }
    }

    /// True when a reconcile pass has nothing to do
    #[must_use]
    pub fn can_skip(self) -> bool {
        matches!(
            self,
            DeliveryPhase::NotApplicable | DeliveryPhase::CreateDelivered
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryPhase::NotApplicable | DeliveryPhase::FinalizersCleared
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryPhase::NotApplicable => "not-applicable",
            DeliveryPhase::CreatePending => "create-pending",
            DeliveryPhase::CreateDelivered => "create-delivered",
            DeliveryPhase::DeletePending => "delete-pending",
            DeliveryPhase::DeleteDelivered => "delete-delivered",
            DeliveryPhase::FinalizersCleared => "finalizers-cleared",
        }
    }
}

impl fmt::Display for DeliveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::now;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const CREATE: &str = "nfs.event.openebs.io/volume-create";
    const DELETE: &str = "nfs.event.openebs.io/volume-delete";
    const FINALIZER: &str = "nfs.events.openebs.io/finalizer";

    fn volume(
        annotations: &[(&str, &str)],
        deleting: bool,
        finalizers: &[&str],
    ) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pvc-1".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                deletion_timestamp: if deleting { now() } else { None },
                finalizers: Some(finalizers.iter().map(|f| (*f).to_string()).collect()),
                ..ObjectMeta::default()
            },
            ..PersistentVolume::default()
        }
    }

    fn phase(volume: &PersistentVolume) -> DeliveryPhase {
        DeliveryPhase::observe(volume, &AnnotationKeys::new())
    }

    #[test]
    fn test_required_flag_gates_everything() {
        assert_eq!(phase(&volume(&[], false, &[])), DeliveryPhase::NotApplicable);
        assert_eq!(
            phase(&volume(&[(EVENT_REQUIRED_ANNOTATION, "false")], true, &[FINALIZER])),
            DeliveryPhase::NotApplicable
        );
    }

    #[test]
    fn test_live_volume_phases() {
        let required = (EVENT_REQUIRED_ANNOTATION, "true");
        assert_eq!(phase(&volume(&[required], false, &[])), DeliveryPhase::CreatePending);
        assert_eq!(
            phase(&volume(&[required, (CREATE, "sent")], false, &[])),
            DeliveryPhase::CreateDelivered
        );
        assert_eq!(
            phase(&volume(&[required, (CREATE, "pending")], false, &[])),
            DeliveryPhase::CreatePending
        );
    }

    #[test]
    fn test_deleting_volume_phases() {
        let required = (EVENT_REQUIRED_ANNOTATION, "true");
        let created = (CREATE, "sent");
        let deleted = (DELETE, "sent");

        assert_eq!(
            phase(&volume(&[required], true, &[FINALIZER])),
            DeliveryPhase::CreatePending
        );
        assert_eq!(
            phase(&volume(&[required, created], true, &[FINALIZER])),
            DeliveryPhase::DeletePending
        );
        assert_eq!(
            phase(&volume(&[required, created, deleted], true, &[FINALIZER])),
            DeliveryPhase::DeleteDelivered
        );
        assert_eq!(
            phase(&volume(&[required, created, deleted], true, &["kubernetes.io/pv-protection"])),
            DeliveryPhase::FinalizersCleared
        );
    }

    #[test]
    fn test_skip_and_terminal_states() {
        assert!(DeliveryPhase::NotApplicable.can_skip());
        assert!(DeliveryPhase::CreateDelivered.can_skip());
        assert!(!DeliveryPhase::DeletePending.can_skip());
        assert!(!DeliveryPhase::FinalizersCleared.can_skip());
        assert!(DeliveryPhase::FinalizersCleared.is_terminal());
        assert!(!DeliveryPhase::DeleteDelivered.is_terminal());
    }
}
