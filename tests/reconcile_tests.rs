//! # Reconcile Tests
//!
//! Drive `reconcile_key` against a `MemoryStore` cluster and a recording sender.
//!
//! These tests verify:
//! - Create and delete events are delivered exactly once per marker
//! - Deletion is held until the delete event is accepted
//! - Finalizers are released backing volume first, primary volume last
//! - Failures leave no marker behind and surface as warnings

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use volume_events_exporter::collector::{
    BackendKeys, BackendType, CollectorError, NfsVolume, VolumeEventCollector,
};
use volume_events_exporter::controller::diagnostics::{
    REASON_EVENT_INFORMATION, REASON_EXPORTED, REASON_UNSUPPORTED_VOLUME_TYPE,
};
use volume_events_exporter::controller::reconciler::{
    reconcile, reconcile_key, DeliveryPhase, ReconcileOutcome, ReconcilerError,
};
use volume_events_exporter::sign::NoopSigner;
use volume_events_exporter::store::{StoreCall, StoreOp};

#[tokio::test]
async fn test_create_event_is_sent_and_marked() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[]);

    let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Synced {
            create_sent: true,
            delete_sent: false,
            finalizers_removed: 0
        }
    );

    let bodies = harness.sender.bodies();
    assert_eq!(bodies.len(), 1);
    let event = &bodies[0]["volume_provisioned"];
    assert_eq!(event["primary_volume"]["metadata"]["name"], "pvc-1");
    assert_eq!(event["primary_claim"]["metadata"]["name"], "claim-pvc-1");
    assert_eq!(event["backing_claim"]["metadata"]["name"], "nfs-pvc-1");
    assert_eq!(event["backing_volume"]["metadata"]["name"], "backing-pvc-1");
    assert_eq!(bodies[0]["signature"], "");

    let volume = harness.store.volume("pvc-1").unwrap();
    assert!(has_annotation(&volume, CREATE_MARKER, "sent"));
    assert!(has_finalizer(volume.metadata.finalizers.as_ref(), FINALIZER));

    let normals = harness.diagnostics.normals();
    assert_eq!(normals.len(), 1);
    assert_eq!(normals[0].reason, REASON_EXPORTED);
    assert_eq!(normals[0].message, "Exported volume create information");
}

#[tokio::test]
async fn test_delivered_create_is_not_resent() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[]);

    reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    harness.store.clear_calls();

    let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Skipped(DeliveryPhase::CreateDelivered));
    assert_eq!(harness.sender.count(), 1);
    assert!(harness.store.writes().is_empty());
}

#[tokio::test]
async fn test_volume_without_required_flag_is_ignored() {
    let harness = Harness::new();
    let graph = NfsGraph::new("pvc-1");
    harness
        .store
        .insert_volume(nfs_volume(&graph.volume, &graph.claim, &[]));

    let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Skipped(DeliveryPhase::NotApplicable));
    assert_eq!(harness.sender.count(), 0);
    assert_eq!(
        harness.store.calls(),
        vec![StoreCall::GetVolume("pvc-1".to_string())]
    );
}

#[tokio::test]
async fn test_deleting_volume_without_required_flag_keeps_finalizers() {
    for required in [None, Some("false")] {
        let harness = Harness::new();
        let graph = match required {
            Some(value) => seed_nfs_graph(&harness.store, "pvc-1", &[(REQUIRED, value)]),
            None => {
                let graph = seed_nfs_graph(&harness.store, "pvc-1", &[]);
                harness
                    .store
                    .insert_volume(nfs_volume(&graph.volume, &graph.claim, &[]));
                graph
            }
        };
        harness.store.mark_volume_for_deletion(&graph.volume);
        harness.store.clear_calls();

        let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Skipped(DeliveryPhase::NotApplicable));
        assert_eq!(harness.sender.count(), 0);
        assert!(harness.store.writes().is_empty());

        let volume = harness.store.volume(&graph.volume).unwrap();
        assert!(volume.metadata.deletion_timestamp.is_some());
        assert!(has_finalizer(volume.metadata.finalizers.as_ref(), FINALIZER));
        let backing = harness.store.volume(&graph.backing_volume).unwrap();
        assert!(has_finalizer(backing.metadata.finalizers.as_ref(), FINALIZER));
    }
}

#[tokio::test]
async fn test_missing_volume_and_invalid_key_succeed() {
    let harness = Harness::new();

    let outcome = reconcile_key(&harness.reconciler, "pvc-gone").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Gone);

    let outcome = reconcile_key(&harness.reconciler, "a/b/c").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::InvalidKey);
    assert_eq!(harness.sender.count(), 0);
}

#[tokio::test]
async fn test_delete_event_releases_finalizers_in_order() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[(CREATE_MARKER, "sent")]);
    harness.store.mark_volume_for_deletion(&graph.volume);
    harness.store.clear_calls();

    let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Synced {
            create_sent: false,
            delete_sent: true,
            finalizers_removed: 3
        }
    );

    let bodies = harness.sender.bodies();
    assert_eq!(bodies.len(), 1);
    let event = &bodies[0]["volume_deleted"];
    assert!(event["primary_volume"]["metadata"]["deletionTimestamp"].is_string());

    assert_eq!(
        harness.store.writes(),
        vec![
            StoreCall::PatchVolume("pvc-1".to_string()),
            StoreCall::UpdateVolume("backing-pvc-1".to_string()),
            StoreCall::UpdateClaim("openebs/nfs-pvc-1".to_string()),
            StoreCall::UpdateVolume("pvc-1".to_string()),
        ]
    );

    // pv-protection still holds the primary volume; only the events finalizer is gone
    let volume = harness.store.volume("pvc-1").unwrap();
    assert!(has_annotation(&volume, DELETE_MARKER, "sent"));
    assert!(!has_finalizer(volume.metadata.finalizers.as_ref(), FINALIZER));
    assert!(has_finalizer(volume.metadata.finalizers.as_ref(), PV_PROTECTION));

    let backing = harness.store.volume("backing-pvc-1").unwrap();
    assert!(!has_finalizer(backing.metadata.finalizers.as_ref(), FINALIZER));
    let backing_claim = harness.store.claim(NFS_NAMESPACE, "nfs-pvc-1").unwrap();
    assert!(!has_finalizer(backing_claim.metadata.finalizers.as_ref(), FINALIZER));
}

#[tokio::test]
async fn test_released_volume_is_removed() {
    let harness = Harness::new();
    let graph = NfsGraph::new("pvc-1");
    let mut volume = nfs_volume(
        &graph.volume,
        &graph.claim,
        &[(REQUIRED, "true"), (CREATE_MARKER, "sent")],
    );
    volume.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    harness.store.insert_volume(volume);
    harness
        .store
        .insert_claim(claim(NFS_NAMESPACE, &graph.backing_claim, &graph.backing_volume, true));
    harness.store.insert_volume(backing_volume(&graph.backing_volume));
    harness.store.mark_volume_for_deletion(&graph.volume);

    reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();

    assert!(harness.store.volume("pvc-1").is_none());
    let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Gone);
}

#[tokio::test]
async fn test_create_and_delete_in_one_pass() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[]);
    harness.store.mark_volume_for_deletion(&graph.volume);

    let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Synced {
            create_sent: true,
            delete_sent: true,
            finalizers_removed: 3
        }
    );

    let bodies = harness.sender.bodies();
    assert_eq!(bodies.len(), 2);
    let created = &bodies[0]["volume_provisioned"]["primary_volume"]["metadata"];
    assert!(created.get("deletionTimestamp").is_none());
    assert!(bodies[1]["volume_deleted"].is_object());

    let volume = harness.store.volume("pvc-1").unwrap();
    assert!(has_annotation(&volume, CREATE_MARKER, "sent"));
    assert!(has_annotation(&volume, DELETE_MARKER, "sent"));
}

#[tokio::test]
async fn test_deleted_primary_claim_is_reported_as_null() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[(CREATE_MARKER, "sent")]);
    harness.store.remove_claim(CLAIM_NAMESPACE, &graph.claim);
    harness.store.mark_volume_for_deletion(&graph.volume);

    reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();

    let bodies = harness.sender.bodies();
    assert!(bodies[0]["volume_deleted"]["primary_claim"].is_null());
}

#[tokio::test]
async fn test_failed_send_holds_deletion() {
    let harness = Harness::with(Arc::new(RecordingSender::failing()), Arc::new(NoopSigner));
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[(CREATE_MARKER, "sent")]);
    harness.store.mark_volume_for_deletion(&graph.volume);

    let err = reconcile_key(&harness.reconciler, &graph.volume)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcilerError::Send { .. }));

    let volume = harness.store.volume("pvc-1").unwrap();
    assert!(!has_annotation(&volume, DELETE_MARKER, "sent"));
    assert!(has_finalizer(volume.metadata.finalizers.as_ref(), FINALIZER));

    let warnings = harness.diagnostics.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].reason, REASON_EVENT_INFORMATION);

    // The next attempt after the collector recovers completes the teardown
    harness.sender.set_failing(false);
    reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    let volume = harness.store.volume("pvc-1").unwrap();
    assert!(has_annotation(&volume, DELETE_MARKER, "sent"));
    assert!(!has_finalizer(volume.metadata.finalizers.as_ref(), FINALIZER));
}

#[tokio::test]
async fn test_incomplete_graph_sends_nothing() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[]);
    harness.store.remove_claim(NFS_NAMESPACE, &graph.backing_claim);

    let err = reconcile_key(&harness.reconciler, &graph.volume)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcilerError::Collect { .. }));
    assert_eq!(harness.sender.count(), 0);
    assert!(harness.store.writes().is_empty());
}

#[tokio::test]
async fn test_failed_annotation_resends_on_retry() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[]);
    harness.store.fail_next(StoreOp::UpdateVolume);

    let err = reconcile_key(&harness.reconciler, &graph.volume)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcilerError::Annotate { .. }));
    assert_eq!(harness.sender.count(), 1);

    reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(harness.sender.count(), 2);
    let volume = harness.store.volume("pvc-1").unwrap();
    assert!(has_annotation(&volume, CREATE_MARKER, "sent"));
}

#[tokio::test]
async fn test_finalizer_failure_does_not_resend_delete() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[(CREATE_MARKER, "sent")]);
    harness.store.mark_volume_for_deletion(&graph.volume);
    harness.store.fail_next(StoreOp::UpdateClaim);

    let err = reconcile_key(&harness.reconciler, &graph.volume)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcilerError::RemoveFinalizer { .. }));
    assert_eq!(harness.sender.count(), 1);

    let warnings = harness.diagnostics.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].reason, REASON_EVENT_INFORMATION);
    assert!(warnings[0]
        .message
        .starts_with("failed to remove finalizers on volume pvc-1"));

    let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Synced {
            create_sent: false,
            delete_sent: false,
            finalizers_removed: 2
        }
    );
    assert_eq!(harness.sender.count(), 1);
}

#[tokio::test]
async fn test_unsupported_backend_warns() {
    let harness = Harness::new();
    let mut volume = nfs_volume("pvc-1", "claim-pvc-1", &[(REQUIRED, "true")]);
    volume.metadata.labels = None;
    volume.metadata.finalizers = Some(vec!["jiva.events.openebs.io/finalizer".to_string()]);
    harness.store.insert_volume(volume);

    let err = reconcile_key(&harness.reconciler, "pvc-1").await.unwrap_err();
    assert!(matches!(
        err,
        ReconcilerError::UnsupportedBackend { ref backend, .. } if backend == "jiva"
    ));
    assert_eq!(
        err.to_string(),
        "event sender is not available for volume pvc-1 of type jiva"
    );

    let warnings = harness.diagnostics.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].reason, REASON_UNSUPPORTED_VOLUME_TYPE);
    assert_eq!(harness.sender.count(), 0);
}

#[tokio::test]
async fn test_controller_entry_point_requeues_after_resync() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[]);
    let volume = Arc::new(harness.store.volume(&graph.volume).unwrap());

    let action = reconcile(volume, Arc::new(harness.reconciler.clone()))
        .await
        .unwrap();
    assert_eq!(
        action,
        kube_runtime::controller::Action::requeue(Duration::from_secs(30))
    );
    assert_eq!(harness.sender.count(), 1);
}

#[tokio::test]
async fn test_absent_backing_claim_releases_primary_only() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(
        &harness.store,
        "pvc-1",
        &[(CREATE_MARKER, "sent"), (DELETE_MARKER, "sent")],
    );
    harness.store.remove_claim(NFS_NAMESPACE, &graph.backing_claim);
    harness.store.mark_volume_for_deletion(&graph.volume);
    harness.store.clear_calls();

    let outcome = reconcile_key(&harness.reconciler, &graph.volume).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Synced {
            create_sent: false,
            delete_sent: false,
            finalizers_removed: 1
        }
    );
    assert_eq!(harness.sender.count(), 0);
    assert_eq!(
        harness.store.writes(),
        vec![StoreCall::UpdateVolume("pvc-1".to_string())]
    );

    // Unreachable without its claim, so the backing volume keeps its hold
    let backing = harness.store.volume(&graph.backing_volume).unwrap();
    assert!(has_finalizer(backing.metadata.finalizers.as_ref(), FINALIZER));
}

#[tokio::test]
async fn test_delete_data_requires_deletion_timestamp() {
    let harness = Harness::new();
    let graph = seed_nfs_graph(&harness.store, "pvc-1", &[]);
    let volume = harness.store.volume(&graph.volume).unwrap();

    let collector = NfsVolume::new(
        harness.store.clone(),
        volume,
        BackendKeys::for_backend(BackendType::Nfs),
        NFS_NAMESPACE,
    );
    let err = collector.collect_delete_event_data().await.unwrap_err();
    assert!(matches!(err, CollectorError::NotYetDeletable { ref volume } if volume == "pvc-1"));
}
