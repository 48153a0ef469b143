//! # Diagnostics
//!
//! Human-visible events attached to a volume. The reconciler only sees the
//! [`DiagnosticsSink`] trait; the concrete sink is chosen at startup from
//! `GENERATE_K8S_EVENTS`.

use crate::constants::CONTROLLER_NAME;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

/// Reason used for delivery failures
pub const REASON_EVENT_INFORMATION: &str = "EventInformation";
/// Reason used when no collector can handle the volume
pub const REASON_UNSUPPORTED_VOLUME_TYPE: &str = "UnsupportedVolumeType";
/// Reason used for delivered events
pub const REASON_EXPORTED: &str = "Exported";

/// Sink for human-visible events about a volume
///
/// Publishing is best effort; implementations log their own failures.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn normal(&self, volume: &PersistentVolume, reason: &str, message: &str);
    async fn warning(&self, volume: &PersistentVolume, reason: &str, message: &str);
}

/// Sink used when events are disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiagnostics;

#[async_trait]
impl DiagnosticsSink for NoopDiagnostics {
    async fn normal(&self, _volume: &PersistentVolume, _reason: &str, _message: &str) {}
    async fn warning(&self, _volume: &PersistentVolume, _reason: &str, _message: &str) {}
}

/// Publishes Kubernetes Events through the kube event recorder
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder").finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    /// Recorder reporting as `instance` (the exporter's pod name) when known
    #[must_use]
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    async fn publish(
        &self,
        volume: &PersistentVolume,
        type_: EventType,
        reason: &str,
        message: &str,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Export".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &volume.object_ref(&())).await {
            warn!(
                volume.name = volume.metadata.name.as_deref().unwrap_or_default(),
                reason = reason,
                error = %e,
                "diagnostics.publish_failed"
            );
        }
    }
}

#[async_trait]
impl DiagnosticsSink for KubeEventRecorder {
    async fn normal(&self, volume: &PersistentVolume, reason: &str, message: &str) {
        self.publish(volume, EventType::Normal, reason, message).await;
    }

    async fn warning(&self, volume: &PersistentVolume, reason: &str, message: &str) {
        self.publish(volume, EventType::Warning, reason, message).await;
    }
}
