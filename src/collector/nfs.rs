//! # NFS Volume Collector
//!
//! An NFS provisioned volume `V` is served by an NFS server whose own storage is the
//! claim `nfs-V` in the NFS server namespace, bound to the backing volume named by that
//! claim's `spec.volumeName`:
//!
//! ```text
//! user PVC ──► V (nfs.openebs.io/volume=true)
//!                └── <nfs ns>/nfs-V (backing claim) ──► backing PV
//! ```
//!
//! All three objects carry the `nfs.events.openebs.io/finalizer` hold.

use super::meta::{remove_finalizer, scrub_deletion_fields, set_annotation};
use super::{BackendKeys, CollectorError, EventKind, VolumeData, VolumeEventCollector};
use crate::constants::{EVENT_SENT_VALUE, NFS_BACKING_CLAIM_PREFIX};
use crate::store::{display_name, ResourceStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use std::sync::Arc;
use tracing::{debug, info};

/// Collector for volumes labelled `nfs.openebs.io/volume=true`
pub struct NfsVolume {
    store: Arc<dyn ResourceStore>,
    volume: PersistentVolume,
    keys: BackendKeys,
    nfs_server_namespace: String,
}

impl std::fmt::Debug for NfsVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NfsVolume")
            .field("volume", &self.volume_name())
            .field("nfs_server_namespace", &self.nfs_server_namespace)
            .finish_non_exhaustive()
    }
}

impl NfsVolume {
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        volume: PersistentVolume,
        keys: BackendKeys,
        nfs_server_namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            volume,
            keys,
            nfs_server_namespace: nfs_server_namespace.into(),
        }
    }

    fn volume_name(&self) -> &str {
        self.volume.metadata.name.as_deref().unwrap_or_default()
    }

    /// Name of the claim holding the NFS server's storage
    #[must_use]
    pub fn backing_claim_name(&self) -> String {
        format!("{NFS_BACKING_CLAIM_PREFIX}{}", self.volume_name())
    }

    fn incomplete(&self, source: StoreError) -> CollectorError {
        CollectorError::IncompleteGraph {
            volume: self.volume_name().to_string(),
            source,
        }
    }

    /// User claim bound to the volume; `None` when it has already been deleted
    async fn primary_claim(&self) -> Result<Option<PersistentVolumeClaim>, CollectorError> {
        let claim_ref = self
            .volume
            .spec
            .as_ref()
            .and_then(|spec| spec.claim_ref.as_ref())
            .ok_or_else(|| CollectorError::MissingClaimRef {
                volume: self.volume_name().to_string(),
            })?;
        let namespace = claim_ref.namespace.as_deref().unwrap_or("default");
        let name = claim_ref.name.as_deref().unwrap_or_default();

        match self.store.cached_claim(namespace, name).await {
            Ok(claim) => Ok(Some(claim)),
            Err(e) if e.is_not_found() => {
                debug!(
                    volume.name = self.volume_name(),
                    claim = %display_name(Some(namespace), name),
                    "collector.primary_claim.gone"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Backing claim and the volume it is bound to; both must exist
    async fn backing_pair(
        &self,
    ) -> Result<(PersistentVolumeClaim, PersistentVolume), CollectorError> {
        let claim_name = self.backing_claim_name();
        let claim = self
            .store
            .cached_claim(&self.nfs_server_namespace, &claim_name)
            .await
            .map_err(|e| self.absent_or_store(e))?;

        let volume_name = bound_volume_name(&claim).ok_or_else(|| {
            CollectorError::UnboundBackingClaim {
                claim: display_name(Some(&self.nfs_server_namespace), &claim_name),
            }
        })?;
        let volume = self
            .store
            .cached_volume(volume_name)
            .await
            .map_err(|e| self.absent_or_store(e))?;

        Ok((claim, volume))
    }

    fn absent_or_store(&self, e: StoreError) -> CollectorError {
        if e.is_not_found() {
            self.incomplete(e)
        } else {
            CollectorError::Store(e)
        }
    }

    async fn collect(&self) -> Result<VolumeData, CollectorError> {
        let primary_claim = self.primary_claim().await?;
        let (backing_claim, backing_volume) = self.backing_pair().await?;
        Ok(VolumeData {
            primary_claim,
            primary_volume: self.volume.clone(),
            backing_claim,
            backing_volume,
        })
    }

    /// Tolerate NotFound on a teardown read
    fn optional<T>(result: Result<T, StoreError>) -> Result<Option<T>, CollectorError> {
        match result {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn bound_volume_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.volume_name.as_deref())
        .filter(|name| !name.is_empty())
}

#[async_trait]
impl VolumeEventCollector for NfsVolume {
    fn volume(&self) -> &PersistentVolume {
        &self.volume
    }

    async fn collect_create_event_data(&self) -> Result<VolumeData, CollectorError> {
        let mut data = self.collect().await?;
        // A create event never reports deletion state, even when retried late
        if let Some(claim) = data.primary_claim.as_mut() {
            scrub_deletion_fields(&mut claim.metadata);
        }
        scrub_deletion_fields(&mut data.primary_volume.metadata);
        scrub_deletion_fields(&mut data.backing_claim.metadata);
        scrub_deletion_fields(&mut data.backing_volume.metadata);
        Ok(data)
    }

    async fn collect_delete_event_data(&self) -> Result<VolumeData, CollectorError> {
        if self.volume.metadata.deletion_timestamp.is_none() {
            return Err(CollectorError::NotYetDeletable {
                volume: self.volume_name().to_string(),
            });
        }
        self.collect().await
    }

    async fn annotate_create_complete(
        &mut self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, CollectorError> {
        let mut updated = volume.clone();
        set_annotation(
            &mut updated.metadata,
            self.keys.marker(EventKind::Create),
            EVENT_SENT_VALUE,
        );
        let stored = self.store.update_volume(&updated).await?;
        self.volume = stored.clone();
        Ok(stored)
    }

    async fn annotate_delete_complete(
        &mut self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, CollectorError> {
        let name = volume.metadata.name.as_deref().unwrap_or_default();
        let marker = self.keys.marker(EventKind::Delete).to_string();
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    marker: EVENT_SENT_VALUE
                }
            }
        });
        let patched = self.store.patch_volume(name, &patch).await?;
        self.volume = patched.clone();
        Ok(patched)
    }

    async fn remove_event_finalizer(&mut self) -> Result<usize, CollectorError> {
        let finalizer = self.keys.finalizer.clone();
        let mut removed = 0;

        let backing_claim = Self::optional(
            self.store
                .cached_claim(&self.nfs_server_namespace, &self.backing_claim_name())
                .await,
        )?;

        if let Some(mut claim) = backing_claim {
            // The backing volume cannot go away while its claim still exists, so it is
            // released first
            if let Some(volume_name) = bound_volume_name(&claim) {
                let backing_volume =
                    Self::optional(self.store.cached_volume(volume_name).await)?;
                if let Some(mut backing_volume) = backing_volume {
                    if remove_finalizer(&mut backing_volume.metadata, &finalizer) {
                        self.store.update_volume(&backing_volume).await?;
                        removed += 1;
                        debug!(volume.name = volume_name, "collector.finalizer.backing_volume");
                    }
                }
            }

            if remove_finalizer(&mut claim.metadata, &finalizer) {
                match self.store.update_claim(&claim).await {
                    Ok(_) => {
                        removed += 1;
                        let claim_name = self.backing_claim_name();
                        debug!(
                            claim = %display_name(Some(&self.nfs_server_namespace), &claim_name),
                            "collector.finalizer.backing_claim"
                        );
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let mut primary = self.volume.clone();
        if remove_finalizer(&mut primary.metadata, &finalizer) {
            self.volume = self.store.update_volume(&primary).await?;
            removed += 1;
        }

        info!(
            volume.name = self.volume_name(),
            finalizers.removed = removed,
            "collector.finalizer.released"
        );
        Ok(removed)
    }
}
