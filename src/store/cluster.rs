//! # Cluster Store
//!
//! [`ResourceStore`] backed by the Kubernetes API, with reflector caches for
//! PersistentVolumes and PersistentVolumeClaims.

use super::{display_name, ResourceStore, StoreError, CLAIM_KIND, VOLUME_KIND};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use kube_runtime::reflector::{self, ObjectRef, Store};
use kube_runtime::{watcher, WatchStreamExt};
use std::fmt::Debug;
use tracing::{debug, info, warn};

/// Kubernetes-backed resource store
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    volumes: Api<PersistentVolume>,
    volume_cache: Store<PersistentVolume>,
    claim_cache: Store<PersistentVolumeClaim>,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("cached_volumes", &self.volume_cache.len())
            .field("cached_claims", &self.claim_cache.len())
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Create the store and start the PV/PVC reflectors in background tasks
    ///
    /// Call [`KubeStore::wait_until_ready`] before serving reads from the cache.
    pub fn start(client: Client) -> Self {
        let volumes: Api<PersistentVolume> = Api::all(client.clone());
        let claims: Api<PersistentVolumeClaim> = Api::all(client.clone());

        let volume_cache = spawn_reflector(volumes.clone(), VOLUME_KIND);
        let claim_cache = spawn_reflector(claims, CLAIM_KIND);

        Self {
            client,
            volumes,
            volume_cache,
            claim_cache,
        }
    }

    /// Wait for both caches to complete their initial list
    pub async fn wait_until_ready(&self) -> anyhow::Result<()> {
        self.volume_cache.wait_until_ready().await?;
        self.claim_cache.wait_until_ready().await?;
        info!(
            volumes = self.volume_cache.len(),
            claims = self.claim_cache.len(),
            "store.cache.synced"
        );
        Ok(())
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Run a reflector for `K` until the process exits and hand back its reader
fn spawn_reflector<K>(api: Api<K>, kind: &'static str) -> Store<K>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .touched_objects();

    tokio::spawn(async move {
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            if let Err(e) = event {
                warn!(resource.kind = kind, error = %e, "store.reflector.error");
            }
        }
        warn!(resource.kind = kind, "store.reflector.stopped");
    });

    reader
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, StoreError> {
        self.volumes
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(VOLUME_KIND, name, e))
    }

    async fn cached_volume(&self, name: &str) -> Result<PersistentVolume, StoreError> {
        // Arc<K> from the cache is shared with every other reader; hand out a copy
        self.volume_cache
            .get(&ObjectRef::new(name))
            .map(|volume| (*volume).clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: VOLUME_KIND,
                name: name.to_string(),
            })
    }

    async fn cached_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        self.claim_cache
            .get(&ObjectRef::new(name).within(namespace))
            .map(|claim| (*claim).clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: CLAIM_KIND,
                name: display_name(Some(namespace), name),
            })
    }

    async fn update_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, StoreError> {
        let name = volume.metadata.name.as_deref().unwrap_or_default();
        debug!(volume.name = name, "store.volume.replace");
        self.volumes
            .replace(name, &PostParams::default(), volume)
            .await
            .map_err(|e| StoreError::from_kube(VOLUME_KIND, name, e))
    }

    async fn update_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        let name = claim.metadata.name.as_deref().unwrap_or_default();
        let namespace = claim.metadata.namespace.as_deref().unwrap_or("default");
        debug!(claim.namespace = namespace, claim.name = name, "store.claim.replace");
        self.claims(namespace)
            .replace(name, &PostParams::default(), claim)
            .await
            .map_err(|e| StoreError::from_kube(CLAIM_KIND, &display_name(Some(namespace), name), e))
    }

    async fn patch_volume(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<PersistentVolume, StoreError> {
        debug!(volume.name = name, "store.volume.merge_patch");
        self.volumes
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(VOLUME_KIND, name, e))
    }
}
