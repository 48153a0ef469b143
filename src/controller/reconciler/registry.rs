//! # Collector Registry
//!
//! Maps a backend type to the function that builds its collector. The reconciler
//! resolves the backend of a volume once per pass and asks the registry for a
//! collector bound to that volume.

use super::types::ReconcilerError;
use crate::collector::backend::{cas_type, finalizer_token};
use crate::collector::{
    AnnotationKeys, BackendKeys, BackendType, NfsVolume, VolumeEventCollector,
};
use crate::config::SharedExporterConfig;
use crate::store::ResourceStore;
use k8s_openapi::api::core::v1::PersistentVolume;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a collector is built from
pub struct CollectorContext {
    pub store: Arc<dyn ResourceStore>,
    pub volume: PersistentVolume,
    pub keys: BackendKeys,
    pub config: SharedExporterConfig,
}

impl std::fmt::Debug for CollectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorContext")
            .field("volume", &self.volume.metadata.name)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

pub type CollectorFactory =
    Arc<dyn Fn(CollectorContext) -> Box<dyn VolumeEventCollector> + Send + Sync>;

/// Backend type to collector constructor table
#[derive(Clone)]
pub struct CollectorRegistry {
    keys: AnnotationKeys,
    factories: HashMap<BackendType, CollectorFactory>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut backends: Vec<_> = self.factories.keys().map(|b| b.token()).collect();
        backends.sort_unstable();
        f.debug_struct("CollectorRegistry")
            .field("backends", &backends)
            .finish_non_exhaustive()
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CollectorRegistry {
    /// Registry without any collector
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keys: AnnotationKeys::new(),
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in collector
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::empty().register(
            BackendType::Nfs,
            Arc::new(|ctx: CollectorContext| {
                let namespace = ctx.config.nfs_server_namespace.clone();
                Box::new(NfsVolume::new(ctx.store, ctx.volume, ctx.keys, namespace))
                    as Box<dyn VolumeEventCollector>
            }),
        )
    }

    #[must_use]
    pub fn register(mut self, backend: BackendType, factory: CollectorFactory) -> Self {
        self.factories.insert(backend, factory);
        self
    }

    /// Annotation key table
    #[must_use]
    pub fn keys(&self) -> &AnnotationKeys {
        &self.keys
    }

    /// Backend of `volume`, provided a collector is registered for it
    pub fn resolve(&self, volume: &PersistentVolume) -> Result<BackendType, ReconcilerError> {
        let name = volume.metadata.name.clone().unwrap_or_default();

        if let Some(backend) = BackendType::detect(volume) {
            if self.factories.contains_key(&backend) {
                return Ok(backend);
            }
            return Err(ReconcilerError::UnsupportedBackend {
                volume: name,
                backend: backend.token().to_string(),
            });
        }

        // Only used to name the backend in the error
        let named = cas_type(volume).map(str::to_string).or_else(|| {
            volume
                .metadata
                .finalizers
                .iter()
                .flatten()
                .find_map(|finalizer| finalizer_token(finalizer))
                .map(str::to_string)
        });
        match named {
            Some(backend) => Err(ReconcilerError::UnsupportedBackend {
                volume: name,
                backend,
            }),
            None => Err(ReconcilerError::UnknownBackend { volume: name }),
        }
    }

    /// Build the collector of `backend` for `volume`
    pub fn build(
        &self,
        backend: BackendType,
        store: Arc<dyn ResourceStore>,
        volume: PersistentVolume,
        config: SharedExporterConfig,
    ) -> Result<Box<dyn VolumeEventCollector>, ReconcilerError> {
        let unsupported = || ReconcilerError::UnsupportedBackend {
            volume: volume.metadata.name.clone().unwrap_or_default(),
            backend: backend.token().to_string(),
        };
        let factory = self.factories.get(&backend).ok_or_else(unsupported)?;
        let keys = self.keys.get(backend).cloned().ok_or_else(unsupported)?;
        Ok(factory(CollectorContext {
            store,
            volume,
            keys,
            config,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CAS_TYPE_LABEL, NFS_VOLUME_LABEL};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn volume(labels: &[(&str, &str)], finalizers: &[&str]) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pvc-1".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                finalizers: Some(finalizers.iter().map(|f| (*f).to_string()).collect()),
                ..ObjectMeta::default()
            },
            ..PersistentVolume::default()
        }
    }

    #[test]
    fn test_resolves_registered_backend() {
        let registry = CollectorRegistry::with_defaults();
        let backend = registry
            .resolve(&volume(&[(NFS_VOLUME_LABEL, "true")], &[]))
            .unwrap();
        assert_eq!(backend, BackendType::Nfs);
    }

    #[test]
    fn test_unregistered_backend_is_unsupported() {
        let registry = CollectorRegistry::empty();
        let err = registry
            .resolve(&volume(&[(NFS_VOLUME_LABEL, "true")], &[]))
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::UnsupportedBackend { ref backend, .. } if backend == "nfs"
        ));
        assert!(err.is_misconfiguration());
    }

    #[test]
    fn test_foreign_finalizer_names_backend() {
        let registry = CollectorRegistry::with_defaults();
        let err = registry
            .resolve(&volume(&[], &["jiva.events.openebs.io/finalizer"]))
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::UnsupportedBackend { ref backend, .. } if backend == "jiva"
        ));
    }

    #[test]
    fn test_foreign_cas_type_names_backend() {
        let registry = CollectorRegistry::with_defaults();
        let err = registry
            .resolve(&volume(&[(CAS_TYPE_LABEL, "cstor")], &[]))
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::UnsupportedBackend { ref backend, .. } if backend == "cstor"
        ));
    }

    #[test]
    fn test_collector_context_debug_names_volume() {
        let ctx = CollectorContext {
            store: Arc::new(crate::store::memory::MemoryStore::new()),
            volume: volume(&[(NFS_VOLUME_LABEL, "true")], &[]),
            keys: BackendKeys::for_backend(BackendType::Nfs),
            config: Arc::new(crate::config::ExporterConfig::default()),
        };
        let rendered = format!("{ctx:?}");
        assert!(rendered.starts_with("CollectorContext"));
        assert!(rendered.contains("pvc-1"));
        assert!(rendered.contains("nfs.events.openebs.io/finalizer"));
    }

    #[test]
    fn test_undetermined_backend() {
        let registry = CollectorRegistry::with_defaults();
        let err = registry
            .resolve(&volume(&[], &["kubernetes.io/pv-protection"]))
            .unwrap_err();
        assert!(matches!(err, ReconcilerError::UnknownBackend { .. }));
    }
}
