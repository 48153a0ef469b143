//! # Resource Store
//!
//! Read/write access to the PersistentVolume graph.
//!
//! Cache reads (`cached_*`) come from the shared informer cache and always return an
//! owned copy, so callers may mutate what they get back. Live reads and all writes go
//! to the API server. `update_*` replaces the object and fails with
//! [`StoreError::Conflict`] on a stale `resourceVersion`; `patch_volume` applies a JSON
//! merge patch server side against whatever version is current.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use thiserror::Error;

pub mod cluster;
pub mod memory;

pub use cluster::KubeStore;
pub use memory::{MemoryStore, StoreCall, StoreOp};

pub(crate) const VOLUME_KIND: &str = "PersistentVolume";
pub(crate) const CLAIM_KIND: &str = "PersistentVolumeClaim";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("API request for {kind} {name} failed: {source}")]
    Api {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("{kind} {name} is temporarily unavailable: {message}")]
    Unavailable {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("failed to (de)serialize {kind} {name}: {source}")]
    Serialization {
        kind: &'static str,
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// True when the object does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// True when a write lost an optimistic-concurrency race
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Classify a kube client error for the given object
    pub(crate) fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict {
                kind,
                name: name.to_string(),
                message: resp.message.clone(),
            },
            other => StoreError::Api {
                kind,
                name: name.to_string(),
                source: other,
            },
        }
    }
}

/// Access to volumes and claims
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the current volume from the API server
    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, StoreError>;

    /// Read a volume from the cache (owned copy)
    async fn cached_volume(&self, name: &str) -> Result<PersistentVolume, StoreError>;

    /// Read a claim from the cache (owned copy)
    async fn cached_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, StoreError>;

    /// Replace a volume (optimistic concurrency on resourceVersion)
    async fn update_volume(&self, volume: &PersistentVolume)
        -> Result<PersistentVolume, StoreError>;

    /// Replace a claim (optimistic concurrency on resourceVersion)
    async fn update_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, StoreError>;

    /// Apply a JSON merge patch to the latest version of a volume
    async fn patch_volume(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<PersistentVolume, StoreError>;
}

/// Optional-namespace display helper for log lines (`ns/name` or `name`)
pub(crate) fn display_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}
