//! # Volume Data Collector
//!
//! Per-backend capability set used by the reconciler:
//!
//! - assemble the create/delete payload from the volume's resource graph
//! - write the delivery markers onto the volume
//! - release the deletion holds across the volume's dependent chain
//!
//! One implementation exists per backend type ([`NfsVolume`] for NFS provisioned volumes).

use crate::store::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod backend;
pub mod meta;
pub mod nfs;

pub use backend::{AnnotationKeys, BackendKeys, BackendType};
pub use nfs::NfsVolume;

/// Encoding of the callback request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    Json,
    Yaml,
}

impl DataType {
    /// `Content-Type` header value for this encoding
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            DataType::Json => "application/json",
            DataType::Yaml => "text/yaml",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Json => "json",
            DataType::Yaml => "yaml",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unsupported callback data type '{0}' (expected json or yaml)")]
pub struct UnknownDataType(String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(DataType::Json),
            "yaml" => Ok(DataType::Yaml),
            other => Err(UnknownDataType(other.to_string())),
        }
    }
}

/// Lifecycle event exported for a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Create,
    Delete,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Delete => "delete",
        }
    }

    /// Top-level key of the wire envelope carrying the volume data
    #[must_use]
    pub fn payload_key(self) -> &'static str {
        match self {
            EventKind::Create => "volume_provisioned",
            EventKind::Delete => "volume_deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the resources making up one exported volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeData {
    /// `None` once the user's claim has already been deleted
    pub primary_claim: Option<PersistentVolumeClaim>,
    pub primary_volume: PersistentVolume,
    pub backing_claim: PersistentVolumeClaim,
    pub backing_volume: PersistentVolume,
}

/// Signed event envelope posted to the collector
///
/// Serializes as `{"volume_provisioned": {..}, "signature": ".."}` for create and
/// `{"volume_deleted": {..}, "signature": ".."}` for delete.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub kind: EventKind,
    pub volume_data: VolumeData,
    /// Base64 signature over the JSON form of `volume_data`; empty when unsigned
    pub signature: String,
}

impl EventPayload {
    #[must_use]
    pub fn new(kind: EventKind, volume_data: VolumeData, signature: String) -> Self {
        Self {
            kind,
            volume_data,
            signature,
        }
    }

    /// Encode the envelope for the wire
    pub fn encode(&self, data_type: DataType) -> Result<Vec<u8>, EncodeError> {
        match data_type {
            DataType::Json => Ok(serde_json::to_vec(self)?),
            DataType::Yaml => Ok(serde_yaml::to_string(self)?.into_bytes()),
        }
    }
}

impl Serialize for EventPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut envelope = serializer.serialize_struct("EventPayload", 2)?;
        envelope.serialize_field(self.kind.payload_key(), &self.volume_data)?;
        envelope.serialize_field("signature", &self.signature)?;
        envelope.end()
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode payload as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode payload as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum CollectorError {
    /// A backing resource the payload needs does not exist
    #[error("resource graph of volume {volume} is incomplete: {source}")]
    IncompleteGraph {
        volume: String,
        #[source]
        source: StoreError,
    },

    #[error("volume {volume} is not marked for deletion")]
    NotYetDeletable { volume: String },

    #[error("volume {volume} has no claim reference")]
    MissingClaimRef { volume: String },

    #[error("backing claim {claim} is not bound to a volume")]
    UnboundBackingClaim { claim: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Capability set the reconciler drives for one volume
///
/// The collector owns an in-memory handle of the volume it was built for; the
/// annotate operations replace that handle with the written result so later steps
/// work against the latest `resourceVersion`.
#[async_trait]
pub trait VolumeEventCollector: Send + Sync {
    /// Current in-memory handle of the volume
    fn volume(&self) -> &PersistentVolume;

    /// Gather the create payload, with all deletion metadata scrubbed
    async fn collect_create_event_data(&self) -> Result<VolumeData, CollectorError>;

    /// Gather the delete payload; fails unless the volume is being deleted
    async fn collect_delete_event_data(&self) -> Result<VolumeData, CollectorError>;

    /// Mark the create event as delivered (direct update)
    async fn annotate_create_complete(
        &mut self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, CollectorError>;

    /// Mark the delete event as delivered (merge patch on the latest version)
    async fn annotate_delete_complete(
        &mut self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, CollectorError>;

    /// Release the finalizer on the backing volume, the backing claim and then the
    /// volume itself. Returns how many finalizers were actually removed.
    async fn remove_event_finalizer(&mut self) -> Result<usize, CollectorError>;
}
