//! # Receiver
//!
//! Callback-side decoding and verification of exported events. The exporter
//! never calls this; collectors and the end-to-end tests do.

use crate::collector::{DataType, EventKind, VolumeData};
use crate::sign::{verify_json, SignError, Verification, Verifier};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("failed to decode JSON event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to decode YAML event: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("event carries neither volume_provisioned nor volume_deleted")]
    MissingEvent,

    #[error("event carries both volume_provisioned and volume_deleted")]
    AmbiguousEvent,

    #[error("event signature rejected: {0}")]
    Signature(#[from] SignError),
}

/// Decoded callback body
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeEventEnvelope {
    #[serde(default)]
    pub volume_provisioned: Option<VolumeData>,
    #[serde(default)]
    pub volume_deleted: Option<VolumeData>,
    #[serde(default)]
    pub signature: String,
}

impl VolumeEventEnvelope {
    /// Decode a request body posted with `data_type`
    pub fn decode(body: &[u8], data_type: DataType) -> Result<Self, ReceiveError> {
        match data_type {
            DataType::Json => Ok(serde_json::from_slice(body)?),
            DataType::Yaml => Ok(serde_yaml::from_slice(body)?),
        }
    }

    /// The single event carried by the envelope
    pub fn event(&self) -> Result<(EventKind, &VolumeData), ReceiveError> {
        match (&self.volume_provisioned, &self.volume_deleted) {
            (Some(data), None) => Ok((EventKind::Create, data)),
            (None, Some(data)) => Ok((EventKind::Delete, data)),
            (None, None) => Err(ReceiveError::MissingEvent),
            (Some(_), Some(_)) => Err(ReceiveError::AmbiguousEvent),
        }
    }
}

/// Check the envelope signature against the volume data it carries
///
/// An empty signature is accepted as [`Verification::Unsigned`]; a signature that
/// does not match is an error.
pub fn verify_envelope(
    verifier: &dyn Verifier,
    envelope: &VolumeEventEnvelope,
) -> Result<(EventKind, Verification), ReceiveError> {
    let (kind, data) = envelope.event()?;
    let verification = verify_json(verifier, data, &envelope.signature)?;
    Ok((kind, verification))
}
