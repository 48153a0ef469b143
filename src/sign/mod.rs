//! # Payload Signing
//!
//! Detached RSA-PSS (SHA-256) signatures over the JSON form of a payload.
//!
//! Signing is optional: without a private key the [`NoopSigner`] produces an empty
//! signature, and the receiver treats an empty signature as "unsigned" rather than
//! as a failure. Keys are PKCS#1 PEM and are validated when loaded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub mod keys;
mod pss;

pub use keys::{generate_key_pair, write_key_pair, KeyPairPem};
pub use pss::{load_signer, load_verifier, RsaSigner, RsaVerifier};

#[derive(Debug, Error)]
pub enum SignError {
    #[error("failed to read key file {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write key file {path}: {source}")]
    WriteKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key is not valid PEM: {0}")]
    Pem(#[from] pem::PemError),

    #[error("unsupported key block '{tag}' (expected {expected})")]
    UnsupportedKeyType { tag: String, expected: &'static str },

    #[error("invalid RSA key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Sign(String),

    #[error("signature is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("signature does not match payload")]
    Mismatch,

    #[error("failed to serialize payload for signing: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

/// Outcome of a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Signature present and valid
    Verified,
    /// No signature supplied, or no key to check it with
    Unsigned,
}

/// Produces detached signatures
pub trait Signer: Send + Sync + std::fmt::Debug {
    /// Sign `message`; an empty result means "not signed"
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// Checks detached signatures
pub trait Verifier: Send + Sync + std::fmt::Debug {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<Verification, SignError>;
}

/// Signer used when no private key is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSigner;

impl Signer for NoopSigner {
    fn sign(&self, _message: &[u8]) -> Result<Vec<u8>, SignError> {
        Ok(Vec::new())
    }
}

/// Verifier used when no public key is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVerifier;

impl Verifier for NoopVerifier {
    fn verify(&self, _message: &[u8], _signature: &[u8]) -> Result<Verification, SignError> {
        Ok(Verification::Unsigned)
    }
}

/// Sign the JSON form of `payload` and return the base64 signature (`""` when unsigned)
pub fn sign_json<T: Serialize + ?Sized>(
    signer: &dyn Signer,
    payload: &T,
) -> Result<String, SignError> {
    let message = serde_json::to_vec(payload)?;
    let signature = signer.sign(&message)?;
    if signature.is_empty() {
        return Ok(String::new());
    }
    Ok(STANDARD.encode(signature))
}

/// Verify a base64 signature over the JSON form of `payload`
pub fn verify_json<T: Serialize + ?Sized>(
    verifier: &dyn Verifier,
    payload: &T,
    signature: &str,
) -> Result<Verification, SignError> {
    if signature.is_empty() {
        return Ok(Verification::Unsigned);
    }
    let signature = STANDARD.decode(signature)?;
    let message = serde_json::to_vec(payload)?;
    verifier.verify(&message, &signature)
}
