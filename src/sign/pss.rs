//! RSA-PSS signer and verifier backed by PKCS#1 PEM keys.

use super::{NoopSigner, NoopVerifier, SignError, Signer, Verification, Verifier};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier as _};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

pub(crate) const PRIVATE_KEY_TAG: &str = "RSA PRIVATE KEY";
pub(crate) const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

/// RSA-PSS/SHA-256 signer
pub struct RsaSigner {
    key: BlindedSigningKey<Sha256>,
    bits: usize,
}

impl std::fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSigner")
            .field("bits", &self.bits)
            .field("key", &"***")
            .finish()
    }
}

impl RsaSigner {
    /// Parse a `RSA PRIVATE KEY` (PKCS#1) PEM block
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, SignError> {
        let block = pem::parse(pem_bytes)?;
        if block.tag() != PRIVATE_KEY_TAG {
            return Err(SignError::UnsupportedKeyType {
                tag: block.tag().to_string(),
                expected: PRIVATE_KEY_TAG,
            });
        }
        let der = Zeroizing::new(block.into_contents());
        let key = RsaPrivateKey::from_pkcs1_der(&der)
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        let bits = key.size() * 8;
        Ok(Self {
            key: BlindedSigningKey::<Sha256>::new(key),
            bits,
        })
    }

    #[must_use]
    pub fn bits(&self) -> usize {
        self.bits
    }
}

impl Signer for RsaSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignError> {
        let mut rng = rand::thread_rng();
        let signature = self
            .key
            .try_sign_with_rng(&mut rng, message)
            .map_err(|e| SignError::Sign(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

/// RSA-PSS/SHA-256 verifier
pub struct RsaVerifier {
    key: VerifyingKey<Sha256>,
    bits: usize,
}

impl std::fmt::Debug for RsaVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaVerifier")
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

impl RsaVerifier {
    /// Parse a `PUBLIC KEY` PEM block holding a PKCS#1 body
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, SignError> {
        let block = pem::parse(pem_bytes)?;
        if block.tag() != PUBLIC_KEY_TAG {
            return Err(SignError::UnsupportedKeyType {
                tag: block.tag().to_string(),
                expected: PUBLIC_KEY_TAG,
            });
        }
        let key = RsaPublicKey::from_pkcs1_der(block.contents())
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        let bits = key.size() * 8;
        Ok(Self {
            key: VerifyingKey::<Sha256>::new(key),
            bits,
        })
    }

    #[must_use]
    pub fn bits(&self) -> usize {
        self.bits
    }
}

impl Verifier for RsaVerifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<Verification, SignError> {
        if signature.is_empty() {
            return Ok(Verification::Unsigned);
        }
        let signature = Signature::try_from(signature).map_err(|_| SignError::Mismatch)?;
        self.key
            .verify(message, &signature)
            .map_err(|_| SignError::Mismatch)?;
        Ok(Verification::Verified)
    }
}

fn read_pem(path: &Path) -> Result<Zeroizing<Vec<u8>>, SignError> {
    std::fs::read(path)
        .map(Zeroizing::new)
        .map_err(|source| SignError::ReadKey {
            path: path.to_path_buf(),
            source,
        })
}

/// Signer for the configured private key, or [`NoopSigner`] when none is configured
pub fn load_signer(path: Option<&Path>) -> Result<Arc<dyn Signer>, SignError> {
    match path {
        Some(path) => {
            let signer = RsaSigner::from_pem(&read_pem(path)?)?;
            info!(key.path = %path.display(), key.bits = signer.bits(), "sign.signer.loaded");
            Ok(Arc::new(signer))
        }
        None => {
            info!("sign.signer.disabled");
            Ok(Arc::new(NoopSigner))
        }
    }
}

/// Verifier for the configured public key, or [`NoopVerifier`] when none is configured
pub fn load_verifier(path: Option<&Path>) -> Result<Arc<dyn Verifier>, SignError> {
    match path {
        Some(path) => {
            let verifier = RsaVerifier::from_pem(&read_pem(path)?)?;
            info!(key.path = %path.display(), key.bits = verifier.bits(), "sign.verifier.loaded");
            Ok(Arc::new(verifier))
        }
        None => Ok(Arc::new(NoopVerifier)),
    }
}
