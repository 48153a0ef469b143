//! # Key Generation
//!
//! Generates PKCS#1 key pairs in the PEM layout the signer and verifier load.

use super::pss::{PRIVATE_KEY_TAG, PUBLIC_KEY_TAG};
use super::SignError;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Smallest modulus accepted by [`generate_key_pair`]
pub const MIN_KEY_BITS: usize = 1024;

/// PEM encoded key pair
pub struct KeyPairPem {
    pub private_pem: Zeroizing<String>,
    pub public_pem: String,
}

impl std::fmt::Debug for KeyPairPem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairPem")
            .field("private_pem", &"***")
            .field("public_pem", &self.public_pem)
            .finish()
    }
}

/// Generate an RSA key pair of `bits` bits
///
/// The private key is written as `RSA PRIVATE KEY` and the public key as a PKCS#1
/// body under a `PUBLIC KEY` block.
pub fn generate_key_pair(bits: usize) -> Result<KeyPairPem, SignError> {
    if bits < MIN_KEY_BITS {
        return Err(SignError::KeyGeneration(format!(
            "{bits} bits is below the {MIN_KEY_BITS} bit minimum"
        )));
    }
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| SignError::KeyGeneration(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_der = private_key
        .to_pkcs1_der()
        .map_err(|e| SignError::KeyGeneration(e.to_string()))?;
    let public_der = public_key
        .to_pkcs1_der()
        .map_err(|e| SignError::KeyGeneration(e.to_string()))?;

    let private_pem = Zeroizing::new(pem::encode(&pem::Pem::new(
        PRIVATE_KEY_TAG,
        private_der.as_bytes().to_vec(),
    )));
    let public_pem = pem::encode(&pem::Pem::new(PUBLIC_KEY_TAG, public_der.as_bytes().to_vec()));

    Ok(KeyPairPem {
        private_pem,
        public_pem,
    })
}

/// Write `signing.pem` and `signing.pub.pem` into `dir`; returns both paths
pub fn write_key_pair(keys: &KeyPairPem, dir: &Path) -> Result<(PathBuf, PathBuf), SignError> {
    std::fs::create_dir_all(dir).map_err(write_error(dir))?;

    let private_path = dir.join("signing.pem");
    let public_path = dir.join("signing.pub.pem");
    std::fs::write(&private_path, keys.private_pem.as_bytes()).map_err(write_error(&private_path))?;
    std::fs::write(&public_path, keys.public_pem.as_bytes()).map_err(write_error(&public_path))?;
    Ok((private_path, public_path))
}

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> SignError {
    let path = path.to_path_buf();
    move |source| SignError::WriteKey { path, source }
}
