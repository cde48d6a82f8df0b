//! Transport encryption for sensitive request bodies.
//!
//! Credential updates are sealed with a fresh AES-256-GCM key, and that key
//! is wrapped with the server's RSA public key (OAEP, SHA-256).

use crate::error::ClientError;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const HYBRID_ALGORITHM: &str = "RSA-OAEP-256+AES-256-GCM";

/// Ciphertext envelope sent in place of a sensitive JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 RSA-wrapped content key.
    pub wrapped_key: String,
    /// Base64 AES-GCM nonce.
    pub iv: String,
    /// Base64 AES-GCM ciphertext with tag.
    pub ciphertext: String,
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

pub trait PayloadCipher: Send + Sync {
    fn seal(
        &self,
        public_key_pem: &str,
        key_id: Option<&str>,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, ClientError>;
}

/// RSA-OAEP key wrapping over AES-256-GCM content encryption.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridCipher;

impl PayloadCipher for HybridCipher {
    fn seal(
        &self,
        public_key_pem: &str,
        key_id: Option<&str>,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, ClientError> {
        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem.trim())
            .map_err(|err| ClientError::Encryption(format!("invalid public key: {}", err)))?;

        let key = Aes256Gcm::generate_key(OsRng);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = Aes256Gcm::new(&key)
            .encrypt(&nonce, plaintext)
            .map_err(|_| ClientError::Encryption("content encryption failed".to_string()))?;
        let wrapped_key = public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_slice())
            .map_err(|err| ClientError::Encryption(format!("key wrapping failed: {}", err)))?;

        Ok(EncryptedPayload {
            wrapped_key: STANDARD.encode(wrapped_key),
            iv: STANDARD.encode(nonce.as_slice()),
            ciphertext: STANDARD.encode(ciphertext),
            algorithm: HYBRID_ALGORITHM.to_string(),
            key_id: Some(
                key_id
                    .map(str::to_string)
                    .unwrap_or_else(|| fingerprint(public_key_pem)),
            ),
        })
    }
}

/// Short stable identifier for a public key the server did not name.
pub fn fingerprint(public_key_pem: &str) -> String {
    let digest = Sha256::digest(public_key_pem.trim().as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..12])
}
