//! Credential material and shared-secret resolution.
//!
//! The signing chain is rooted in a symmetric shared secret that is stored
//! RSA-encrypted (PKCS#1 v1.5) and recovered on demand with the configured
//! private key. Resolution is a pure function of the stored material, so the
//! result is cached after the first call; a racing duplicate decrypt is
//! harmless because identical inputs always yield identical bytes.

use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use std::sync::OnceLock;

/// Where the plaintext shared secret comes from.
enum SecretSource {
    /// base64 ciphertext plus the RSA private key that unlocks it
    Encrypted {
        ciphertext_b64: String,
        private_key: RsaPrivateKey,
    },
    /// Pre-resolved secret bytes (tests and stub upstreams)
    Plaintext(Vec<u8>),
}

/// Process-wide, read-only credential material.
///
/// Created once at startup and shared across all requests; safe for
/// unsynchronized concurrent reads.
pub struct CredentialStore {
    key_id: String,
    source: SecretSource,
    resolved: OnceLock<Vec<u8>>,
}

impl CredentialStore {
    /// Create a store from an RSA-encrypted shared secret.
    pub fn new(
        key_id: impl Into<String>,
        encrypted_shared_secret_b64: impl Into<String>,
        private_key: RsaPrivateKey,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            source: SecretSource::Encrypted {
                ciphertext_b64: encrypted_shared_secret_b64.into(),
                private_key,
            },
            resolved: OnceLock::new(),
        }
    }

    /// Create a store from a private key in PEM form.
    ///
    /// Accepts both PKCS#1 (`BEGIN RSA PRIVATE KEY`) and PKCS#8
    /// (`BEGIN PRIVATE KEY`) encodings.
    pub fn from_pem(
        key_id: impl Into<String>,
        encrypted_shared_secret_b64: impl Into<String>,
        private_key_pem: &str,
    ) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(private_key_pem))
            .map_err(|e| {
                GatewayError::credential(format!("Failed to parse RSA private key PEM: {}", e))
            })?;

        Ok(Self::new(key_id, encrypted_shared_secret_b64, private_key))
    }

    /// Create a store whose shared secret is already resolved.
    ///
    /// Used by tests and stub upstreams that need to sign responses with the
    /// same secret the gateway verifies against.
    pub fn with_shared_secret(key_id: impl Into<String>, secret: Vec<u8>) -> Self {
        Self {
            key_id: key_id.into(),
            source: SecretSource::Plaintext(secret),
            resolved: OnceLock::new(),
        }
    }

    /// The signing key identifier, the first component of every signature scope.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Resolve the plaintext shared secret.
    ///
    /// base64-decodes the stored ciphertext and RSA-decrypts it with PKCS#1
    /// v1.5 padding. Deterministic and idempotent; cached after first use.
    pub fn shared_secret(&self) -> Result<&[u8]> {
        if let Some(secret) = self.resolved.get() {
            return Ok(secret);
        }

        let secret = match &self.source {
            SecretSource::Encrypted {
                ciphertext_b64,
                private_key,
            } => {
                let ciphertext = BASE64.decode(ciphertext_b64.trim()).map_err(|e| {
                    GatewayError::credential(format!(
                        "Encrypted shared secret is not valid base64: {}",
                        e
                    ))
                })?;
                private_key
                    .decrypt(Pkcs1v15Encrypt, &ciphertext)
                    .map_err(|e| {
                        GatewayError::credential(format!(
                            "Failed to decrypt shared secret: {}",
                            e
                        ))
                    })?
            }
            SecretSource::Plaintext(secret) => secret.clone(),
        };

        Ok(self.resolved.get_or_init(|| secret))
    }
}
