use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Algorithm label stamped on every payload.
pub const AES_GCM_256: &str = "AES-GCM-256";

/// Crypto failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The cipher rejected the operation.
    #[error("encryption failed")]
    EncryptionFailed,
}

/// Run-scoped AES-256 key. Zeroised on drop, so a finished run leaves
/// no key material behind on any exit path.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EphemeralKey {
    bytes: [u8; 32],
}

impl EphemeralKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralKey(..)")
    }
}

/// Encrypted analysis payload as surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// 96-bit nonce.
    #[serde(with = "hex_bytes")]
    pub iv: Vec<u8>,
    /// Ciphertext with the appended authentication tag.
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    /// Always [`AES_GCM_256`].
    pub algorithm: String,
    /// Plaintext size in bytes.
    pub payload_size: usize,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}

/// Cryptographic primitives consumed by the pipeline. The primitives
/// themselves are assumed sound; this trait exists so tests can observe
/// and pin them.
pub trait Crypto: Send + Sync {
    /// Allocates a fresh run-scoped key.
    fn generate_ephemeral_key(&self) -> EphemeralKey;
    /// AES-GCM-256 encryption with a fresh nonce per call.
    fn aes_gcm_encrypt(
        &self,
        key: &EphemeralKey,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, CryptoError>;
    /// SHA-256 digest.
    fn sha256(&self, bytes: &[u8]) -> [u8; 32];
}

/// Production crypto over the `aes-gcm` and `sha2` implementations.
#[derive(Debug, Clone, Default)]
pub struct StdCrypto;

impl Crypto for StdCrypto {
    fn generate_ephemeral_key(&self) -> EphemeralKey {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        EphemeralKey::from_bytes(bytes)
    }

    fn aes_gcm_encrypt(
        &self,
        key: &EphemeralKey,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(EncryptedPayload {
            iv: nonce.to_vec(),
            ciphertext,
            algorithm: AES_GCM_256.to_string(),
            payload_size: plaintext.len(),
        })
    }

    fn sha256(&self, bytes: &[u8]) -> [u8; 32] {
        Sha256::digest(bytes).into()
    }
}
