use thiserror::Error;

use crate::secure_storage::KeyStoreError;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed (authentication tag mismatch or missing key)")]
    DecryptionFailed,

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error("Serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),
}
