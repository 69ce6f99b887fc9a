//! Secure key storage capability.
//!
//! Key material is addressed by `(service, account)`. A missing key is a
//! distinguished `Ok(None)`, never an error.

use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("secure storage unavailable: {0}")]
    Unavailable(String),

    #[error("store key: {0}")]
    Save(String),

    #[error("load key: {0}")]
    Load(String),

    #[error("delete key: {0}")]
    Delete(String),

    #[error("stored key is corrupt: {0}")]
    Corrupt(String),
}

/// Opaque blob storage for per-namespace key material.
///
/// Implementations must be safe to share between every namespace's cipher.
pub trait KeyStore: Send + Sync {
    fn save(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), KeyStoreError>;

    fn load(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, KeyStoreError>;

    /// Deleting a key that does not exist succeeds.
    fn delete(&self, service: &str, account: &str) -> Result<(), KeyStoreError>;

    /// Store `secret` only if no key exists yet, atomically with respect to
    /// other writers of this store. Returns the key stored afterwards, which
    /// is the existing one when another writer got there first.
    fn save_if_absent(
        &self,
        service: &str,
        account: &str,
        secret: &[u8],
    ) -> Result<Vec<u8>, KeyStoreError>;
}

/// Serializes create-if-missing across every `KeyringStore` in the process.
static KEYRING_CREATE: Mutex<()> = parking_lot::const_mutex(());

/// Platform credential store (Keychain, Credential Manager, Secret Service).
#[derive(Debug, Default, Clone)]
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> Result<Entry, KeyStoreError> {
        Entry::new(service, account)
            .map_err(|e| KeyStoreError::Unavailable(format!("keyring init: {e}")))
    }
}

impl KeyStore for KeyringStore {
    fn save(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), KeyStoreError> {
        let entry = Self::entry(service, account)?;
        let encoded = general_purpose::STANDARD.encode(secret);
        entry
            .set_password(&encoded)
            .map_err(|e| KeyStoreError::Save(e.to_string()))
    }

    fn load(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        let entry = Self::entry(service, account)?;
        let encoded = match entry.get_password() {
            Ok(encoded) => encoded,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(KeyStoreError::Load(e.to_string())),
        };
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| KeyStoreError::Corrupt(format!("decode key: {e}")))?;
        Ok(Some(decoded))
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), KeyStoreError> {
        let entry = Self::entry(service, account)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeyStoreError::Delete(e.to_string())),
        }
    }

    fn save_if_absent(
        &self,
        service: &str,
        account: &str,
        secret: &[u8],
    ) -> Result<Vec<u8>, KeyStoreError> {
        let _create = KEYRING_CREATE.lock();
        if let Some(existing) = self.load(service, account)? {
            return Ok(existing);
        }
        self.save(service, account, secret)?;
        Ok(secret.to_vec())
    }
}

/// Process-local key store. Keys vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn save(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), KeyStoreError> {
        self.keys
            .lock()
            .insert((service.to_string(), account.to_string()), secret.to_vec());
        Ok(())
    }

    fn load(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        Ok(self
            .keys
            .lock()
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), KeyStoreError> {
        self.keys
            .lock()
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }

    fn save_if_absent(
        &self,
        service: &str,
        account: &str,
        secret: &[u8],
    ) -> Result<Vec<u8>, KeyStoreError> {
        Ok(self
            .keys
            .lock()
            .entry((service.to_string(), account.to_string()))
            .or_insert_with(|| secret.to_vec())
            .clone())
    }
}
