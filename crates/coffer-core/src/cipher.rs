//! Per-namespace encryption at rest.
//!
//! Envelope wire format (version 1, XChaCha20-Poly1305):
//!   [ magic "CFR\0" (4) | version (1) | nonce (24) | ciphertext | tag (16) ]
//!
//! The magic and version bytes are bound as associated data. Blobs without
//! the magic marker are treated as legacy plaintext and pass through
//! `decrypt` unchanged.

use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::CipherError;
use crate::secure_storage::{KeyStore, KeyStoreError};

pub const ENVELOPE_MAGIC: &[u8; 4] = b"CFR\0";
pub const VERSION_XCHACHA20_POLY1305: u8 = 1;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
/// Magic + version + nonce.
pub const HEADER_LEN: usize = ENVELOPE_MAGIC.len() + 1 + NONCE_LEN;

/// Namespace used by the search index for its own snapshot.
pub const INDEX_NAMESPACE: &str = "search-index";
pub const DEFAULT_KEY_SERVICE: &str = "com.coffer.vault";
const KEY_ACCOUNT: &str = "encryption-key";

/// A parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl Envelope {
    /// Split a blob into its envelope parts. Returns `None` for anything that
    /// does not carry the magic marker or is too short to hold a tag.
    pub fn parse(blob: &[u8]) -> Option<Self> {
        if !looks_encrypted(blob) {
            return None;
        }
        let version = blob[ENVELOPE_MAGIC.len()];
        let nonce: [u8; NONCE_LEN] = blob[ENVELOPE_MAGIC.len() + 1..HEADER_LEN]
            .try_into()
            .ok()?;
        let body = &blob[HEADER_LEN..];
        let (ciphertext, tag) = body.split_at(body.len() - TAG_LEN);
        Some(Self {
            version,
            nonce,
            ciphertext: ciphertext.to_vec(),
            tag: tag.try_into().ok()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&header_aad(self.version));
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }
}

/// Heuristic check used to tell envelopes apart from legacy plaintext.
/// Never fails; only inspects the marker and the minimum length.
pub fn looks_encrypted(blob: &[u8]) -> bool {
    blob.len() >= HEADER_LEN + TAG_LEN && blob.starts_with(ENVELOPE_MAGIC)
}

fn header_aad(version: u8) -> [u8; 5] {
    let mut aad = [0u8; 5];
    aad[..4].copy_from_slice(ENVELOPE_MAGIC);
    aad[4] = version;
    aad
}

/// Symmetric cipher bound to one namespace's key.
///
/// The key is generated on first encryption, persisted in the injected
/// [`KeyStore`] and cached in memory for the lifetime of the instance.
pub struct CipherService {
    namespace: String,
    service: String,
    store: Arc<dyn KeyStore>,
    key: Mutex<Option<Zeroizing<[u8; KEY_LEN]>>>,
}

impl std::fmt::Debug for CipherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherService")
            .field("namespace", &self.namespace)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl CipherService {
    pub fn new(namespace: impl Into<String>, store: Arc<dyn KeyStore>) -> Self {
        Self::with_service(DEFAULT_KEY_SERVICE, namespace, store)
    }

    /// Same as [`CipherService::new`] but with a custom key-store service prefix.
    pub fn with_service(
        service_prefix: &str,
        namespace: impl Into<String>,
        store: Arc<dyn KeyStore>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            service: format!("{service_prefix}.{namespace}"),
            namespace,
            store,
            key: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(self.seal(plaintext)?.to_bytes())
    }

    /// Encrypt into a structured [`Envelope`].
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, CipherError> {
        let key = self.key_or_generate()?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|_| CipherError::EncryptionFailed)?;
        let aad = header_aad(VERSION_XCHACHA20_POLY1305);
        let mut sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        let tag_start = sealed.len() - TAG_LEN;
        let tag: [u8; TAG_LEN] = sealed[tag_start..]
            .try_into()
            .map_err(|_| CipherError::EncryptionFailed)?;
        sealed.truncate(tag_start);
        Ok(Envelope {
            version: VERSION_XCHACHA20_POLY1305,
            nonce,
            ciphertext: sealed,
            tag,
        })
    }

    /// Decrypt an envelope. Blobs that do not look encrypted are returned as-is.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
        let Some(envelope) = Envelope::parse(blob) else {
            return Ok(blob.to_vec());
        };
        self.open(&envelope)
    }

    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, CipherError> {
        if envelope.version != VERSION_XCHACHA20_POLY1305 {
            return Err(CipherError::UnsupportedVersion(envelope.version));
        }
        let key = self.existing_key()?.ok_or(CipherError::DecryptionFailed)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|_| CipherError::DecryptionFailed)?;

        let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&envelope.ciphertext);
        sealed.extend_from_slice(&envelope.tag);
        let aad = header_aad(envelope.version);
        cipher
            .decrypt(
                XNonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| CipherError::DecryptionFailed)
    }

    /// Encrypt a text field into base64.
    pub fn encrypt_text(&self, text: &str) -> Result<String, CipherError> {
        let blob = self.encrypt(text.as_bytes())?;
        Ok(general_purpose::STANDARD.encode(blob))
    }

    /// Decrypt a base64 text field. Text that is not an encoded envelope is
    /// legacy plaintext and is returned unchanged.
    pub fn decrypt_text(&self, text: &str) -> Result<String, CipherError> {
        let blob = match general_purpose::STANDARD.decode(text) {
            Ok(blob) if looks_encrypted(&blob) => blob,
            _ => return Ok(text.to_string()),
        };
        let plaintext = self.decrypt(&blob)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }

    pub fn looks_encrypted(&self, blob: &[u8]) -> bool {
        looks_encrypted(blob)
    }

    pub fn looks_encrypted_text(&self, text: &str) -> bool {
        looks_encrypted_text(text)
    }

    /// Delete this namespace's key. Data encrypted under it becomes unreadable.
    pub fn reset(&self) -> Result<(), CipherError> {
        let mut cached = self.key.lock();
        self.store.delete(&self.service, KEY_ACCOUNT)?;
        *cached = None;
        info!(namespace = %self.namespace, "namespace key deleted");
        Ok(())
    }

    fn key_or_generate(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, CipherError> {
        let mut cached = self.key.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        let key = match self.load_key()? {
            Some(key) => key,
            None => {
                let mut candidate = Zeroizing::new([0u8; KEY_LEN]);
                OsRng
                    .try_fill_bytes(&mut candidate[..])
                    .map_err(|_| CipherError::EncryptionFailed)?;
                // another writer may have created the key since the load above
                let stored = self
                    .store
                    .save_if_absent(&self.service, KEY_ACCOUNT, &candidate[..])?;
                let key = self.parse_key(Zeroizing::new(stored))?;
                if key[..] == candidate[..] {
                    debug!(namespace = %self.namespace, "generated namespace key");
                }
                key
            }
        };
        *cached = Some(key.clone());
        Ok(key)
    }

    fn existing_key(&self) -> Result<Option<Zeroizing<[u8; KEY_LEN]>>, CipherError> {
        let mut cached = self.key.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(Some(key.clone()));
        }
        let key = self.load_key()?;
        if let Some(key) = key.as_ref() {
            *cached = Some(key.clone());
        }
        Ok(key)
    }

    fn load_key(&self) -> Result<Option<Zeroizing<[u8; KEY_LEN]>>, KeyStoreError> {
        match self.store.load(&self.service, KEY_ACCOUNT)? {
            Some(raw) => self.parse_key(Zeroizing::new(raw)).map(Some),
            None => Ok(None),
        }
    }

    fn parse_key(
        &self,
        raw: Zeroizing<Vec<u8>>,
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, KeyStoreError> {
        if raw.len() != KEY_LEN {
            return Err(KeyStoreError::Corrupt(format!(
                "namespace {} key has length {}",
                self.namespace,
                raw.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&raw);
        Ok(key)
    }
}

/// Base64 text that decodes to something carrying the envelope marker.
pub fn looks_encrypted_text(text: &str) -> bool {
    general_purpose::STANDARD
        .decode(text)
        .map(|blob| looks_encrypted(&blob))
        .unwrap_or(false)
}
