//! Authenticated encryption for sync-file payloads.
//!
//! Layout of an encrypted payload:
//!
//! ```text
//! salt (16) || m_cost (u32 LE) || t_cost (u32 LE) || p_cost (u32 LE) || nonce (24) || ciphertext+tag
//! ```
//!
//! The key is derived from the passphrase with Argon2id. Salt and cost
//! parameters travel with the payload so any reader needs only the
//! passphrase, and they are bound to the ciphertext as associated data.
//! A fresh random nonce is drawn for every write.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 24;
const PARAMS_LEN: usize = 12;
const KDF_HEADER_LEN: usize = SALT_LEN + PARAMS_LEN;
/// Bytes before the ciphertext.
pub const HEADER_LEN: usize = KDF_HEADER_LEN + NONCE_LEN;
const KEY_LEN: usize = 32;

// Upper bounds accepted from a payload header
const MAX_MEMORY_KIB: u32 = 1 << 20;
const MAX_ITERATIONS: u32 = 16;
const MAX_PARALLELISM: u32 = 16;

/// Derived keys kept per [`EncryptionKey`]; one for writes plus a few salts
/// seen on reads.
const DERIVED_CACHE_LIMIT: usize = 4;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Failed to gather entropy: {0}")]
    Entropy(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Unsupported key derivation parameters: {0:?}")]
    UnsupportedParams(KdfParams),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Encrypted payload is shorter than its header")]
    Truncated,

    #[error("Decryption failed: wrong passphrase or corrupted data")]
    AuthenticationFailed,
}

pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn to_bytes(self) -> [u8; PARAMS_LEN] {
        let mut out = [0u8; PARAMS_LEN];
        out[0..4].copy_from_slice(&self.memory_kib.to_le_bytes());
        out[4..8].copy_from_slice(&self.iterations.to_le_bytes());
        out[8..12].copy_from_slice(&self.parallelism.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let word = |i: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[i..i + 4]);
            u32::from_le_bytes(buf)
        };
        let params = Self {
            memory_kib: word(0),
            iterations: word(4),
            parallelism: word(8),
        };
        // A hostile header must not make us allocate gigabytes
        if params.memory_kib > MAX_MEMORY_KIB
            || params.iterations > MAX_ITERATIONS
            || params.parallelism > MAX_PARALLELISM
        {
            return Err(EncryptionError::UnsupportedParams(params));
        }
        Ok(params)
    }

    fn derive(self, passphrase: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN]> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|_| EncryptionError::UnsupportedParams(self))?;
        let mut key = [0u8; KEY_LEN];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

#[derive(Clone)]
struct Derived {
    salt: [u8; SALT_LEN],
    params: KdfParams,
    key: [u8; KEY_LEN],
}

/// Passphrase for sync files, with the keys derived from it so far.
pub struct EncryptionKey {
    passphrase: String,
    params: KdfParams,
    // Most recently used first
    derived: Mutex<Vec<Derived>>,
}

impl EncryptionKey {
    /// Use `passphrase` with the default Argon2id costs for writes.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::with_params(passphrase, KdfParams::default())
    }

    /// Use `passphrase` with explicit costs for writes. Reads always use the
    /// costs recorded in the payload.
    pub fn with_params(passphrase: &str, params: KdfParams) -> Self {
        Self {
            passphrase: passphrase.to_string(),
            params,
            derived: Mutex::new(Vec::new()),
        }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    fn cached(&self, matches: impl Fn(&Derived) -> bool) -> Option<Derived> {
        let mut derived = self.derived.lock().unwrap_or_else(|e| e.into_inner());
        let index = derived.iter().position(matches)?;
        let hit = derived.remove(index);
        derived.insert(0, hit.clone());
        Some(hit)
    }

    fn remember(&self, entry: Derived) {
        let mut derived = self.derived.lock().unwrap_or_else(|e| e.into_inner());
        derived.retain(|d| !(d.salt == entry.salt && d.params == entry.params));
        derived.insert(0, entry);
        derived.truncate(DERIVED_CACHE_LIMIT);
    }

    /// Key for `salt` and `params`, deriving it on first use.
    fn key_for(&self, salt: [u8; SALT_LEN], params: KdfParams) -> Result<Derived> {
        if let Some(hit) = self.cached(|d| d.salt == salt && d.params == params) {
            return Ok(hit);
        }
        let entry = Derived {
            salt,
            params,
            key: params.derive(&self.passphrase, &salt)?,
        };
        self.remember(entry.clone());
        Ok(entry)
    }

    /// Key for the next write. Reuses any derivation at the write costs;
    /// otherwise draws a new salt.
    fn write_key(&self) -> Result<Derived> {
        if let Some(hit) = self.cached(|d| d.params == self.params) {
            return Ok(hit);
        }
        let mut salt = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt).map_err(|e| EncryptionError::Entropy(e.to_string()))?;
        self.key_for(salt, self.params)
    }
}

impl Clone for EncryptionKey {
    fn clone(&self) -> Self {
        let derived = self.derived.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Self {
            passphrase: self.passphrase.clone(),
            params: self.params,
            derived: Mutex::new(derived),
        }
    }
}

// Never print key material
impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

fn cipher(key: &[u8; KEY_LEN]) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(key))
}

pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let derived = key.write_key()?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(&derived.salt);
    header.extend_from_slice(&derived.params.to_bytes());

    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|e| EncryptionError::Entropy(e.to_string()))?;
    let ciphertext = cipher(&derived.key)
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|_| EncryptionError::Encrypt)?;

    let mut out = header;
    out.reserve(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt(key: &EncryptionKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(EncryptionError::Truncated);
    }
    let (kdf_header, rest) = data.split_at(KDF_HEADER_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&kdf_header[..SALT_LEN]);
    let params = KdfParams::from_bytes(&kdf_header[SALT_LEN..])?;

    let derived = key.key_for(salt, params)?;
    cipher(&derived.key)
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: kdf_header,
            },
        )
        .map_err(|_| EncryptionError::AuthenticationFailed)
}
