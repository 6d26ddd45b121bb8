//! Sync-file codec.
//!
//! A persisted blob is a [`prefix`] followed by the payload. Transforms are
//! applied on write in this order:
//!
//! 1. compress (gzip) when the codec is configured to
//! 2. encrypt (XChaCha20-Poly1305, Argon2id key) when a key is configured
//! 3. base64 when either of the above ran, so the blob stays text
//!
//! Reading strips the prefix and undoes them in reverse: base64, decrypt if
//! `E`, decompress if `C`. Everything here is pure and synchronous.

pub mod compression;
pub mod encryption;
pub mod prefix;

pub use encryption::{EncryptionError, EncryptionKey, KdfParams};
pub use prefix::{DecodedPrefix, PrefixError, SyncFileHeader, decode_prefix, encode_prefix};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    InvalidFormat(#[from] PrefixError),

    #[error("Sync file is encrypted but no encryption key is configured")]
    MissingKey,

    #[error("Invalid base64 payload: {0}")]
    Base64(String),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Plain payload is not valid UTF-8")]
    Utf8,
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// A decoded sync file: the parsed header and the plain payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSyncFile {
    pub header: SyncFileHeader,
    pub payload: Vec<u8>,
}

/// Encodes and decodes full sync-file blobs.
#[derive(Debug, Clone, Default)]
pub struct SyncFileCodec {
    compress: bool,
    key: Option<EncryptionKey>,
}

impl SyncFileCodec {
    pub fn new(compress: bool, key: Option<EncryptionKey>) -> Self {
        Self { compress, key }
    }

    /// Codec that writes uncompressed, unencrypted files.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Header this codec writes for `model_version`.
    pub fn header_for(&self, model_version: u32) -> SyncFileHeader {
        SyncFileHeader {
            is_compressed: self.compress,
            is_encrypted: self.key.is_some(),
            model_version,
        }
    }

    pub fn encode(&self, payload: &[u8], model_version: u32) -> Result<String> {
        let header = self.header_for(model_version);
        let mut out = encode_prefix(&header);

        if !header.is_compressed && !header.is_encrypted {
            let text = std::str::from_utf8(payload).map_err(|_| CodecError::Utf8)?;
            out.push_str(text);
            return Ok(out);
        }

        let mut bytes = if header.is_compressed {
            compression::compress(payload).map_err(|e| CodecError::Compression(e.to_string()))?
        } else {
            payload.to_vec()
        };
        if let Some(key) = &self.key {
            bytes = encryption::encrypt(key, &bytes)?;
        }
        BASE64.encode_string(&bytes, &mut out);
        Ok(out)
    }

    pub fn decode(&self, blob: &str) -> Result<DecodedSyncFile> {
        let DecodedPrefix { header, remainder } = decode_prefix(blob)?;

        if !header.is_compressed && !header.is_encrypted {
            return Ok(DecodedSyncFile {
                header,
                payload: remainder.as_bytes().to_vec(),
            });
        }

        let mut bytes = BASE64
            .decode(remainder)
            .map_err(|e| CodecError::Base64(e.to_string()))?;
        if header.is_encrypted {
            let key = self.key.as_ref().ok_or(CodecError::MissingKey)?;
            bytes = encryption::decrypt(key, &bytes)?;
        }
        if header.is_compressed {
            bytes = compression::decompress(&bytes)
                .map_err(|e| CodecError::Decompression(e.to_string()))?;
        }

        Ok(DecodedSyncFile {
            header,
            payload: bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"snapshot":{"schemaVersion":4,"data":{}},"ops":[]}"#;

    #[test]
    fn test_plain_file_is_readable_text() {
        let blob = SyncFileCodec::plain().encode(PAYLOAD, 4).unwrap();
        assert!(blob.starts_with("pf__4__{"));

        let decoded = SyncFileCodec::plain().decode(&blob).unwrap();
        assert_eq!(decoded.payload, PAYLOAD);
        assert_eq!(decoded.header.model_version, 4);
    }

    #[test]
    fn test_compressed_file() {
        let codec = SyncFileCodec::new(true, None);
        let blob = codec.encode(PAYLOAD, 7).unwrap();
        assert!(blob.starts_with("pf_C_7__"));

        let decoded = codec.decode(&blob).unwrap();
        assert!(decoded.header.is_compressed);
        assert!(!decoded.header.is_encrypted);
        assert_eq!(decoded.payload, PAYLOAD);
    }

    #[test]
    fn test_compressed_and_encrypted_file() {
        let codec = SyncFileCodec::new(true, Some(EncryptionKey::from_passphrase("pw")));
        let blob = codec.encode(PAYLOAD, 4).unwrap();
        assert!(blob.starts_with("pf_CE_4__"));
        assert_eq!(codec.decode(&blob).unwrap().payload, PAYLOAD);
    }

    #[test]
    fn test_encrypted_file_without_key() {
        let writer = SyncFileCodec::new(false, Some(EncryptionKey::from_passphrase("pw")));
        let blob = writer.encode(PAYLOAD, 4).unwrap();
        assert!(blob.starts_with("pf_E_4__"));

        let err = SyncFileCodec::plain().decode(&blob).unwrap_err();
        assert!(matches!(err, CodecError::MissingKey));
    }

    #[test]
    fn test_encrypted_file_with_wrong_key() {
        let writer = SyncFileCodec::new(true, Some(EncryptionKey::from_passphrase("right")));
        let reader = SyncFileCodec::new(true, Some(EncryptionKey::from_passphrase("wrong")));
        let blob = writer.encode(PAYLOAD, 4).unwrap();
        assert!(matches!(
            reader.decode(&blob),
            Err(CodecError::Encryption(EncryptionError::AuthenticationFailed))
        ));
    }

    #[test]
    fn test_keyed_reader_accepts_plain_files() {
        let blob = SyncFileCodec::plain().encode(PAYLOAD, 2).unwrap();
        let reader = SyncFileCodec::new(true, Some(EncryptionKey::from_passphrase("pw")));
        assert_eq!(reader.decode(&blob).unwrap().payload, PAYLOAD);
    }

    #[test]
    fn test_malformed_prefix_is_invalid_format() {
        let err = SyncFileCodec::plain().decode("{\"tasks\":{}}").unwrap_err();
        assert!(matches!(err, CodecError::InvalidFormat(_)));
    }

    #[test]
    fn test_corrupt_base64_body() {
        let err = SyncFileCodec::new(true, None).decode("pf_C_4__!!!").unwrap_err();
        assert!(matches!(err, CodecError::Base64(_)));
    }
}
