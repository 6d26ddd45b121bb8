//! Sync-file prefix: the header embedded at the start of every persisted blob.
//!
//! Wire grammar:
//!
//! ```text
//! pf_[C][E]_<modelVersion>__<payload>
//! ```
//!
//! - `pf_`: format tag
//! - `C`: present iff the payload is compressed
//! - `E`: present iff the payload is encrypted
//! - `<modelVersion>`: decimal, no sign, no leading zeros
//! - `__`: terminator; everything after it is the payload, untouched
//!
//! The grammar is parsed by [`decode_prefix`] alone. Nothing else in the
//! crate inspects blob prefixes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Literal format tag every sync file starts with.
pub const PREFIX_TAG: &str = "pf_";

/// Literal terminator separating the prefix from the payload.
pub const PREFIX_TERMINATOR: &str = "__";

const FLAG_COMPRESSED: u8 = b'C';
const FLAG_ENCRYPTED: u8 = b'E';
const FLAG_SEPARATOR: u8 = b'_';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    #[error("Invalid sync file prefix: {0}")]
    InvalidFormat(&'static str),
}

pub type Result<T> = std::result::Result<T, PrefixError>;

/// Content metadata carried by the prefix.
///
/// Built fresh for every write and parsed fresh for every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFileHeader {
    pub is_compressed: bool,
    pub is_encrypted: bool,
    pub model_version: u32,
}

/// A parsed prefix plus the untouched payload that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPrefix<'a> {
    pub header: SyncFileHeader,
    pub remainder: &'a str,
}

/// Render the prefix for `header`.
pub fn encode_prefix(header: &SyncFileHeader) -> String {
    let mut prefix = String::with_capacity(PREFIX_TAG.len() + 16);
    prefix.push_str(PREFIX_TAG);
    if header.is_compressed {
        prefix.push(FLAG_COMPRESSED as char);
    }
    if header.is_encrypted {
        prefix.push(FLAG_ENCRYPTED as char);
    }
    prefix.push(FLAG_SEPARATOR as char);
    prefix.push_str(&header.model_version.to_string());
    prefix.push_str(PREFIX_TERMINATOR);
    prefix
}

/// Parse the prefix at the start of `data`.
///
/// Flags must appear at most once each, in `C`, `E` order.
pub fn decode_prefix(data: &str) -> Result<DecodedPrefix<'_>> {
    let rest = data
        .strip_prefix(PREFIX_TAG)
        .ok_or(PrefixError::InvalidFormat("missing 'pf_' tag"))?;
    let bytes = rest.as_bytes();
    let mut pos = 0;

    let mut header = SyncFileHeader::default();
    if bytes.get(pos) == Some(&FLAG_COMPRESSED) {
        header.is_compressed = true;
        pos += 1;
    }
    if bytes.get(pos) == Some(&FLAG_ENCRYPTED) {
        header.is_encrypted = true;
        pos += 1;
    }

    match bytes.get(pos) {
        Some(&FLAG_SEPARATOR) => pos += 1,
        Some(_) => return Err(PrefixError::InvalidFormat("unknown or misplaced flag")),
        None => return Err(PrefixError::InvalidFormat("truncated prefix")),
    }

    let digits_start = pos;
    while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
        pos += 1;
    }
    let digits = &rest[digits_start..pos];
    if digits.is_empty() {
        return Err(PrefixError::InvalidFormat("missing model version"));
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(PrefixError::InvalidFormat("model version has leading zeros"));
    }
    header.model_version = digits
        .parse()
        .map_err(|_| PrefixError::InvalidFormat("model version out of range"))?;

    let remainder = rest[pos..]
        .strip_prefix(PREFIX_TERMINATOR)
        .ok_or(PrefixError::InvalidFormat("missing '__' terminator"))?;

    Ok(DecodedPrefix { header, remainder })
}
