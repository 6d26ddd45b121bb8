//! The remote sync file: one blob per artifact holding state and history.
//!
//! Blob layout is `prefix + payload` (see [`crate::codec`]). The payload is a
//! JSON [`RemoteSyncFile`].

use crate::ClientId;
use crate::codec::{CodecError, SyncFileCodec, SyncFileHeader};
use crate::model::{RawOperation, StateSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncFileError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Sync file payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sync file header says version {header} but snapshot is at {snapshot}")]
    VersionMismatch { header: u32, snapshot: u32 },
}

pub type Result<T> = std::result::Result<T, SyncFileError>;

/// Contents of a sync file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSyncFile {
    /// State after applying every entry of `ops`.
    pub snapshot: StateSnapshot,
    pub ops: Vec<RawOperation>,
    /// Client that wrote this revision.
    pub client_id: ClientId,
    /// Milliseconds since Unix epoch, per the writer's clock. Informational.
    pub written_at: u64,
}

impl RemoteSyncFile {
    /// Encode with `codec`; the header's model version is the snapshot's.
    pub fn encode(&self, codec: &SyncFileCodec) -> Result<String> {
        let payload = serde_json::to_vec(self)?;
        Ok(codec.encode(&payload, self.snapshot.schema_version)?)
    }

    pub fn decode(codec: &SyncFileCodec, blob: &[u8]) -> Result<(SyncFileHeader, Self)> {
        let text = std::str::from_utf8(blob).map_err(|_| CodecError::Utf8)?;
        let decoded = codec.decode(text)?;
        let file: RemoteSyncFile = serde_json::from_slice(&decoded.payload)?;
        if file.snapshot.schema_version != decoded.header.model_version {
            return Err(SyncFileError::VersionMismatch {
                header: decoded.header.model_version,
                snapshot: file.snapshot.schema_version,
            });
        }
        Ok((decoded.header, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncryptionKey;
    use serde_json::json;

    fn file(version: u32) -> RemoteSyncFile {
        RemoteSyncFile {
            snapshot: StateSnapshot {
                schema_version: version,
                data: json!({ "tasks": {} }),
            },
            ops: vec![],
            client_id: ClientId::from(9),
            written_at: 42,
        }
    }

    #[test]
    fn test_encoded_file_carries_snapshot_version() {
        let codec = SyncFileCodec::new(true, Some(EncryptionKey::from_passphrase("pw")));
        let blob = file(4).encode(&codec).unwrap();
        assert!(blob.starts_with("pf_CE_4__"));

        let (header, decoded) = RemoteSyncFile::decode(&codec, blob.as_bytes()).unwrap();
        assert_eq!(header.model_version, 4);
        assert_eq!(decoded, file(4));
    }

    #[test]
    fn test_header_and_snapshot_must_agree() {
        let payload = serde_json::to_vec(&file(3)).unwrap();
        let blob = SyncFileCodec::plain().encode(&payload, 4).unwrap();
        assert!(matches!(
            RemoteSyncFile::decode(&SyncFileCodec::plain(), blob.as_bytes()),
            Err(SyncFileError::VersionMismatch {
                header: 4,
                snapshot: 3
            })
        ));
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let err = RemoteSyncFile::decode(&SyncFileCodec::plain(), b"pf__4__not json").unwrap_err();
        assert!(matches!(err, SyncFileError::Json(_)));

        let err = RemoteSyncFile::decode(&SyncFileCodec::plain(), b"no prefix").unwrap_err();
        assert!(matches!(err, SyncFileError::Codec(CodecError::InvalidFormat(_))));
    }
}
