//! Sync bookkeeping on both sides of the wire.

use crate::codec::SyncFileHeader;
use crate::remote::{RemoteEntry, RevisionToken};
use serde::{Deserialize, Serialize};

/// What is known about the remote copy of an artifact.
///
/// Listing only yields the revision; the header is filled in once the file
/// has been downloaded and its prefix decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMeta {
    pub revision: RevisionToken,
    pub header: Option<SyncFileHeader>,
}

impl From<RemoteEntry> for SyncMeta {
    fn from(entry: RemoteEntry) -> Self {
        Self {
            revision: entry.revision,
            header: None,
        }
    }
}

/// Local record of the last successful sync.
///
/// `last_synced_change` is the value of the log's local change counter that
/// the last upload or download covered. Any append after that point makes the
/// local side dirty, regardless of clocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSyncMeta {
    #[serde(default)]
    pub last_synced_revision: Option<RevisionToken>,
    /// Milliseconds since Unix epoch. Informational only.
    #[serde(default)]
    pub last_synced_at: Option<u64>,
    #[serde(default)]
    pub last_synced_change: u64,
}

impl LocalSyncMeta {
    pub fn has_local_changes(&self, local_changes: u64) -> bool {
        local_changes > self.last_synced_change
    }

    pub fn record_sync(&mut self, revision: RevisionToken, change: u64, now_ms: u64) {
        self.last_synced_revision = Some(revision);
        self.last_synced_change = self.last_synced_change.max(change);
        self.last_synced_at = Some(now_ms);
    }
}
