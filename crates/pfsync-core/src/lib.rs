//! pfsync-core: local-first sync engine for a task-manager data model.
//!
//! This crate provides the core functionality for:
//! - Encoding sync files (`pf_[C][E]_<version>__` prefix, gzip, encryption)
//! - Migrating persisted state and operations across schema versions
//! - Recording local operations and replaying them into state
//! - Reconciling local and remote histories, surfacing field conflicts
//! - Orchestrating sync cycles against a `RemoteStore`

pub mod client_id;
pub mod codec;
pub mod events;
pub mod meta;
pub mod model;
pub mod oplog;
pub mod orchestrator;
pub mod reconcile;
pub mod remote;
pub mod schema;
pub mod sync_file;

pub use client_id::{ClientId, ClientIdError};
pub use codec::{
    CodecError, DecodedSyncFile, EncryptionKey, KdfParams, PrefixError, SyncFileCodec,
    SyncFileHeader, decode_prefix, encode_prefix,
};
pub use events::{EventBus, Subscription, SyncEvent};
pub use meta::{LocalSyncMeta, SyncMeta};
pub use model::{AppState, OpId, OpKind, Operation, RawOperation, StateSnapshot};
pub use oplog::{AppendOutcome, MigratableStateCache, OperationLog, ReplayIssue, ReplayOutcome};
pub use orchestrator::{
    ErrorKind, InFlight, PendingConflict, SyncConfig, SyncContext, SyncError, SyncFailure,
    SyncOrchestrator, SyncOutcome, SyncState,
};
pub use reconcile::{
    ConflictDescriptor, ConflictResolution, FieldDiff, Reconciliation, SyncDirection,
    classify_histories, common_ancestor, detect_conflict, reconcile,
};
pub use remote::{InMemoryRemote, RemoteBlob, RemoteEntry, RemoteError, RemoteStore, RevisionToken};
pub use schema::{
    CURRENT_SCHEMA_VERSION, MAX_VERSION_SKIP, MIN_SUPPORTED_SCHEMA_VERSION, MigrationError,
    MigrationRegistry, RegistryError, SchemaMigration, validate_builtin_registry,
};
pub use sync_file::RemoteSyncFile;

/// Milliseconds since Unix epoch.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
