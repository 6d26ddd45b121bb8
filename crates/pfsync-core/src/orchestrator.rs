//! SyncOrchestrator: runs one sync cycle of an artifact against a remote store.
//!
//! A cycle moves through these states:
//!
//! 1. `CheckingRemote` - list the remote, compare revisions and the local
//!    change counter. Nothing changed on either side ends in `UpToDate`.
//! 2. `Downloading` - fetch the sync file, strip the prefix, decrypt, decompress.
//! 3. `Migrating` - upgrade the remote snapshot and operations when the file was
//!    written at an older schema version. Stale local entries are upgraded
//!    (and stored back) right after `CheckingRemote`, so both histories are
//!    compared at the current version.
//! 4. `Reconciling` - compare the remote history with a snapshot of the local log.
//! 5. `Uploading` - write the reconciled history back with the revision we
//!    downloaded as the expected revision.
//!
//! A revision conflict on upload restarts the cycle at `CheckingRemote` a
//! bounded number of times. Field conflicts stop in `ConflictPending` until the
//! caller resolves them. Timeouts and network failures end in `Error`; retry
//! and backoff belong to the caller.
//!
//! Local appends may happen while a cycle runs. The cycle works on a snapshot of
//! the log taken in `CheckingRemote` and writes back `reconciled + appended`,
//! recording only the snapshot's change counter as synced.

use crate::ClientId;
use crate::codec::{CodecError, EncryptionKey, KdfParams, SyncFileCodec};
use crate::events::{EventBus, Subscription, SyncEvent};
use crate::meta::{LocalSyncMeta, SyncMeta};
use crate::model::{AppState, OpKind, Operation, RawOperation};
use crate::oplog::OperationLog;
use crate::reconcile::{
    ConflictDescriptor, ConflictResolution, Reconciliation, SyncDirection, detect_conflict,
    reconcile,
};
use crate::remote::{RemoteError, RemoteStore, RevisionToken};
use crate::schema::{MigrationError, MigrationRegistry, RegistryError, validate_builtin_registry};
use crate::sync_file::{RemoteSyncFile, SyncFileError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Coarse classification of a failed sync, for callers deciding what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Remote data cannot be read. Retrying will not help.
    Corrupt,
    /// Remote data was written by an unsupported schema version.
    Version,
    /// Someone else keeps writing; retry later.
    Conflict,
    /// Network failure or timeout; retry with backoff.
    Transient,
    /// Another sync of the same artifact is running.
    Busy,
    Internal,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A sync of {0} is already in progress")]
    AlreadyInProgress(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    File(#[from] SyncFileError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Migration registry is invalid: {0}")]
    Registry(#[from] RegistryError),

    #[error("Remote snapshot does not match the current schema: {0}")]
    Snapshot(String),

    #[error("No conflict is pending")]
    NoPendingConflict,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::AlreadyInProgress(_) => ErrorKind::Busy,
            SyncError::Timeout(_) => ErrorKind::Transient,
            SyncError::Remote(RemoteError::Network(_)) => ErrorKind::Transient,
            SyncError::Remote(RemoteError::RevisionConflict { .. }) => ErrorKind::Conflict,
            SyncError::Remote(_) => ErrorKind::Internal,
            SyncError::File(SyncFileError::Codec(CodecError::MissingKey)) => ErrorKind::Internal,
            SyncError::File(_) => ErrorKind::Corrupt,
            SyncError::Migration(
                MigrationError::StateTransform { .. } | MigrationError::OperationTransform { .. },
            ) => ErrorKind::Corrupt,
            SyncError::Migration(_) => ErrorKind::Version,
            SyncError::Snapshot(_) => ErrorKind::Corrupt,
            SyncError::Registry(_) | SyncError::NoPendingConflict => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure recorded in [`SyncState::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SyncError> for SyncFailure {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    Idle,
    CheckingRemote,
    UpToDate,
    Downloading,
    Migrating,
    Reconciling,
    Uploading,
    ConflictPending(ConflictDescriptor),
    Error(SyncFailure),
}

impl SyncState {
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::CheckingRemote => "checkingRemote",
            SyncState::UpToDate => "upToDate",
            SyncState::Downloading => "downloading",
            SyncState::Migrating => "migrating",
            SyncState::Reconciling => "reconciling",
            SyncState::Uploading => "uploading",
            SyncState::ConflictPending(_) => "conflictPending",
            SyncState::Error(_) => "error",
        }
    }

    /// States a cycle can end in.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Idle
                | SyncState::UpToDate
                | SyncState::ConflictPending(_)
                | SyncState::Error(_)
        )
    }
}

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Nothing to transfer.
    UpToDate,
    /// Remote history adopted locally; nothing uploaded.
    Pulled { operations: usize },
    /// A new remote revision was written.
    Pushed { revision: RevisionToken, operations: usize },
    Conflict(ConflictDescriptor),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote key of the sync file.
    pub artifact: String,
    pub compress: bool,
    /// Encrypts uploads when set. Also needed to read encrypted files.
    pub passphrase: Option<String>,
    /// Argon2id costs for encrypted uploads. Readers take them from the file.
    pub kdf: KdfParams,
    /// Applied to every remote call.
    pub network_timeout: Duration,
    /// Upload attempts after the first one that may hit a revision conflict.
    pub max_revision_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            artifact: "pfsync/main".to_string(),
            compress: true,
            passphrase: None,
            kdf: KdfParams::default(),
            network_timeout: Duration::from_secs(30),
            max_revision_retries: 3,
        }
    }
}

impl SyncConfig {
    pub fn codec(&self) -> SyncFileCodec {
        SyncFileCodec::new(
            self.compress,
            self.passphrase
                .as_deref()
                .map(|passphrase| EncryptionKey::with_params(passphrase, self.kdf)),
        )
    }
}

/// Set of artifact keys with a sync in flight.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    pub fn try_acquire(&self, artifact: &str) -> Option<InFlightGuard> {
        let mut active = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(artifact.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.clone(),
            artifact: artifact.to_string(),
        })
    }

    pub fn is_active(&self, artifact: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(artifact)
    }
}

/// Releases the artifact when dropped, on every exit path.
pub struct InFlightGuard {
    set: InFlight,
    artifact: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.artifact);
    }
}

/// Local replica shared between the host and its orchestrators.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    pub log: Arc<RwLock<OperationLog>>,
    pub meta: Arc<RwLock<LocalSyncMeta>>,
    pub in_flight: InFlight,
}

impl SyncContext {
    pub fn new(log: OperationLog, meta: LocalSyncMeta) -> Self {
        Self {
            log: Arc::new(RwLock::new(log)),
            meta: Arc::new(RwLock::new(meta)),
            in_flight: InFlight::default(),
        }
    }

    /// Record a local operation. Returns `false` when it was not persisted.
    pub fn append(&self, op: Operation) -> bool {
        let mut log = self.log.write().unwrap_or_else(|e| e.into_inner());
        matches!(log.append(op), crate::oplog::AppendOutcome::Appended(_))
    }

    pub fn log_snapshot(&self) -> OperationLog {
        self.log.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn meta_snapshot(&self) -> LocalSyncMeta {
        self.meta.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Everything needed to resolve a conflict, possibly in a later process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConflict {
    pub descriptor: ConflictDescriptor,
    pub remote_revision: RevisionToken,
    /// Full remote history, migrated to the current schema.
    pub remote_ops: Vec<RawOperation>,
    /// Local log length when the conflict was detected.
    pub snapshot_len: usize,
    /// Local change counter when the conflict was detected.
    pub snapshot_change: u64,
}

/// Local log state captured at the start of a cycle.
struct LocalSnapshot {
    ops: Vec<RawOperation>,
    change: u64,
    meta: LocalSyncMeta,
}

pub struct SyncOrchestrator<R: RemoteStore> {
    remote: R,
    ctx: SyncContext,
    config: SyncConfig,
    codec: SyncFileCodec,
    registry: &'static MigrationRegistry,
    events: Arc<EventBus>,
    client_id: ClientId,
    state: RwLock<SyncState>,
    pending: Mutex<Option<PendingConflict>>,
}

impl<R: RemoteStore> SyncOrchestrator<R> {
    /// Fails when the built-in migration registry has a gap.
    pub fn new(
        ctx: SyncContext,
        remote: R,
        config: SyncConfig,
        events: Arc<EventBus>,
        client_id: ClientId,
    ) -> Result<Self> {
        let registry = validate_builtin_registry()?;
        Ok(Self {
            codec: config.codec(),
            remote,
            ctx,
            config,
            registry,
            events,
            client_id,
            state: RwLock::new(SyncState::Idle),
            pending: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Events for this orchestrator's artifact. The bus may be shared with
    /// orchestrators of other artifacts; their events are filtered out.
    pub fn subscribe(&self, callback: impl Fn(SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe_artifact(&self.config.artifact, callback)
    }

    pub fn current_state(&self) -> SyncState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pending_conflict(&self) -> Option<ConflictDescriptor> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|p| p.descriptor.clone())
    }

    /// Full pending-conflict record, for hosts that persist it between runs.
    pub fn pending_conflict_record(&self) -> Option<PendingConflict> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reinstate a conflict recorded by an earlier run.
    pub fn restore_pending_conflict(&self, pending: PendingConflict) {
        self.transition(SyncState::ConflictPending(pending.descriptor.clone()));
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(pending);
    }

    /// Replay the local log. Readable at any time, including mid-sync.
    pub fn materialized_state(&self) -> Result<AppState> {
        let outcome = self
            .ctx
            .log
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replay(self.registry, None)?;
        for issue in &outcome.issues {
            let op_id = match issue {
                crate::oplog::ReplayIssue::UnknownOperationType { op_id, .. }
                | crate::oplog::ReplayIssue::MalformedPayload { op_id, .. } => op_id.to_string(),
            };
            self.events.emit(SyncEvent::OperationSkipped {
                artifact: self.config.artifact.clone(),
                op_id,
                reason: issue.to_string(),
            });
        }
        Ok(outcome.state)
    }

    fn transition(&self, next: SyncState) {
        let name = next.name();
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            debug!("Sync {}: {} -> {}", self.config.artifact, state.name(), name);
            *state = next;
        }
        self.events.emit(SyncEvent::StateChanged {
            artifact: self.config.artifact.clone(),
            state: name.to_string(),
        });
    }

    async fn remote_call<T>(
        &self,
        call: impl Future<Output = crate::remote::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.network_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SyncError::Timeout(self.config.network_timeout)),
        }
    }

    fn acquire(&self) -> Result<InFlightGuard> {
        self.ctx
            .in_flight
            .try_acquire(&self.config.artifact)
            .ok_or_else(|| SyncError::AlreadyInProgress(self.config.artifact.clone()))
    }

    /// Run one sync cycle.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let _guard = self.acquire()?;
        self.guarded_cycle().await
    }

    /// Apply a resolution to the pending conflict, then run a normal cycle.
    ///
    /// The remote history is adopted as the new base. `KeepLocal` and `Manual`
    /// add a `state_import` on top, which the cycle then uploads. `KeepRemote`
    /// keeps only local edits made after the conflict was detected.
    pub async fn resolve_conflict(&self, resolution: ConflictResolution) -> Result<SyncOutcome> {
        let _guard = self.acquire()?;
        let pending = self
            .pending_conflict_record()
            .ok_or(SyncError::NoPendingConflict)?;

        let import = match resolution {
            ConflictResolution::KeepRemote => None,
            ConflictResolution::KeepLocal => Some(self.materialized_state()?),
            ConflictResolution::Manual(state) => Some(state),
        };
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = None;

        {
            let mut log = self.ctx.log.write().unwrap_or_else(|e| e.into_inner());
            let mut meta = self.ctx.meta.write().unwrap_or_else(|e| e.into_inner());
            match import {
                None => {
                    let mut entries = pending.remote_ops;
                    entries.extend_from_slice(log.suffix_from(pending.snapshot_len));
                    log.replace_entries(entries);
                    meta.record_sync(pending.remote_revision, pending.snapshot_change, crate::now_ms());
                    info!("Conflict on {} resolved with remote history", self.config.artifact);
                }
                Some(state) => {
                    log.replace_entries(pending.remote_ops);
                    meta.record_sync(pending.remote_revision, log.local_changes(), crate::now_ms());
                    log.append(Operation::new(
                        self.client_id,
                        crate::now_ms(),
                        OpKind::StateImport { state },
                    ));
                    info!("Conflict on {} resolved with imported state", self.config.artifact);
                }
            }
        }

        self.guarded_cycle().await
    }

    /// Cycle body; the caller holds the in-flight guard.
    async fn guarded_cycle(&self) -> Result<SyncOutcome> {
        let mut retries = 0;
        let result = loop {
            match self.attempt().await {
                Err(SyncError::Remote(RemoteError::RevisionConflict { .. }))
                    if retries < self.config.max_revision_retries =>
                {
                    retries += 1;
                    warn!(
                        "Remote {} changed during sync, restarting (retry {}/{})",
                        self.config.artifact, retries, self.config.max_revision_retries
                    );
                }
                other => break other,
            }
        };

        match &result {
            Ok(SyncOutcome::Conflict(_)) => {}
            Ok(_) => self.transition(SyncState::UpToDate),
            Err(e) => {
                warn!("Sync of {} failed: {}", self.config.artifact, e);
                self.transition(SyncState::Error(SyncFailure::from(e)));
            }
        }
        result
    }

    fn local_snapshot(&self) -> LocalSnapshot {
        let log = self.ctx.log.read().unwrap_or_else(|e| e.into_inner());
        LocalSnapshot {
            ops: log.entries().to_vec(),
            change: log.local_changes(),
            meta: self.ctx.meta_snapshot(),
        }
    }

    async fn attempt(&self) -> Result<SyncOutcome> {
        self.transition(SyncState::CheckingRemote);
        let artifact = self.config.artifact.as_str();
        let remote_meta: Option<SyncMeta> = self
            .remote_call(self.remote.list(artifact))
            .await?
            .into_iter()
            .find(|entry| entry.key == artifact)
            .map(SyncMeta::from);
        let local = self.upgrade_local(self.local_snapshot())?;

        let direction = detect_conflict(&local.meta, local.change, remote_meta.as_ref());
        debug!("Sync {}: remote check says {:?}", artifact, direction);
        match (direction, remote_meta) {
            (SyncDirection::InSync, _) => Ok(SyncOutcome::UpToDate),
            (SyncDirection::LocalAhead, remote) => {
                let expected = remote.map(|m| m.revision);
                self.upload(local.ops, expected, local.change).await
            }
            (_, Some(remote)) => self.download_and_reconcile(remote, local).await,
            // detect_conflict never reports the remote ahead of a missing file
            (_, None) => Ok(SyncOutcome::UpToDate),
        }
    }

    /// Migrate stale local entries and write them back in place. Operations
    /// with no counterpart at the current version are dropped from the log.
    fn upgrade_local(&self, mut local: LocalSnapshot) -> Result<LocalSnapshot> {
        let current = self.registry.current_version();
        let Some(from_version) = local
            .ops
            .iter()
            .map(|op| op.schema_version)
            .filter(|version| *version < current)
            .min()
        else {
            return Ok(local);
        };

        self.transition(SyncState::Migrating);
        let snapshot_len = local.ops.len();
        let ops = self.registry.migrate_operations(local.ops)?;
        info!(
            "Migrated local log from schema {} to {} ({} of {} operations kept)",
            from_version,
            current,
            ops.len(),
            snapshot_len
        );
        self.events.emit(SyncEvent::Migrated {
            artifact: self.config.artifact.clone(),
            from_version,
            to_version: current,
            operations: ops.len(),
        });
        self.write_back(ops.clone(), snapshot_len, None);
        local.ops = ops;
        Ok(local)
    }

    async fn download_and_reconcile(
        &self,
        mut remote: SyncMeta,
        local: LocalSnapshot,
    ) -> Result<SyncOutcome> {
        self.transition(SyncState::Downloading);
        let blob = self
            .remote_call(self.remote.get(&self.config.artifact))
            .await?;
        let (header, file) = RemoteSyncFile::decode(&self.codec, &blob.data)?;
        remote.revision = blob.revision;
        remote.header = Some(header);

        let remote_stale = self.registry.state_needs_migration(&file.snapshot);
        let (snapshot, remote_ops) = if remote_stale
            || file
                .ops
                .iter()
                .any(|op| op.schema_version != self.registry.current_version())
        {
            self.transition(SyncState::Migrating);
            let from_version = file.snapshot.schema_version;
            let snapshot = self.registry.migrate_state(file.snapshot)?;
            let ops = self.registry.migrate_operations(file.ops)?;
            info!(
                "Migrated {} from schema {} to {} ({} operations)",
                self.config.artifact,
                from_version,
                snapshot.schema_version,
                ops.len()
            );
            self.events.emit(SyncEvent::Migrated {
                artifact: self.config.artifact.clone(),
                from_version,
                to_version: snapshot.schema_version,
                operations: ops.len(),
            });
            (snapshot, ops)
        } else {
            // Rejects files from newer builds
            (self.registry.migrate_state(file.snapshot)?, file.ops)
        };

        self.transition(SyncState::Reconciling);
        let snapshot_len = local.ops.len();
        match reconcile(self.registry, &local.ops, &remote_ops)? {
            Reconciliation::InSync => {
                if remote_stale {
                    return self.upload(remote_ops, Some(remote.revision), local.change).await;
                }
                self.record_synced(remote.revision, local.change);
                Ok(SyncOutcome::UpToDate)
            }
            Reconciliation::FastForwardLocal { ops } => {
                let operations = ops.len() - snapshot_len;
                let state = AppState::from_snapshot(&snapshot)
                    .map_err(|e| SyncError::Snapshot(e.to_string()))?;
                self.write_back(ops.clone(), snapshot_len, Some(state));
                if remote_stale {
                    return self.upload(ops, Some(remote.revision), local.change).await;
                }
                self.record_synced(remote.revision, local.change);
                info!("Pulled {} operations into {}", operations, self.config.artifact);
                Ok(SyncOutcome::Pulled { operations })
            }
            Reconciliation::FastForwardRemote { ops } => {
                self.upload(ops, Some(remote.revision), local.change).await
            }
            Reconciliation::Merged { ops } => {
                self.write_back(ops.clone(), snapshot_len, None);
                self.upload(ops, Some(remote.revision), local.change).await
            }
            Reconciliation::Conflict(descriptor) => {
                warn!(
                    "Conflict on {}: {} fields changed on both sides",
                    self.config.artifact,
                    descriptor.field_diffs.len()
                );
                self.events.emit(SyncEvent::ConflictDetected {
                    artifact: self.config.artifact.clone(),
                    fields: descriptor
                        .field_diffs
                        .iter()
                        .map(|d| format!("{}.{}", d.entity, d.field))
                        .collect(),
                });
                *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(PendingConflict {
                    descriptor: descriptor.clone(),
                    remote_revision: remote.revision,
                    remote_ops,
                    snapshot_len,
                    snapshot_change: local.change,
                });
                self.transition(SyncState::ConflictPending(descriptor.clone()));
                Ok(SyncOutcome::Conflict(descriptor))
            }
        }
    }

    /// Replace the first `snapshot_len` local entries with `ops`, keeping
    /// anything appended since the snapshot. `state` is the fold of `ops`
    /// when known.
    fn write_back(&self, ops: Vec<RawOperation>, snapshot_len: usize, state: Option<AppState>) {
        let mut log = self.ctx.log.write().unwrap_or_else(|e| e.into_inner());
        let position = ops.len();
        let mut entries = ops;
        entries.extend_from_slice(log.suffix_from(snapshot_len));
        log.replace_entries(entries);
        if let Some(state) = state {
            log.seed_cache(state, position, self.registry.current_version());
        }
    }

    fn record_synced(&self, revision: RevisionToken, change: u64) {
        self.ctx
            .meta
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .record_sync(revision, change, crate::now_ms());
    }

    async fn upload(
        &self,
        ops: Vec<RawOperation>,
        expected: Option<RevisionToken>,
        change: u64,
    ) -> Result<SyncOutcome> {
        self.transition(SyncState::Uploading);
        let mut history = OperationLog::new();
        history.replace_entries(ops);
        let state = history.replay(self.registry, None)?.state;

        let operations = history.len();
        let file = RemoteSyncFile {
            snapshot: state.to_snapshot(self.registry.current_version()),
            ops: history.entries().to_vec(),
            client_id: self.client_id,
            written_at: crate::now_ms(),
        };
        let blob = file.encode(&self.codec)?;
        let revision = self
            .remote_call(
                self.remote
                    .put(&self.config.artifact, blob.as_bytes(), expected.as_ref()),
            )
            .await?;

        self.record_synced(revision.clone(), change);
        info!(
            "Uploaded {} operations to {} (revision {})",
            operations, self.config.artifact, revision
        );
        self.events.emit(SyncEvent::Uploaded {
            artifact: self.config.artifact.clone(),
            revision: revision.to_string(),
            operations,
        });
        Ok(SyncOutcome::Pushed {
            revision,
            operations,
        })
    }
}
