//! Host application: ties the on-disk state, the directory remote and the
//! sync orchestrator together for one invocation.

use crate::config::Config;
use crate::dir_remote::DirectoryRemote;
use crate::lock::FileLock;
use crate::persistence::StateStore;
use anyhow::{Context, Result, bail};
use pfsync_core::model::{AppState, OpKind, Operation, Task, TaskPatch};
use pfsync_core::{
    AppendOutcome, ClientId, ConflictDescriptor, ConflictResolution, EncryptionKey, EventBus,
    LocalSyncMeta, MigrationRegistry, RemoteSyncFile, Subscription, SyncContext, SyncEvent,
    SyncFileCodec, SyncFileHeader, SyncOrchestrator, SyncOutcome, decode_prefix, now_ms,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct App {
    store: StateStore,
    config: Config,
    client_id: ClientId,
    passphrase: Option<String>,
    remote_dir: Option<PathBuf>,
    events: Arc<EventBus>,
    lock_timeout: Duration,
}

/// Summary printed by `pfsync status`.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub client_id: ClientId,
    pub artifact: String,
    pub entries: usize,
    pub local_changes: u64,
    pub meta: LocalSyncMeta,
    pub pending: Option<ConflictDescriptor>,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "client:    {}", self.client_id)?;
        writeln!(f, "artifact:  {}", self.artifact)?;
        writeln!(f, "log:       {} operations", self.entries)?;
        match &self.meta.last_synced_revision {
            Some(revision) => writeln!(f, "revision:  {}", revision)?,
            None => writeln!(f, "revision:  never synced")?,
        }
        let unsynced = self.local_changes.saturating_sub(self.meta.last_synced_change);
        writeln!(f, "unsynced:  {} local changes", unsynced)?;
        if let Some(conflict) = &self.pending {
            write!(f, "conflict:  {}", conflict)?;
        }
        Ok(())
    }
}

/// What `pfsync inspect` found in a sync file.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub header: SyncFileHeader,
    /// Decoded contents, when the file could be read with the given passphrase.
    pub file: Option<RemoteSyncFile>,
    pub error: Option<String>,
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model version: {}", self.header.model_version)?;
        writeln!(f, "compressed:    {}", self.header.is_compressed)?;
        writeln!(f, "encrypted:     {}", self.header.is_encrypted)?;
        if let Some(file) = &self.file {
            writeln!(f, "operations:    {}", file.ops.len())?;
            writeln!(f, "written by:    {}", file.client_id)?;
            writeln!(f, "written at:    {}", file.written_at)?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "unreadable:    {}", error)?;
        }
        Ok(())
    }
}

/// Parse a sync file's header and, when possible, its contents.
pub fn inspect_blob(blob: &[u8], passphrase: Option<&str>) -> Result<Inspection> {
    let text = std::str::from_utf8(blob).context("Sync file is not UTF-8")?;
    let header = decode_prefix(text)?.header;
    let codec = SyncFileCodec::new(false, passphrase.map(EncryptionKey::from_passphrase));
    let (file, error) = match RemoteSyncFile::decode(&codec, blob) {
        Ok((_, file)) => (Some(file), None),
        Err(e) => (None, Some(e.to_string())),
    };
    Ok(Inspection {
        header,
        file,
        error,
    })
}

impl App {
    /// Open the state directory, creating the config on first use.
    pub fn open(
        state_dir: &Path,
        remote_override: Option<PathBuf>,
        passphrase: Option<String>,
    ) -> Result<Self> {
        let config = Config::load(state_dir)?;
        let client_id = config.client_id()?;
        let remote_dir = remote_override.or_else(|| config.remote_dir.clone());
        Ok(Self {
            store: StateStore::new(state_dir),
            config,
            client_id,
            passphrase,
            remote_dir,
            events: Arc::new(EventBus::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// How long to wait for another invocation holding the state directory.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Held for every load-modify-save of the state files, so a sync never
    /// overwrites an operation recorded by another invocation.
    fn lock_state(&self) -> Result<FileLock> {
        FileLock::acquire(&self.store.lock_path(), self.lock_timeout)
    }

    async fn lock_state_async(&self) -> Result<FileLock> {
        FileLock::acquire_async(&self.store.lock_path(), self.lock_timeout).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Events of the configured artifact, for every sync this app runs.
    pub fn subscribe(&self, callback: impl Fn(SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe_artifact(&self.config.artifact, callback)
    }

    /// Remember `remote_dir` in the config for later invocations.
    pub fn set_remote_dir(&mut self, remote_dir: PathBuf) -> Result<()> {
        let _lock = self.lock_state()?;
        self.config.remote_dir = Some(remote_dir.clone());
        self.config.save(self.store.dir())?;
        self.remote_dir = Some(remote_dir);
        Ok(())
    }

    /// Append an operation to the local log. Returns false for transient
    /// operations, which are never stored.
    pub fn record(&self, kind: OpKind) -> Result<bool> {
        let _lock = self.lock_state()?;
        let mut log = self.store.load_log()?;
        let outcome = log.append(Operation::new(self.client_id, now_ms(), kind));
        match outcome {
            AppendOutcome::Appended(id) => {
                self.store.save_log(&log)?;
                debug!("Recorded operation {}", id);
                Ok(true)
            }
            AppendOutcome::Excluded => Ok(false),
        }
    }

    /// Materialize the local log.
    pub fn state(&self) -> Result<AppState> {
        let mut log = self.store.load_log()?;
        let outcome = log.replay(MigrationRegistry::builtin(), None)?;
        for issue in &outcome.issues {
            warn!("Skipped during replay: {}", issue);
        }
        Ok(outcome.state)
    }

    pub fn add_task(&self, title: &str, project_id: Option<String>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.record(OpKind::TaskAdd {
            task: Task {
                id: id.clone(),
                title: title.to_string(),
                project_id,
                created_at: now_ms(),
                ..Task::default()
            },
        })?;
        Ok(id)
    }

    /// Resolve a task id from a unique prefix.
    pub fn find_task(&self, prefix: &str) -> Result<String> {
        let state = self.state()?;
        let mut matches = state.tasks.keys().filter(|id| id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id.clone()),
            (None, _) => bail!("No task matches {:?}", prefix),
            (Some(_), Some(_)) => bail!("{:?} matches more than one task", prefix),
        }
    }

    pub fn complete(&self, prefix: &str) -> Result<String> {
        let id = self.find_task(prefix)?;
        self.record(OpKind::TaskUpdate {
            id: id.clone(),
            changes: TaskPatch {
                is_done: Some(true),
                ..TaskPatch::default()
            },
        })?;
        Ok(id)
    }

    pub fn rename(&self, prefix: &str, title: &str) -> Result<String> {
        let id = self.find_task(prefix)?;
        self.record(OpKind::TaskUpdate {
            id: id.clone(),
            changes: TaskPatch {
                title: Some(title.to_string()),
                ..TaskPatch::default()
            },
        })?;
        Ok(id)
    }

    pub fn status(&self) -> Result<Status> {
        let log = self.store.load_log()?;
        Ok(Status {
            client_id: self.client_id,
            artifact: self.config.artifact.clone(),
            entries: log.len(),
            local_changes: log.local_changes(),
            meta: self.store.load_meta()?,
            pending: self.store.load_pending()?.map(|p| p.descriptor),
        })
    }

    fn orchestrator(&self) -> Result<SyncOrchestrator<DirectoryRemote>> {
        let remote_dir = self
            .remote_dir
            .clone()
            .context("No remote configured; pass --remote or run `pfsync init --remote <dir>`")?;
        let ctx = SyncContext::new(self.store.load_log()?, self.store.load_meta()?);
        let orchestrator = SyncOrchestrator::new(
            ctx,
            DirectoryRemote::new(remote_dir),
            self.config.sync_config(self.passphrase.clone()),
            Arc::clone(&self.events),
            self.client_id,
        )?;
        Ok(orchestrator)
    }

    fn persist(&self, orchestrator: &SyncOrchestrator<DirectoryRemote>) -> Result<()> {
        let ctx = orchestrator.context();
        self.store.save_log(&ctx.log_snapshot())?;
        self.store.save_meta(&ctx.meta_snapshot())?;
        self.store
            .save_pending(orchestrator.pending_conflict_record().as_ref())
    }

    /// Run one sync cycle and store whatever it changed, even on failure.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let _lock = self.lock_state_async().await?;
        if self.store.load_pending()?.is_some() {
            bail!("A conflict is pending; run `pfsync resolve local` or `pfsync resolve remote`");
        }
        let orchestrator = self.orchestrator()?;
        let result = orchestrator.sync().await;
        self.persist(&orchestrator)?;
        Ok(result?)
    }

    pub async fn resolve(&self, resolution: ConflictResolution) -> Result<SyncOutcome> {
        let _lock = self.lock_state_async().await?;
        let pending = self
            .store
            .load_pending()?
            .context("No conflict is pending")?;
        let orchestrator = self.orchestrator()?;
        orchestrator.restore_pending_conflict(pending);
        let result = orchestrator.resolve_conflict(resolution).await;
        self.persist(&orchestrator)?;
        Ok(result?)
    }
}
