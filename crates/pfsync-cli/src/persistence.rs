//! On-disk host state.
//!
//! Everything lives as pretty JSON in the state directory:
//! - `oplog.json`: the local operation log
//! - `sync_meta.json`: revision and change counter of the last sync
//! - `pending_conflict.json`: an unresolved conflict, if any
//!
//! `.lock` guards read-modify-write cycles across processes; see [`crate::lock`].

use anyhow::{Context, Result};
use pfsync_core::{LocalSyncMeta, OperationLog, PendingConflict};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

const OPLOG_FILE: &str = "oplog.json";
const META_FILE: &str = "sync_meta.json";
const PENDING_FILE: &str = "pending_conflict.json";
const LOCK_FILE: &str = ".lock";

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Storage rooted at `dir`. The directory is created on first save.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(Some(value))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {:?}", self.dir))?;
        let path = self.dir.join(name);
        let contents = serde_json::to_string_pretty(value)?;
        // Rename so a crash never leaves a half-written log
        let temp = self.dir.join(format!("{}.tmp", name));
        fs::write(&temp, contents).with_context(|| format!("Failed to write {:?}", temp))?;
        fs::rename(&temp, &path).with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    }

    pub fn load_log(&self) -> Result<OperationLog> {
        Ok(self.read(OPLOG_FILE)?.unwrap_or_default())
    }

    pub fn save_log(&self, log: &OperationLog) -> Result<()> {
        self.write(OPLOG_FILE, log)
    }

    pub fn load_meta(&self) -> Result<LocalSyncMeta> {
        Ok(self.read(META_FILE)?.unwrap_or_default())
    }

    pub fn save_meta(&self, meta: &LocalSyncMeta) -> Result<()> {
        self.write(META_FILE, meta)
    }

    pub fn load_pending(&self) -> Result<Option<PendingConflict>> {
        self.read(PENDING_FILE)
    }

    /// Store the pending conflict, or remove the file when there is none.
    pub fn save_pending(&self, pending: Option<&PendingConflict>) -> Result<()> {
        match pending {
            Some(pending) => self.write(PENDING_FILE, pending),
            None => {
                let path = self.dir.join(PENDING_FILE);
                if path.exists() {
                    fs::remove_file(&path)
                        .with_context(|| format!("Failed to remove {:?}", path))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfsync_core::model::{OpKind, Operation, Task};
    use pfsync_core::{ClientId, RevisionToken};
    use tempfile::TempDir;

    fn task_add(id: &str) -> Operation {
        Operation::new(
            ClientId::from(1),
            100,
            OpKind::TaskAdd {
                task: Task {
                    id: id.into(),
                    title: "Write report".into(),
                    ..Task::default()
                },
            },
        )
    }

    #[test]
    fn test_empty_dir_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());

        assert!(store.load_log().unwrap().is_empty());
        assert_eq!(store.load_meta().unwrap(), LocalSyncMeta::default());
        assert!(store.load_pending().unwrap().is_none());
    }

    #[test]
    fn test_log_and_meta_survive_reload() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(&dir.path().join("state"));

        let mut log = OperationLog::new();
        log.append(task_add("t1"));
        log.append(task_add("t2"));
        store.save_log(&log).unwrap();

        let mut meta = LocalSyncMeta::default();
        meta.record_sync(RevisionToken::new("abc"), 2, 1000);
        store.save_meta(&meta).unwrap();

        let loaded = store.load_log().unwrap();
        assert_eq!(loaded.entries(), log.entries());
        assert_eq!(loaded.local_changes(), 2);
        assert_eq!(store.load_meta().unwrap(), meta);
    }

    #[test]
    fn test_clearing_pending_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());

        // Clearing with nothing stored is fine
        store.save_pending(None).unwrap();
        assert!(!dir.path().join(PENDING_FILE).exists());
    }

    #[test]
    fn test_corrupt_log_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(OPLOG_FILE), "[[[").unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_log().is_err());
    }
}
