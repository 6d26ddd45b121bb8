//! Directory-backed remote store using tokio::fs.
//!
//! Each key is a file under the root (`pfsync/main` -> `<root>/pfsync/main`).
//! The revision token is the SHA-256 of the file contents, so any writer that
//! changes the bytes changes the revision. Writes go to a temporary sibling
//! and are renamed into place, under an advisory lock on a `.pfsync-lock`
//! sibling so compare-and-put holds across processes.

use crate::lock::FileLock;
use async_trait::async_trait;
use pfsync_core::remote::{RemoteBlob, RemoteEntry, RemoteError, RemoteStore, Result, RevisionToken};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const TEMP_SUFFIX: &str = ".pfsync-tmp";
const LOCK_SUFFIX: &str = ".pfsync-lock";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DirectoryRemote {
    root: PathBuf,
    lock_timeout: Duration,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.to_path_buf().into_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn is_bookkeeping(key: &str) -> bool {
    key.ends_with(TEMP_SUFFIX) || key.ends_with(LOCK_SUFFIX)
}

fn revision_of(data: &[u8]) -> RevisionToken {
    RevisionToken::new(hex::encode(Sha256::digest(data)))
}

fn io_error(key: &str, e: std::io::Error) -> RemoteError {
    if e.kind() == ErrorKind::NotFound {
        RemoteError::NotFound(key.to_string())
    } else {
        RemoteError::Other(format!("{}: {}", key, e))
    }
}

impl DirectoryRemote {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// How long a write waits for another writer's lock on the same key.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || is_bookkeeping(key)
            || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(RemoteError::Other(format!("Invalid key: {:?}", key)));
        }
        Ok(self.root.join(key))
    }

    async fn lock_key(&self, key: &str, path: &Path) -> Result<FileLock> {
        FileLock::acquire_async(&sibling(path, LOCK_SUFFIX), self.lock_timeout)
            .await
            .map_err(|e| RemoteError::Network(format!("{}: {:#}", key, e)))
    }

    async fn current_revision(&self, key: &str, path: &Path) -> Result<Option<RevisionToken>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(revision_of(&data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn collect(&self, dir: PathBuf, prefix: &str, out: &mut Vec<RemoteEntry>) -> Result<()> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(RemoteError::Other(format!("{:?}: {}", dir, e))),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| RemoteError::Other(e.to_string()))?
            {
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| RemoteError::Other(e.to_string()))?;
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if is_bookkeeping(&key) || !key.starts_with(prefix) {
                    continue;
                }

                let data = fs::read(&path).await.map_err(|e| io_error(&key, e))?;
                out.push(RemoteEntry {
                    revision: revision_of(&data),
                    key,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemote {
    async fn get(&self, key: &str) -> Result<RemoteBlob> {
        let path = self.full_path(key)?;
        let data = fs::read(&path).await.map_err(|e| io_error(key, e))?;
        Ok(RemoteBlob {
            revision: revision_of(&data),
            data,
        })
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken> {
        let path = self.full_path(key)?;
        let _lock = self.lock_key(key, &path).await?;

        let actual = self.current_revision(key, &path).await?;
        if actual.as_ref() != expected {
            return Err(RemoteError::RevisionConflict {
                key: key.to_string(),
                expected: expected.cloned(),
                actual,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }

        let temp = sibling(&path, TEMP_SUFFIX);
        fs::write(&temp, data).await.map_err(|e| io_error(key, e))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| io_error(key, e))?;

        Ok(revision_of(data))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.full_path(key)?;
        let _lock = self.lock_key(key, &path).await?;
        fs::remove_file(&path).await.map_err(|e| io_error(key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        self.collect(self.root.clone(), prefix, &mut entries).await?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
