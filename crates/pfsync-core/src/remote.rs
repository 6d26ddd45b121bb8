//! Remote blob store abstraction.
//!
//! Implementations:
//! - `InMemoryRemote` - For tests and embedding
//! - `DirectoryRemote` (in pfsync-cli) - A local directory standing in for a provider
//!
//! Every write carries the revision the writer last saw. A store rejects the
//! write with [`RemoteError::RevisionConflict`] when the stored revision differs,
//! which is what keeps two clients from silently overwriting each other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Opaque revision identifier assigned by the store on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionToken(String);

impl RevisionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Remote file not found: {0}")]
    NotFound(String),

    #[error("Revision conflict on {key}: expected {expected:?}, found {actual:?}")]
    RevisionConflict {
        key: String,
        expected: Option<RevisionToken>,
        actual: Option<RevisionToken>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBlob {
    pub data: Vec<u8>,
    pub revision: RevisionToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub key: String,
    pub revision: RevisionToken,
}

/// Storage provider interface.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<RemoteBlob>;

    /// Write `data` only if the stored revision equals `expected`
    /// (`None` means the key must not exist yet). Returns the new revision.
    async fn put(&self, key: &str, data: &[u8], expected: Option<&RevisionToken>)
    -> Result<RevisionToken>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Entries whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>>;
}

// Lets several orchestrators share one store in tests
#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<RemoteBlob> {
        (**self).get(key).await
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken> {
        (**self).put(key, data, expected).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>> {
        (**self).list(prefix).await
    }
}

/// Store call kinds, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    Get,
    Put,
    Delete,
    List,
}

/// In-memory store with monotonically numbered revisions.
#[derive(Default)]
pub struct InMemoryRemote {
    blobs: RwLock<HashMap<String, RemoteBlob>>,
    next_revision: AtomicU64,
    faults: Mutex<HashMap<RemoteCall, VecDeque<RemoteError>>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `call` fail with `error`. Queued faults fire in order.
    pub fn fail_next(&self, call: RemoteCall, error: RemoteError) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(call)
            .or_default()
            .push_back(error);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Current contents of `key`, bypassing faults and latency.
    pub fn peek(&self, key: &str) -> Option<RemoteBlob> {
        self.blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    async fn before(&self, call: RemoteCall) -> Result<()> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&call)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_revision(&self) -> RevisionToken {
        let n = self.next_revision.fetch_add(1, Ordering::Relaxed) + 1;
        RevisionToken::new(format!("r{}", n))
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn get(&self, key: &str) -> Result<RemoteBlob> {
        self.before(RemoteCall::Get).await?;
        self.peek(key)
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken> {
        self.before(RemoteCall::Put).await?;
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        let actual = blobs.get(key).map(|blob| blob.revision.clone());
        if actual.as_ref() != expected {
            return Err(RemoteError::RevisionConflict {
                key: key.to_string(),
                expected: expected.cloned(),
                actual,
            });
        }
        let revision = self.next_revision();
        blobs.insert(
            key.to_string(),
            RemoteBlob {
                data: data.to_vec(),
                revision: revision.clone(),
            },
        );
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.before(RemoteCall::Delete).await?;
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>> {
        self.before(RemoteCall::List).await?;
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<RemoteEntry> = blobs
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, blob)| RemoteEntry {
                key: key.clone(),
                revision: blob.revision.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
