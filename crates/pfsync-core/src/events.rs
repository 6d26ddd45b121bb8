//! Sync events and the bus that delivers them.
//!
//! Every event names the artifact it concerns. One bus can serve several
//! orchestrators (one per artifact); hosts subscribe either to everything or
//! to a single artifact, typically through [`SyncOrchestrator::subscribe`].
//!
//! [`SyncOrchestrator::subscribe`]: crate::SyncOrchestrator::subscribe

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Events emitted during a sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// The orchestrator entered a new state.
    StateChanged {
        artifact: String,
        /// Name of the new state (e.g., "checkingRemote", "uploading").
        state: String,
    },
    /// A log entry was skipped during replay.
    OperationSkipped {
        artifact: String,
        #[serde(rename = "opId")]
        op_id: String,
        reason: String,
    },
    /// Remote data or the local log was upgraded to the current schema.
    Migrated {
        artifact: String,
        #[serde(rename = "fromVersion")]
        from_version: u32,
        #[serde(rename = "toVersion")]
        to_version: u32,
        /// Operations carried over after migration.
        operations: usize,
    },
    /// Histories diverged on the same fields; the caller must resolve.
    ConflictDetected {
        artifact: String,
        fields: Vec<String>,
    },
    /// A new revision was written.
    Uploaded {
        artifact: String,
        revision: String,
        operations: usize,
    },
}

impl SyncEvent {
    pub fn artifact(&self) -> &str {
        match self {
            SyncEvent::StateChanged { artifact, .. }
            | SyncEvent::OperationSkipped { artifact, .. }
            | SyncEvent::Migrated { artifact, .. }
            | SyncEvent::ConflictDetected { artifact, .. }
            | SyncEvent::Uploaded { artifact, .. } => artifact,
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

struct Subscriber {
    /// `None` receives every artifact.
    artifact: Option<String>,
    active: Arc<AtomicBool>,
    callback: Callback,
}

impl Subscriber {
    fn wants(&self, event: &SyncEvent) -> bool {
        self.active.load(Ordering::Acquire)
            && self
                .artifact
                .as_deref()
                .is_none_or(|artifact| artifact == event.artifact())
    }
}

/// Keeps a subscription alive. Dropping it stops delivery; the bus forgets
/// the callback on its next emit.
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Fan-out of [`SyncEvent`]s to subscribed callbacks. Thread-safe.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, artifact: Option<String>, callback: Callback) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                artifact,
                active: Arc::clone(&active),
                callback,
            });
        Subscription { active }
    }

    /// Receive events for every artifact.
    pub fn subscribe(&self, callback: impl Fn(SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.add(None, Arc::new(callback))
    }

    /// Receive events for `artifact` only.
    pub fn subscribe_artifact(
        &self,
        artifact: &str,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(Some(artifact.to_string()), Arc::new(callback))
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.active.load(Ordering::Acquire))
            .count()
    }

    pub fn emit(&self, event: SyncEvent) {
        // Callbacks run without the lock held so they may subscribe or drop
        // subscriptions themselves
        let targets: Vec<(Arc<AtomicBool>, Callback)> = {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            subscribers.retain(|s| s.active.load(Ordering::Acquire));
            subscribers
                .iter()
                .filter(|s| s.wants(&event))
                .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
                .collect()
        };

        for (active, callback) in targets {
            if active.load(Ordering::Acquire) {
                callback(event.clone());
            }
        }
    }
}
