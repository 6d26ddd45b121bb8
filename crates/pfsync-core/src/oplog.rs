//! Append-only operation log and replay.
//!
//! The log stores [`RawOperation`]s exactly as they were written, each tagged
//! with the schema version that produced it. Replay folds them into an
//! [`AppState`], migrating stale entries on the fly and skipping entries whose
//! type this build does not understand.

use crate::model::{AppState, OpId, Operation, RawOperation};
use crate::schema::{CURRENT_SCHEMA_VERSION, MigrationError, MigrationRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Result of [`OperationLog::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(OpId),
    /// The operation type is transient UI state and was not recorded.
    Excluded,
}

/// A log entry that replay could not apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayIssue {
    UnknownOperationType { op_id: OpId, op_type: String },
    MalformedPayload { op_id: OpId, op_type: String, message: String },
}

impl fmt::Display for ReplayIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayIssue::UnknownOperationType { op_id, op_type } => {
                write!(f, "unknown operation type {} ({})", op_type, op_id)
            }
            ReplayIssue::MalformedPayload {
                op_id,
                op_type,
                message,
            } => write!(f, "malformed {} payload ({}): {}", op_type, op_id, message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub state: AppState,
    /// Position replay started from.
    pub start: usize,
    /// Entries folded into the state.
    pub applied: usize,
    /// Entries that needed migration before they could be applied.
    pub migrated: usize,
    /// Entries removed by a migration step.
    pub dropped: usize,
    pub issues: Vec<ReplayIssue>,
}

/// Materialized state at a known log position.
///
/// Only usable while its schema version matches the registry's current
/// version; a mismatch means the state shape is stale and replay starts over.
#[derive(Debug, Clone, PartialEq)]
pub struct MigratableStateCache {
    pub schema_version: u32,
    pub position: usize,
    pub state: AppState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLog {
    entries: Vec<RawOperation>,
    /// Number of local appends ever recorded. Only ever increases.
    #[serde(default)]
    local_changes: u64,
    #[serde(skip)]
    cache: Option<MigratableStateCache>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local operation.
    ///
    /// Blacklisted types are dropped here so they never reach storage or sync.
    pub fn append(&mut self, op: Operation) -> AppendOutcome {
        if !op.kind.is_persisted() {
            debug!("Not persisting transient operation {}", op.kind.op_type());
            return AppendOutcome::Excluded;
        }
        let id = op.id.clone();
        self.entries.push(op.into_raw(CURRENT_SCHEMA_VERSION));
        self.local_changes += 1;
        AppendOutcome::Appended(id)
    }

    pub fn entries(&self) -> &[RawOperation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries at and after `position`. Empty when past the end.
    pub fn suffix_from(&self, position: usize) -> &[RawOperation] {
        self.entries.get(position..).unwrap_or(&[])
    }

    pub fn op_ids(&self) -> Vec<OpId> {
        self.entries.iter().map(|op| op.id.clone()).collect()
    }

    pub fn local_changes(&self) -> u64 {
        self.local_changes
    }

    /// Swap in a reconciled history. Invalidates the state cache.
    pub fn replace_entries(&mut self, entries: Vec<RawOperation>) {
        self.entries = entries;
        self.cache = None;
    }

    pub fn cache(&self) -> Option<&MigratableStateCache> {
        self.cache.as_ref()
    }

    /// Install a state known to equal the fold of the first `position` entries.
    pub fn seed_cache(&mut self, state: AppState, position: usize, schema_version: u32) {
        self.cache = Some(MigratableStateCache {
            schema_version,
            position,
            state,
        });
    }

    fn usable_cache(&self, registry: &MigrationRegistry) -> Option<&MigratableStateCache> {
        self.cache.as_ref().filter(|cache| {
            cache.schema_version == registry.current_version() && cache.position <= self.entries.len()
        })
    }

    /// Fold the log into state.
    ///
    /// With `from == None` replay resumes from the cache when it is usable,
    /// otherwise from the beginning, and the cache is refreshed afterwards.
    /// `Some(position)` folds only `entries[position..]` onto an empty state.
    ///
    /// Unknown and malformed entries are skipped and reported. Version errors
    /// (an entry newer than this build, or a broken migration chain) abort.
    pub fn replay(
        &mut self,
        registry: &MigrationRegistry,
        from: Option<usize>,
    ) -> Result<ReplayOutcome, MigrationError> {
        let (mut state, start) = match from {
            Some(position) => (AppState::default(), position.min(self.entries.len())),
            None => match self.usable_cache(registry) {
                Some(cache) => (cache.state.clone(), cache.position),
                None => (AppState::default(), 0),
            },
        };

        let mut outcome = ReplayOutcome {
            state: AppState::default(),
            start,
            applied: 0,
            migrated: 0,
            dropped: 0,
            issues: Vec::new(),
        };

        for raw in &self.entries[start..] {
            let raw = if raw.schema_version == registry.current_version() {
                raw.clone()
            } else {
                outcome.migrated += 1;
                match registry.migrate_operation(raw.clone()) {
                    Ok(Some(migrated)) => migrated,
                    Ok(None) => {
                        outcome.dropped += 1;
                        continue;
                    }
                    Err(MigrationError::OperationTransform { message, .. }) => {
                        warn!("Skipping operation {} that cannot be migrated: {}", raw.id, message);
                        outcome.issues.push(ReplayIssue::MalformedPayload {
                            op_id: raw.id.clone(),
                            op_type: raw.op_type.clone(),
                            message,
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };

            match raw.to_operation() {
                Ok(op) => {
                    state.apply(&op.kind);
                    outcome.applied += 1;
                }
                Err(crate::model::OperationParseError::UnknownType(op_type)) => {
                    warn!("Skipping operation {} with unknown type {}", raw.id, op_type);
                    outcome.issues.push(ReplayIssue::UnknownOperationType {
                        op_id: raw.id.clone(),
                        op_type,
                    });
                }
                Err(crate::model::OperationParseError::MalformedPayload { op_type, message }) => {
                    warn!("Skipping operation {} with malformed payload: {}", raw.id, message);
                    outcome.issues.push(ReplayIssue::MalformedPayload {
                        op_id: raw.id.clone(),
                        op_type,
                        message,
                    });
                }
            }
        }

        if from.is_none() || start == 0 {
            self.seed_cache(state.clone(), self.entries.len(), registry.current_version());
        }
        outcome.state = state;
        Ok(outcome)
    }
}
