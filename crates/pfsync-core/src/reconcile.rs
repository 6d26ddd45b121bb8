//! Conflict detection and reconciliation of operation histories.
//!
//! Two levels of comparison:
//!
//! 1. [`detect_conflict`] is cheap: it compares the remote revision with the one
//!    recorded at the last sync, and the local change counter with the one
//!    recorded then. It decides whether a download is needed at all.
//! 2. [`reconcile`] compares full histories once both are in hand. Histories
//!    share a prefix (the common ancestor); the suffixes are what each side
//!    did independently. Suffixes that touch disjoint fields merge
//!    automatically. Suffixes that write the same field stop with a
//!    [`ConflictDescriptor`]; nothing here picks a winner.
//!
//! Everything here is a pure function of its inputs. No wall clock, no I/O.

use crate::meta::{LocalSyncMeta, SyncMeta};
use crate::model::{AppState, EntityRef, FieldRef, OpId, Operation, RawOperation, WHOLE_ENTITY};
use crate::schema::{MigrationError, MigrationRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncDirection {
    InSync,
    LocalAhead,
    RemoteAhead,
    Diverged,
}

/// Compare sync bookkeeping without downloading anything.
///
/// `local_changes` is the log's current change counter. A missing remote file
/// counts as `LocalAhead` when this client has anything to publish.
pub fn detect_conflict(
    local: &LocalSyncMeta,
    local_changes: u64,
    remote: Option<&SyncMeta>,
) -> SyncDirection {
    let dirty = local.has_local_changes(local_changes);
    let Some(remote) = remote else {
        if local_changes > 0 || local.last_synced_revision.is_some() {
            return SyncDirection::LocalAhead;
        }
        return SyncDirection::InSync;
    };
    let remote_changed = local.last_synced_revision.as_ref() != Some(&remote.revision);

    match (dirty, remote_changed) {
        (false, false) => SyncDirection::InSync,
        (true, false) => SyncDirection::LocalAhead,
        (false, true) => SyncDirection::RemoteAhead,
        (true, true) => SyncDirection::Diverged,
    }
}

/// Length of the longest shared prefix, compared by operation id.
pub fn common_ancestor(local: &[RawOperation], remote: &[RawOperation]) -> usize {
    local
        .iter()
        .zip(remote)
        .take_while(|(l, r)| l.id == r.id)
        .count()
}

/// History-level refinement of [`detect_conflict`].
pub fn classify_histories(local: &[RawOperation], remote: &[RawOperation]) -> SyncDirection {
    let ancestor = common_ancestor(local, remote);
    match (ancestor == local.len(), ancestor == remote.len()) {
        (true, true) => SyncDirection::InSync,
        (true, false) => SyncDirection::RemoteAhead,
        (false, true) => SyncDirection::LocalAhead,
        (false, false) => SyncDirection::Diverged,
    }
}

/// One field written differently on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub entity: EntityRef,
    pub field: String,
    pub local_value: Value,
    pub remote_value: Value,
    pub local_op: OpId,
    pub remote_op: OpId,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field == WHOLE_ENTITY {
            write!(f, "{}", self.entity)?;
        } else {
            write!(f, "{}.{}", self.entity, self.field)?;
        }
        write!(f, ": local {} | remote {}", self.local_value, self.remote_value)
    }
}

/// Everything a caller needs to present a conflict and resolve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDescriptor {
    /// Number of operations both histories share.
    pub ancestor_len: usize,
    /// Local operations after the common ancestor.
    pub local_ops: Vec<RawOperation>,
    /// Remote operations after the common ancestor.
    pub remote_ops: Vec<RawOperation>,
    pub field_diffs: Vec<FieldDiff>,
}

impl fmt::Display for ConflictDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} local and {} remote operations since {} shared; conflicting fields:",
            self.local_ops.len(),
            self.remote_ops.len(),
            self.ancestor_len
        )?;
        for diff in &self.field_diffs {
            writeln!(f, "  {}", diff)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    KeepLocal,
    KeepRemote,
    /// Caller-provided merged state.
    Manual(AppState),
}

/// Result of [`reconcile`]. `ops` is always the complete resulting history.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    InSync,
    /// Local is a prefix of remote; adopt remote.
    FastForwardLocal { ops: Vec<RawOperation> },
    /// Remote is a prefix of local; publish local.
    FastForwardRemote { ops: Vec<RawOperation> },
    /// Diverged on disjoint fields; ancestor plus both suffixes in merge order.
    Merged { ops: Vec<RawOperation> },
    Conflict(ConflictDescriptor),
}

/// Typed view of a suffix entry for field analysis. Entries this build cannot
/// interpret touch nothing; replay will skip them too.
fn typed(registry: &MigrationRegistry, raw: &RawOperation) -> Result<Option<Operation>, MigrationError> {
    let raw = if raw.schema_version == registry.current_version() {
        raw.clone()
    } else {
        match registry.migrate_operation(raw.clone())? {
            Some(migrated) => migrated,
            None => return Ok(None),
        }
    };
    Ok(raw.to_operation().ok())
}

fn merge_key(op: &RawOperation) -> (u64, crate::ClientId, &OpId) {
    (op.timestamp, op.client_id, &op.id)
}

/// Two-way merge of the suffixes by [`merge_key`].
///
/// Only the heads are compared, so each side keeps its own order even when
/// its timestamps tie or run backwards. An operation present on both sides
/// is emitted once, at its first position.
fn interleave<'a>(left: &'a [RawOperation], right: &'a [RawOperation]) -> Vec<&'a RawOperation> {
    let mut seen: HashSet<&OpId> = HashSet::new();
    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    loop {
        while i < left.len() && seen.contains(&left[i].id) {
            i += 1;
        }
        while j < right.len() && seen.contains(&right[j].id) {
            j += 1;
        }
        let next = match (left.get(i), right.get(j)) {
            (Some(l), Some(r)) if merge_key(r) < merge_key(l) => {
                j += 1;
                r
            }
            (Some(l), _) => {
                i += 1;
                l
            }
            (None, Some(r)) => {
                j += 1;
                r
            }
            (None, None) => break,
        };
        seen.insert(&next.id);
        out.push(next);
    }
    out
}

/// Reconcile two histories.
///
/// Both histories should already be at the registry's current version;
/// stale entries are migrated for analysis only.
pub fn reconcile(
    registry: &MigrationRegistry,
    local: &[RawOperation],
    remote: &[RawOperation],
) -> Result<Reconciliation, MigrationError> {
    let ancestor = common_ancestor(local, remote);
    match classify_histories(local, remote) {
        SyncDirection::InSync => return Ok(Reconciliation::InSync),
        SyncDirection::RemoteAhead => {
            return Ok(Reconciliation::FastForwardLocal {
                ops: remote.to_vec(),
            });
        }
        SyncDirection::LocalAhead => {
            return Ok(Reconciliation::FastForwardRemote {
                ops: local.to_vec(),
            });
        }
        SyncDirection::Diverged => {}
    }

    let local_suffix = &local[ancestor..];
    let remote_suffix = &remote[ancestor..];
    let local_ids: HashSet<&OpId> = local_suffix.iter().map(|op| &op.id).collect();
    let remote_ids: HashSet<&OpId> = remote_suffix.iter().map(|op| &op.id).collect();

    let mut local_only = Vec::new();
    for raw in local_suffix.iter().filter(|op| !remote_ids.contains(&op.id)) {
        if let Some(op) = typed(registry, raw)? {
            local_only.push(op);
        }
    }
    let mut remote_only = Vec::new();
    for raw in remote_suffix.iter().filter(|op| !local_ids.contains(&op.id)) {
        if let Some(op) = typed(registry, raw)? {
            remote_only.push(op);
        }
    }

    // Later operations overwrite earlier ones so each diff shows final values
    let mut diffs: BTreeMap<FieldRef, FieldDiff> = BTreeMap::new();
    for l in &local_only {
        let local_fields = l.kind.touched_fields();
        for r in &remote_only {
            for rf in r.kind.touched_fields() {
                let Some(lf) = local_fields.iter().find(|lf| lf.overlaps(&rf)) else {
                    continue;
                };
                let entity = if lf.entity == EntityRef::All {
                    rf.entity.clone()
                } else {
                    lf.entity.clone()
                };
                let field = if lf.field == WHOLE_ENTITY {
                    rf.field.clone()
                } else {
                    lf.field.clone()
                };
                let key = FieldRef::new(entity.clone(), &field);
                diffs.insert(
                    key,
                    FieldDiff {
                        local_value: l.kind.field_value(&field),
                        remote_value: r.kind.field_value(&field),
                        entity,
                        field,
                        local_op: l.id.clone(),
                        remote_op: r.id.clone(),
                    },
                );
            }
        }
    }

    if !diffs.is_empty() {
        debug!(
            "Histories diverged at {} with {} conflicting fields",
            ancestor,
            diffs.len()
        );
        return Ok(Reconciliation::Conflict(ConflictDescriptor {
            ancestor_len: ancestor,
            local_ops: local_suffix.to_vec(),
            remote_ops: remote_suffix.to_vec(),
            field_diffs: diffs.into_values().collect(),
        }));
    }

    let mut ops = local[..ancestor].to_vec();
    ops.extend(interleave(local_suffix, remote_suffix).into_iter().cloned());
    debug!(
        "Merged {} local and {} remote operations after {} shared",
        local_suffix.len(),
        remote_suffix.len(),
        ancestor
    );
    Ok(Reconciliation::Merged { ops })
}
