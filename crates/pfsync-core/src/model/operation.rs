//! Operations: the state-mutating events recorded in the operation log.
//!
//! Two representations exist:
//!
//! - [`RawOperation`]: the persisted, version-tagged form. Its `type` and
//!   `payload` are untyped so that operations written by older (or newer)
//!   builds can be stored, migrated and forwarded without loss.
//! - [`Operation`]: the typed form with a closed [`OpKind`]. Raw operations
//!   are converted only after migration has brought them to the current
//!   schema version.

use crate::ClientId;
use crate::model::state::{AppState, Project, ProjectPatch, Tag, TagPatch, Task, TaskPatch};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

/// Operation types that describe transient UI state.
///
/// These are dropped before they reach the log and never sync.
pub const PERSIST_EXCLUDED_OP_TYPES: &[&str] =
    &["set_current_task", "set_selected_task", "toggle_side_nav"];

/// Every operation type the current build understands.
pub const KNOWN_OP_TYPES: &[&str] = &[
    "task_add",
    "task_update",
    "task_delete",
    "task_move_to_project",
    "project_add",
    "project_update",
    "project_delete",
    "tag_add",
    "tag_update",
    "tag_delete",
    "config_update",
    "state_import",
    "set_current_task",
    "set_selected_task",
    "toggle_side_nav",
];

/// Field name meaning "the whole entity".
pub const WHOLE_ENTITY: &str = "*";

/// Field prefix for "task `<id>` points at this project or tag".
///
/// Deleting a project or tag rewrites every task that points at it, so a
/// concurrent write of such a pointer has to meet the delete's whole-entity
/// claim. The task id keeps two tasks pointing at the same tag apart.
pub const REFERENCE_PREFIX: &str = "ref:";

pub fn is_persisted_type(op_type: &str) -> bool {
    !PERSIST_EXCLUDED_OP_TYPES.contains(&op_type)
}

#[derive(Debug, Error)]
pub enum OperationParseError {
    #[error("Unknown operation type: {0}")]
    UnknownType(String),

    #[error("Malformed payload for {op_type}: {message}")]
    MalformedPayload { op_type: String, message: String },
}

/// Globally unique operation identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(String);

impl OpId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OpId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of operation payloads.
///
/// Wire form: `{"type":"task_update","payload":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OpKind {
    TaskAdd { task: Task },
    TaskUpdate { id: String, changes: TaskPatch },
    TaskDelete { id: String },
    TaskMoveToProject { id: String, project_id: Option<String> },
    ProjectAdd { project: Project },
    ProjectUpdate { id: String, changes: ProjectPatch },
    ProjectDelete { id: String },
    TagAdd { tag: Tag },
    TagUpdate { id: String, changes: TagPatch },
    TagDelete { id: String },
    ConfigUpdate { section: String, value: Value },
    /// Replaces the whole state. Written by conflict resolution and imports.
    StateImport { state: AppState },
    SetCurrentTask { id: Option<String> },
    SetSelectedTask { id: Option<String> },
    ToggleSideNav,
}

impl OpKind {
    pub fn op_type(&self) -> &'static str {
        match self {
            Self::TaskAdd { .. } => "task_add",
            Self::TaskUpdate { .. } => "task_update",
            Self::TaskDelete { .. } => "task_delete",
            Self::TaskMoveToProject { .. } => "task_move_to_project",
            Self::ProjectAdd { .. } => "project_add",
            Self::ProjectUpdate { .. } => "project_update",
            Self::ProjectDelete { .. } => "project_delete",
            Self::TagAdd { .. } => "tag_add",
            Self::TagUpdate { .. } => "tag_update",
            Self::TagDelete { .. } => "tag_delete",
            Self::ConfigUpdate { .. } => "config_update",
            Self::StateImport { .. } => "state_import",
            Self::SetCurrentTask { .. } => "set_current_task",
            Self::SetSelectedTask { .. } => "set_selected_task",
            Self::ToggleSideNav => "toggle_side_nav",
        }
    }

    pub fn is_persisted(&self) -> bool {
        is_persisted_type(self.op_type())
    }

    /// Entity fields this operation writes.
    ///
    /// Adds and deletes claim the whole entity; `state_import` claims everything.
    /// Task writes that point at a project or tag also claim a reference on it.
    pub fn touched_fields(&self) -> Vec<FieldRef> {
        match self {
            Self::TaskAdd { task } => {
                let mut fields = vec![FieldRef::whole(EntityRef::Task(task.id.clone()))];
                if let Some(project_id) = &task.project_id {
                    fields.push(FieldRef::reference(EntityRef::Project(project_id.clone()), &task.id));
                }
                fields.extend(
                    task.tag_ids
                        .iter()
                        .map(|tag_id| FieldRef::reference(EntityRef::Tag(tag_id.clone()), &task.id)),
                );
                fields
            }
            Self::TaskUpdate { id, changes } => {
                let mut fields = FieldRef::from_patch(EntityRef::Task(id.clone()), changes);
                if let Some(tag_ids) = &changes.tag_ids {
                    fields.extend(
                        tag_ids
                            .iter()
                            .map(|tag_id| FieldRef::reference(EntityRef::Tag(tag_id.clone()), id)),
                    );
                }
                fields
            }
            Self::TaskDelete { id } => vec![FieldRef::whole(EntityRef::Task(id.clone()))],
            Self::TaskMoveToProject { id, project_id } => {
                let mut fields = vec![FieldRef::new(EntityRef::Task(id.clone()), "project_id")];
                if let Some(project_id) = project_id {
                    fields.push(FieldRef::reference(EntityRef::Project(project_id.clone()), id));
                }
                fields
            }
            Self::ProjectAdd { project } => {
                vec![FieldRef::whole(EntityRef::Project(project.id.clone()))]
            }
            Self::ProjectUpdate { id, changes } => {
                FieldRef::from_patch(EntityRef::Project(id.clone()), changes)
            }
            Self::ProjectDelete { id } => vec![FieldRef::whole(EntityRef::Project(id.clone()))],
            Self::TagAdd { tag } => vec![FieldRef::whole(EntityRef::Tag(tag.id.clone()))],
            Self::TagUpdate { id, changes } => {
                FieldRef::from_patch(EntityRef::Tag(id.clone()), changes)
            }
            Self::TagDelete { id } => vec![FieldRef::whole(EntityRef::Tag(id.clone()))],
            Self::ConfigUpdate { section, .. } => {
                vec![FieldRef::whole(EntityRef::Config(section.clone()))]
            }
            Self::StateImport { .. } => vec![FieldRef::whole(EntityRef::All)],
            Self::SetCurrentTask { .. } | Self::SetSelectedTask { .. } | Self::ToggleSideNav => {
                vec![]
            }
        }
    }

    /// The value this operation writes to `field`, for conflict display.
    pub fn field_value(&self, field: &str) -> Value {
        fn pick<T: Serialize>(value: &T, field: &str) -> Value {
            let value = serde_json::to_value(value).unwrap_or(Value::Null);
            if field == WHOLE_ENTITY {
                return value;
            }
            value.get(field).cloned().unwrap_or(Value::Null)
        }

        // A reference shows which task points at the entity
        let reference = || field.strip_prefix(REFERENCE_PREFIX).map(|task_id| json!(task_id));

        match self {
            Self::TaskAdd { task } => reference().unwrap_or_else(|| pick(task, field)),
            Self::TaskUpdate { changes, .. } => reference().unwrap_or_else(|| pick(changes, field)),
            Self::TaskMoveToProject { project_id, .. } => {
                reference().unwrap_or_else(|| json!(project_id))
            }
            Self::ProjectAdd { project } => pick(project, field),
            Self::ProjectUpdate { changes, .. } => pick(changes, field),
            Self::TagAdd { tag } => pick(tag, field),
            Self::TagUpdate { changes, .. } => pick(changes, field),
            Self::ConfigUpdate { value, .. } => value.clone(),
            Self::TaskDelete { .. } | Self::ProjectDelete { .. } | Self::TagDelete { .. } => {
                json!("<deleted>")
            }
            Self::StateImport { .. } => json!("<state import>"),
            Self::SetCurrentTask { .. } | Self::SetSelectedTask { .. } | Self::ToggleSideNav => {
                Value::Null
            }
        }
    }

    /// Split into the `(type, payload)` pair stored in a [`RawOperation`].
    fn into_parts(self) -> (String, Value) {
        let op_type = self.op_type().to_string();
        let payload = match serde_json::to_value(&self) {
            Ok(Value::Object(mut map)) => map.remove("payload").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        (op_type, payload)
    }

    fn from_parts(op_type: &str, payload: &Value) -> Result<Self, OperationParseError> {
        if !KNOWN_OP_TYPES.contains(&op_type) {
            return Err(OperationParseError::UnknownType(op_type.to_string()));
        }
        let mut tagged = serde_json::Map::new();
        tagged.insert("type".to_string(), Value::String(op_type.to_string()));
        if !payload.is_null() {
            tagged.insert("payload".to_string(), payload.clone());
        }
        serde_json::from_value(Value::Object(tagged)).map_err(|e| {
            OperationParseError::MalformedPayload {
                op_type: op_type.to_string(),
                message: e.to_string(),
            }
        })
    }
}

/// What an operation refers to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Task(String),
    Project(String),
    Tag(String),
    Config(String),
    /// The entire application state.
    All,
}

impl EntityRef {
    fn overlaps(&self, other: &EntityRef) -> bool {
        matches!(self, EntityRef::All) || matches!(other, EntityRef::All) || self == other
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Task(id) => write!(f, "task {}", id),
            EntityRef::Project(id) => write!(f, "project {}", id),
            EntityRef::Tag(id) => write!(f, "tag {}", id),
            EntityRef::Config(section) => write!(f, "config section {}", section),
            EntityRef::All => f.write_str("entire state"),
        }
    }
}

/// A single field of an entity, or the whole entity when `field == "*"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub entity: EntityRef,
    pub field: String,
}

impl FieldRef {
    pub fn new(entity: EntityRef, field: &str) -> Self {
        Self {
            entity,
            field: field.to_string(),
        }
    }

    pub fn whole(entity: EntityRef) -> Self {
        Self::new(entity, WHOLE_ENTITY)
    }

    /// Task `task_id` points at `entity`.
    pub fn reference(entity: EntityRef, task_id: &str) -> Self {
        Self::new(entity, &format!("{}{}", REFERENCE_PREFIX, task_id))
    }

    /// One ref per field set in `patch` (patches skip unset fields when serialized).
    fn from_patch<T: Serialize>(entity: EntityRef, patch: &T) -> Vec<FieldRef> {
        match serde_json::to_value(patch) {
            Ok(Value::Object(map)) => map.keys().map(|k| FieldRef::new(entity.clone(), k)).collect(),
            _ => vec![],
        }
    }

    pub fn overlaps(&self, other: &FieldRef) -> bool {
        self.entity.overlaps(&other.entity)
            && (self.field == other.field
                || self.field == WHOLE_ENTITY
                || other.field == WHOLE_ENTITY)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field == WHOLE_ENTITY {
            write!(f, "{}", self.entity)
        } else {
            write!(f, "{}.{}", self.entity, self.field)
        }
    }
}

/// A typed operation at the current schema version.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: OpId,
    pub client_id: ClientId,
    /// Milliseconds since Unix epoch, as recorded by the authoring client.
    pub timestamp: u64,
    pub kind: OpKind,
}

impl Operation {
    pub fn new(client_id: ClientId, timestamp: u64, kind: OpKind) -> Self {
        Self {
            id: OpId::generate(),
            client_id,
            timestamp,
            kind,
        }
    }

    pub fn into_raw(self, schema_version: u32) -> RawOperation {
        let (op_type, payload) = self.kind.into_parts();
        RawOperation {
            id: self.id,
            client_id: self.client_id,
            timestamp: self.timestamp,
            schema_version,
            op_type,
            payload,
        }
    }
}

/// A persisted operation. Immutable once appended; migration yields a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOperation {
    pub id: OpId,
    pub client_id: ClientId,
    pub timestamp: u64,
    pub schema_version: u32,
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawOperation {
    /// Parse the payload into a typed [`Operation`].
    ///
    /// Callers migrate first; the payload is interpreted with the current schema.
    pub fn to_operation(&self) -> Result<Operation, OperationParseError> {
        let kind = OpKind::from_parts(&self.op_type, &self.payload)?;
        Ok(Operation {
            id: self.id.clone(),
            client_id: self.client_id,
            timestamp: self.timestamp,
            kind,
        })
    }
}
