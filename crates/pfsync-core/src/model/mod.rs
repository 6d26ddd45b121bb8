//! Task-manager domain model: entities, state, and the operations over them.

pub mod operation;
pub mod state;

pub use operation::{
    EntityRef, FieldRef, KNOWN_OP_TYPES, OpId, OpKind, Operation, OperationParseError,
    PERSIST_EXCLUDED_OP_TYPES, REFERENCE_PREFIX, RawOperation, WHOLE_ENTITY, is_persisted_type,
};
pub use state::{AppState, Project, ProjectPatch, StateSnapshot, Tag, TagPatch, Task, TaskPatch};
