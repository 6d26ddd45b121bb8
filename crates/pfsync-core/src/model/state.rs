//! Materialized application state and the fold that builds it from operations.

use crate::model::operation::OpKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub time_estimate_ms: u64,
    #[serde(default)]
    pub time_spent_ms: u64,
    #[serde(default)]
    pub created_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_estimate_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent_ms: Option<u64>,
}

impl TaskPatch {
    fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(notes) = &self.notes {
            task.notes = notes.clone();
        }
        if let Some(tag_ids) = &self.tag_ids {
            task.tag_ids = tag_ids.clone();
        }
        if let Some(is_done) = self.is_done {
            task.is_done = is_done;
        }
        if let Some(estimate) = self.time_estimate_ms {
            task.time_estimate_ms = estimate;
        }
        if let Some(spent) = self.time_spent_ms {
            task.time_spent_ms = spent;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub is_archived: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// The whole application state. Maps are ordered so serialization is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
    #[serde(default)]
    pub tags: BTreeMap<String, Tag>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

impl AppState {
    /// Fold one operation into the state.
    ///
    /// Updates that target a missing entity are ignored; with concurrent
    /// histories a delete can legitimately precede an update.
    pub fn apply(&mut self, kind: &OpKind) {
        match kind {
            OpKind::TaskAdd { task } => {
                self.tasks.insert(task.id.clone(), task.clone());
            }
            OpKind::TaskUpdate { id, changes } => match self.tasks.get_mut(id) {
                Some(task) => changes.apply_to(task),
                None => debug!("Ignoring update for missing task {}", id),
            },
            OpKind::TaskDelete { id } => {
                self.tasks.remove(id);
            }
            OpKind::TaskMoveToProject { id, project_id } => {
                let target = project_id
                    .as_ref()
                    .filter(|p| self.projects.contains_key(*p))
                    .cloned();
                match self.tasks.get_mut(id) {
                    Some(task) => task.project_id = target,
                    None => debug!("Ignoring move for missing task {}", id),
                }
            }
            OpKind::ProjectAdd { project } => {
                self.projects.insert(project.id.clone(), project.clone());
            }
            OpKind::ProjectUpdate { id, changes } => match self.projects.get_mut(id) {
                Some(project) => {
                    if let Some(title) = &changes.title {
                        project.title = title.clone();
                    }
                    if let Some(is_archived) = changes.is_archived {
                        project.is_archived = is_archived;
                    }
                }
                None => debug!("Ignoring update for missing project {}", id),
            },
            OpKind::ProjectDelete { id } => {
                self.projects.remove(id);
                for task in self.tasks.values_mut() {
                    if task.project_id.as_deref() == Some(id.as_str()) {
                        task.project_id = None;
                    }
                }
            }
            OpKind::TagAdd { tag } => {
                self.tags.insert(tag.id.clone(), tag.clone());
            }
            OpKind::TagUpdate { id, changes } => match self.tags.get_mut(id) {
                Some(tag) => {
                    if let Some(title) = &changes.title {
                        tag.title = title.clone();
                    }
                    if let Some(color) = &changes.color {
                        tag.color = Some(color.clone());
                    }
                }
                None => debug!("Ignoring update for missing tag {}", id),
            },
            OpKind::TagDelete { id } => {
                self.tags.remove(id);
                for task in self.tasks.values_mut() {
                    task.tag_ids.retain(|t| t != id);
                }
            }
            OpKind::ConfigUpdate { section, value } => {
                self.config.insert(section.clone(), value.clone());
            }
            OpKind::StateImport { state } => {
                *self = state.clone();
            }
            OpKind::SetCurrentTask { .. } | OpKind::SetSelectedTask { .. } | OpKind::ToggleSideNav => {}
        }
    }

    pub fn to_snapshot(&self, schema_version: u32) -> StateSnapshot {
        StateSnapshot {
            schema_version,
            data: serde_json::to_value(self).unwrap_or(Value::Null),
        }
    }

    /// Interpret a snapshot that is already at the current schema version.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Result<Self, serde_json::Error> {
        serde_json::from_value(snapshot.data.clone())
    }
}

/// Raw, version-tagged state as stored in sync files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub schema_version: u32,
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            ..Task::default()
        }
    }

    fn project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            title: id.to_uppercase(),
            is_archived: false,
        }
    }

    #[test]
    fn test_add_update_delete_task() {
        let mut state = AppState::default();
        state.apply(&OpKind::TaskAdd { task: task("t1", "Draft") });
        state.apply(&OpKind::TaskUpdate {
            id: "t1".into(),
            changes: TaskPatch {
                title: Some("Final".into()),
                is_done: Some(true),
                ..TaskPatch::default()
            },
        });
        assert_eq!(state.tasks["t1"].title, "Final");
        assert!(state.tasks["t1"].is_done);

        state.apply(&OpKind::TaskDelete { id: "t1".into() });
        assert!(state.tasks.is_empty());
    }

    #[test]
    fn test_update_missing_task_is_ignored() {
        let mut state = AppState::default();
        state.apply(&OpKind::TaskUpdate {
            id: "ghost".into(),
            changes: TaskPatch::default(),
        });
        assert!(state.tasks.is_empty());
    }

    #[test]
    fn test_project_delete_detaches_tasks() {
        let mut state = AppState::default();
        state.apply(&OpKind::ProjectAdd { project: project("p1") });
        state.apply(&OpKind::TaskAdd { task: task("t1", "x") });
        state.apply(&OpKind::TaskMoveToProject {
            id: "t1".into(),
            project_id: Some("p1".into()),
        });
        assert_eq!(state.tasks["t1"].project_id.as_deref(), Some("p1"));

        state.apply(&OpKind::ProjectDelete { id: "p1".into() });
        assert_eq!(state.tasks["t1"].project_id, None);
    }

    #[test]
    fn test_move_to_missing_project_clears_project() {
        let mut state = AppState::default();
        state.apply(&OpKind::TaskAdd { task: task("t1", "x") });
        state.apply(&OpKind::TaskMoveToProject {
            id: "t1".into(),
            project_id: Some("gone".into()),
        });
        assert_eq!(state.tasks["t1"].project_id, None);
    }

    #[test]
    fn test_tag_delete_strips_tag_from_tasks() {
        let mut state = AppState::default();
        state.apply(&OpKind::TagAdd {
            tag: Tag {
                id: "urgent".into(),
                title: "Urgent".into(),
                color: None,
            },
        });
        let mut t = task("t1", "x");
        t.tag_ids = vec!["urgent".into(), "home".into()];
        state.apply(&OpKind::TaskAdd { task: t });

        state.apply(&OpKind::TagDelete { id: "urgent".into() });
        assert_eq!(state.tasks["t1"].tag_ids, vec!["home".to_string()]);
    }

    #[test]
    fn test_state_import_replaces_everything() {
        let mut state = AppState::default();
        state.apply(&OpKind::TaskAdd { task: task("old", "x") });

        let mut imported = AppState::default();
        imported.tasks.insert("new".into(), task("new", "y"));
        state.apply(&OpKind::StateImport {
            state: imported.clone(),
        });
        assert_eq!(state, imported);
    }

    #[test]
    fn test_transient_ops_do_not_change_state() {
        let mut state = AppState::default();
        state.apply(&OpKind::SetCurrentTask { id: Some("t1".into()) });
        state.apply(&OpKind::ToggleSideNav);
        assert_eq!(state, AppState::default());
    }

    #[test]
    fn test_snapshot_conversion() {
        let mut state = AppState::default();
        state.apply(&OpKind::TaskAdd { task: task("t1", "x") });
        let snapshot = state.to_snapshot(4);
        assert_eq!(snapshot.schema_version, 4);
        assert_eq!(AppState::from_snapshot(&snapshot).unwrap(), state);
    }
}
