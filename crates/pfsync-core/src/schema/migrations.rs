//! The application's schema history, one migration per version step.
//!
//! | step | state | operations |
//! |------|-------|------------|
//! | 1→2 | task `estimate_minutes` → `time_estimate_ms` | same rename in `task_add` / `task_update` |
//! | 2→3 | `lists` → `projects`, task `list_id` → `project_id` | `list_*` → `project_*`, `task_move_to_list` → `task_move_to_project` |
//! | 3→4 | task `done` → `is_done`, `reminder_id` removed | `task_set_reminder` dropped, same renames |
//!
//! Every function here is pure over its single input.

use super::SchemaMigration;
use crate::model::RawOperation;
use serde_json::{Map, Value};

pub(crate) fn builtin_migrations() -> Vec<SchemaMigration> {
    vec![
        SchemaMigration {
            from_version: 1,
            to_version: 2,
            description: "task estimates stored in milliseconds",
            migrate_state: state_v1_to_v2,
            migrate_operation: op_v1_to_v2,
        },
        SchemaMigration {
            from_version: 2,
            to_version: 3,
            description: "lists renamed to projects",
            migrate_state: state_v2_to_v3,
            migrate_operation: op_v2_to_v3,
        },
        SchemaMigration {
            from_version: 3,
            to_version: 4,
            description: "reminders removed from tasks, done renamed to is_done",
            migrate_state: state_v3_to_v4,
            migrate_operation: op_v3_to_v4,
        },
    ]
}

const MS_PER_MINUTE: u64 = 60_000;

fn as_object(data: &mut Value) -> Result<&mut Map<String, Value>, String> {
    data.as_object_mut()
        .ok_or_else(|| "state is not a JSON object".to_string())
}

/// Apply `f` to every task object in `data["tasks"]`, stopping at the first error.
fn for_each_task(
    data: &mut Value,
    mut f: impl FnMut(&mut Map<String, Value>) -> Result<(), String>,
) -> Result<(), String> {
    let root = as_object(data)?;
    let Some(tasks) = root.get_mut("tasks") else {
        return Ok(());
    };
    let tasks = tasks
        .as_object_mut()
        .ok_or_else(|| "tasks is not a JSON object".to_string())?;
    for task in tasks.values_mut() {
        if let Some(task) = task.as_object_mut() {
            f(task)?;
        }
    }
    Ok(())
}

fn rename_key(obj: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = obj.remove(from) {
        obj.insert(to.to_string(), value);
    }
}

/// The object at `payload[key]`, if present.
fn payload_object<'a>(op: &'a mut RawOperation, key: &str) -> Option<&'a mut Map<String, Value>> {
    op.payload.get_mut(key).and_then(Value::as_object_mut)
}

// ---------------------------------------------------------------------------
// 1 → 2
// ---------------------------------------------------------------------------

/// Whole or fractional minutes as milliseconds, rounded to the nearest one.
fn estimate_ms(minutes: &Value) -> Result<u64, String> {
    let invalid = || format!("estimate_minutes {} is not a valid duration", minutes);
    match minutes {
        Value::Null => Ok(0),
        Value::Number(n) => match n.as_u64() {
            Some(whole) => whole.checked_mul(MS_PER_MINUTE).ok_or_else(invalid),
            None => {
                let ms = n.as_f64().ok_or_else(invalid)? * MS_PER_MINUTE as f64;
                if !(0.0..=u64::MAX as f64).contains(&ms) {
                    return Err(invalid());
                }
                Ok(ms.round() as u64)
            }
        },
        _ => Err(invalid()),
    }
}

fn minutes_to_ms(obj: &mut Map<String, Value>) -> Result<(), String> {
    if let Some(minutes) = obj.remove("estimate_minutes") {
        obj.insert("time_estimate_ms".to_string(), Value::from(estimate_ms(&minutes)?));
    }
    Ok(())
}

fn state_v1_to_v2(mut data: Value) -> Result<Value, String> {
    for_each_task(&mut data, minutes_to_ms)?;
    Ok(data)
}

fn op_v1_to_v2(mut op: RawOperation) -> Result<Option<RawOperation>, String> {
    let op_type = op.op_type.clone();
    match op_type.as_str() {
        "task_add" => {
            if let Some(task) = payload_object(&mut op, "task") {
                minutes_to_ms(task)?;
            }
        }
        "task_update" => {
            if let Some(changes) = payload_object(&mut op, "changes") {
                minutes_to_ms(changes)?;
            }
        }
        _ => {}
    }
    Ok(Some(op))
}

// ---------------------------------------------------------------------------
// 2 → 3
// ---------------------------------------------------------------------------

fn state_v2_to_v3(mut data: Value) -> Result<Value, String> {
    rename_key(as_object(&mut data)?, "lists", "projects");
    for_each_task(&mut data, |task| {
        rename_key(task, "list_id", "project_id");
        Ok(())
    })?;
    Ok(data)
}

fn op_v2_to_v3(mut op: RawOperation) -> Result<Option<RawOperation>, String> {
    let op_type = op.op_type.clone();
    match op_type.as_str() {
        "task_add" => {
            if let Some(task) = payload_object(&mut op, "task") {
                rename_key(task, "list_id", "project_id");
            }
        }
        "task_move_to_list" => {
            op.op_type = "task_move_to_project".to_string();
            if let Some(payload) = op.payload.as_object_mut() {
                rename_key(payload, "list_id", "project_id");
            }
        }
        "list_add" => {
            op.op_type = "project_add".to_string();
            if let Some(payload) = op.payload.as_object_mut() {
                rename_key(payload, "list", "project");
            }
        }
        "list_update" => op.op_type = "project_update".to_string(),
        "list_delete" => op.op_type = "project_delete".to_string(),
        _ => {}
    }
    Ok(Some(op))
}

// ---------------------------------------------------------------------------
// 3 → 4
// ---------------------------------------------------------------------------

fn drop_reminder_and_rename_done(obj: &mut Map<String, Value>) -> Result<(), String> {
    obj.remove("reminder_id");
    rename_key(obj, "done", "is_done");
    Ok(())
}

fn state_v3_to_v4(mut data: Value) -> Result<Value, String> {
    for_each_task(&mut data, drop_reminder_and_rename_done)?;
    Ok(data)
}

fn op_v3_to_v4(mut op: RawOperation) -> Result<Option<RawOperation>, String> {
    let op_type = op.op_type.clone();
    match op_type.as_str() {
        "task_set_reminder" => return Ok(None),
        "task_add" => {
            if let Some(task) = payload_object(&mut op, "task") {
                drop_reminder_and_rename_done(task)?;
            }
        }
        "task_update" => {
            if let Some(changes) = payload_object(&mut op, "changes") {
                drop_reminder_and_rename_done(changes)?;
            }
        }
        _ => {}
    }
    Ok(Some(op))
}
