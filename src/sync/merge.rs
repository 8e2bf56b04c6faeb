use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::model::{
    Category, DailyRecord, Goal, JournalEntry, Operation, Settings, Snapshot, Task, Widget,
};

/// Applies a batch of logged operations to a snapshot, strictly in array
/// order. Re-applying the same batch is a no-op with respect to the result,
/// which is what makes the push path's at-least-once retries safe.
pub fn apply_operations(snapshot: &mut Snapshot, operations: &[Operation]) -> Result<()> {
    for op in operations {
        apply_op(snapshot, op)?;
    }
    Ok(())
}

fn apply_op(snapshot: &mut Snapshot, op: &Operation) -> Result<()> {
    match op.op_type.as_str() {
        "task.upsert" => {
            for item in payload_items(&op.payload) {
                let task: Task = parse_entity(item, op)?;
                upsert_by_id(&mut snapshot.tasks, |t| t.id.clone(), task);
            }
        }
        "task.delete" => {
            let task_id = deletion_key(op)?;
            snapshot.tasks.retain(|t| t.id != task_id);
            snapshot.records.retain(|r| r.task_id != task_id);
            snapshot.goals.retain(|g| g.task_id != task_id);
        }
        "record.upsert" => {
            for item in payload_items(&op.payload) {
                let record: DailyRecord = parse_entity(item, op)?;
                upsert_record(&mut snapshot.records, record);
            }
        }
        "record.delete" => {
            let record_id = deletion_key(op)?;
            snapshot.records.retain(|r| r.id != record_id);
        }
        "goal.upsert" => {
            for item in payload_items(&op.payload) {
                let goal: Goal = parse_entity(item, op)?;
                upsert_by_id(&mut snapshot.goals, |g| g.id.clone(), goal);
            }
        }
        "goal.delete" => {
            let goal_id = deletion_key(op)?;
            snapshot.goals.retain(|g| g.id != goal_id);
        }
        "journal.upsert" => {
            for item in payload_items(&op.payload) {
                let entry: JournalEntry = parse_entity(item, op)?;
                upsert_by_id(&mut snapshot.journal_entries, |e| e.id.clone(), entry);
            }
        }
        "journal.delete" => {
            let entry_id = deletion_key(op)?;
            snapshot.journal_entries.retain(|e| e.id != entry_id);
        }
        "widget.upsert" => {
            for item in payload_items(&op.payload) {
                let widget: Widget = parse_entity(item, op)?;
                upsert_by_id(&mut snapshot.widgets, |w| w.id.clone(), widget);
            }
        }
        "category.upsert" => {
            for item in payload_items(&op.payload) {
                let category: Category = parse_entity(item, op)?;
                upsert_by_id(&mut snapshot.categories, |c| c.id.clone(), category);
            }
        }
        "category.delete" => {
            let category_id = deletion_key(op)?;
            snapshot.categories.retain(|c| c.id != category_id);
        }
        "settings.update" => {
            // Last writer wins on the whole object, never per field.
            let settings: Settings = parse_entity(&op.payload, op)?;
            snapshot.settings = Some(settings);
        }
        // Unknown types are skipped so older clients can keep pushing into a
        // store that has since learned new ones.
        _ => {}
    }
    Ok(())
}

fn payload_items(payload: &Value) -> Vec<&Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn parse_entity<T: serde::de::DeserializeOwned>(item: &Value, op: &Operation) -> Result<T> {
    serde_json::from_value(item.clone())
        .map_err(|e| anyhow!("invalid {} payload in op {}: {e}", op.op_type, op.id))
}

fn deletion_key(op: &Operation) -> Result<String> {
    op.payload["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{} op {} missing payload id", op.op_type, op.id))
}

/// Replace-by-id if present, else append. Later ops in a batch overwrite
/// earlier ones for the same id.
fn upsert_by_id<T>(items: &mut Vec<T>, id_of: impl Fn(&T) -> String, next: T) {
    let next_id = id_of(&next);
    if let Some(slot) = items.iter_mut().find(|item| id_of(item) == next_id) {
        *slot = next;
    } else {
        items.push(next);
    }
}

/// Records dedupe on the (task id, date) composite key rather than the row
/// id, which is what collapses duplicate day entries during merges.
fn upsert_record(records: &mut Vec<DailyRecord>, next: DailyRecord) {
    if let Some(slot) = records
        .iter_mut()
        .find(|r| r.task_id == next.task_id && r.date == next.date)
    {
        *slot = next;
    } else {
        records.push(next);
    }
}
