use std::collections::BTreeSet;

use anyhow::Result;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, warn};

use crate::db;
use crate::lifecycle::{Notice, Notifier};
use crate::model::{SheetConfig, SheetOperation};
use crate::sync::{is_unavailable, unavailable};

pub mod applier;
pub mod http;

use applier::SheetsApi;

/// Access-token resolution plus the set of linked destinations. The journal
/// appliers write to their own destination set, so the two lists are
/// separate even when a host backs them with one table.
pub trait SheetDirectory {
    fn access_token(&self) -> Result<Option<String>>;
    fn sheet_destinations(&self) -> Result<Vec<SheetConfig>>;
    fn journal_destinations(&self) -> Result<Vec<SheetConfig>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SheetFlushOutcome {
    pub destinations: usize,
    /// Filtered operations handed to appliers, summed over destinations.
    pub dispatched: usize,
    /// Log entries removed after every destination succeeded.
    pub cleared: usize,
}

fn is_journal_op(op: &SheetOperation) -> bool {
    op.op_type.starts_with("journal")
}

fn referenced_task_ids(op: &SheetOperation) -> Vec<Option<String>> {
    let key = if op.op_type.starts_with("task.") {
        "id"
    } else {
        "taskId"
    };
    let items: Vec<&Value> = match &op.payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| item.get(key).and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// A destination gets an operation when any payload element references a
/// task id it tracks; elements carrying no task id pass unconditionally.
pub fn op_matches_destination(op: &SheetOperation, tracked_task_ids: &BTreeSet<String>) -> bool {
    referenced_task_ids(op).iter().any(|task_id| match task_id {
        Some(id) => tracked_task_ids.contains(id),
        None => true,
    })
}

/// Drains the task/record half of the spreadsheet log: every linked sheet
/// destination must accept its filtered batch before anything is cleared.
/// The first failing destination aborts the whole cycle.
pub fn flush_sheet_ops(
    conn: &Connection,
    directory: &dyn SheetDirectory,
    api: &dyn SheetsApi,
    notifier: &dyn Notifier,
) -> Result<SheetFlushOutcome> {
    let ops: Vec<SheetOperation> = db::list_sheet_ops(conn)?
        .into_iter()
        .filter(|op| !is_journal_op(op))
        .collect();
    run_flush(conn, directory, api, notifier, ops, false)
}

/// Drains the journal half of the spreadsheet log against the journal
/// destination set. Kept as a distinct filter over the same log so the two
/// appliers never double-process or clear each other's entries.
pub fn flush_journal_ops(
    conn: &Connection,
    directory: &dyn SheetDirectory,
    api: &dyn SheetsApi,
    notifier: &dyn Notifier,
) -> Result<SheetFlushOutcome> {
    let ops: Vec<SheetOperation> = db::list_sheet_ops(conn)?
        .into_iter()
        .filter(is_journal_op)
        .collect();
    run_flush(conn, directory, api, notifier, ops, true)
}

fn run_flush(
    conn: &Connection,
    directory: &dyn SheetDirectory,
    api: &dyn SheetsApi,
    notifier: &dyn Notifier,
    ops: Vec<SheetOperation>,
    journal: bool,
) -> Result<SheetFlushOutcome> {
    let Some(token) = directory.access_token()? else {
        return Err(unavailable("no spreadsheet access token"));
    };

    let destinations = if journal {
        directory.journal_destinations()?
    } else {
        directory.sheet_destinations()?
    };
    let mut outcome = SheetFlushOutcome {
        destinations: destinations.len(),
        ..SheetFlushOutcome::default()
    };
    // Nothing linked: keep the queue, a destination may appear later.
    if destinations.is_empty() || ops.is_empty() {
        return Ok(outcome);
    }

    for destination in &destinations {
        let tracked: BTreeSet<String> = destination.task_ids.iter().cloned().collect();
        let filtered: Vec<SheetOperation> = ops
            .iter()
            .filter(|op| op_matches_destination(op, &tracked))
            .cloned()
            .collect();
        if filtered.is_empty() {
            continue;
        }

        let applied = if journal {
            applier::apply_journal_operations(api, &token, &destination.spreadsheet_id, &filtered)
        } else {
            applier::apply_sheet_operations(
                api,
                &token,
                &destination.spreadsheet_id,
                &tracked,
                &filtered,
            )
        };
        if let Err(e) = applied {
            // Strict all-or-nothing: no partial clears, remaining
            // destinations are skipped, the whole batch retries next cycle.
            if !is_unavailable(&e) {
                notifier.notify(&Notice::SheetSyncFailed {
                    message: format!("{e:#}"),
                });
            }
            return Err(e);
        }
        outcome.dispatched += filtered.len();
    }

    let op_ids: Vec<String> = ops.iter().map(|op| op.id.clone()).collect();
    db::delete_sheet_ops(conn, &op_ids)?;
    outcome.cleared = op_ids.len();
    notifier.notify(&Notice::SheetSyncSucceeded {
        destinations: destinations.len(),
        operations: outcome.cleared,
    });
    Ok(outcome)
}

/// Scheduled-cycle wrapper: unavailable destinations are silent, real
/// failures are logged, nothing propagates.
pub fn flush_sheet_ops_scheduled(
    conn: &Connection,
    directory: &dyn SheetDirectory,
    api: &dyn SheetsApi,
    notifier: &dyn Notifier,
) {
    match flush_sheet_ops(conn, directory, api, notifier) {
        Ok(outcome) => debug!(
            destinations = outcome.destinations,
            cleared = outcome.cleared,
            "sheet flush finished"
        ),
        Err(e) if is_unavailable(&e) => debug!("sheet flush skipped: {e}"),
        Err(e) => warn!("sheet flush failed: {e:#}"),
    }
}

pub fn flush_journal_ops_scheduled(
    conn: &Connection,
    directory: &dyn SheetDirectory,
    api: &dyn SheetsApi,
    notifier: &dyn Notifier,
) {
    match flush_journal_ops(conn, directory, api, notifier) {
        Ok(outcome) => debug!(
            destinations = outcome.destinations,
            cleared = outcome.cleared,
            "journal flush finished"
        ),
        Err(e) if is_unavailable(&e) => debug!("journal flush skipped: {e}"),
        Err(e) => warn!("journal flush failed: {e:#}"),
    }
}
