use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rand::Rng;
use rusqlite::Connection;
use serde_json::json;
use tracing::{debug, warn};

use crate::db;
use crate::lifecycle::Scheduler;
use crate::model::{
    create_id, record_key, AppearanceSettings, Attachment, Category, DailyRecord, Goal, GoalMode,
    JournalEntry, Mood, Operation, ReminderRule, ReminderSettings, Settings, SheetOperation,
    SyncSettings, Task, Widget,
};

pub mod cloud;
pub mod merge;

use cloud::{CloudBackend, KeepaliveSender};

/// Cloud pushes are cut into fixed-size batches to bound payload size.
pub const PUSH_BATCH_SIZE: usize = 200;
/// Per-batch retry delays; the batch fails for the cycle once they run out.
pub const PUSH_BACKOFF_MS: [u64; 3] = [1_000, 2_000, 4_000];

const DEFAULT_COLOR_PALETTE: [&str; 6] = [
    "#0284c7", "#ca8a04", "#22c55e", "#a855f7", "#fb7185", "#f97316",
];

/// Marker error for the unavailable-destination class: no network, no auth,
/// collaborator unreachable. Cycles that hit it abort silently and leave the
/// queue untouched; callers test with `err.is::<Unavailable>()`.
#[derive(Debug)]
pub struct Unavailable {
    pub reason: String,
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "destination unavailable: {}", self.reason)
    }
}

impl std::error::Error for Unavailable {}

pub fn unavailable(reason: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(Unavailable {
        reason: reason.into(),
    })
}

pub fn is_unavailable(err: &anyhow::Error) -> bool {
    err.is::<Unavailable>()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Operations confirmed by the merge endpoint and cleared from the log.
    pub pushed: usize,
    /// A remote snapshot replaced the local store.
    pub pulled: bool,
    /// No remote snapshot existed; the local one was uploaded wholesale.
    pub bootstrapped: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Nothing queued.
    Clean,
    /// A best-effort dispatch was accepted; the log stays queued and is
    /// re-pushed next launch (the merge step is idempotent).
    Dispatched(usize),
    /// Dispatch was impossible and operations remain — the host should warn
    /// the user they are leaving with unsynced data.
    WarnUnsynced(usize),
}

// --- mutation inputs -----------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct TaskInput {
    pub id: Option<String>,
    pub name: String,
    pub category: String,
    pub color: Option<String>,
    pub is_active: Option<bool>,
    pub allow_reminder: Option<bool>,
    pub include_in_dashboard: Option<bool>,
    pub order: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub is_active: Option<bool>,
    pub allow_reminder: Option<bool>,
    pub include_in_dashboard: Option<bool>,
    pub order: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct RecordInput {
    pub task_id: String,
    pub date: String,
    pub count: i64,
    pub note: Option<String>,
}

#[derive(Clone, Debug)]
pub struct GoalInput {
    pub id: Option<String>,
    pub task_id: String,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub target_count: i64,
    pub mode: GoalMode,
    pub weekend_multiplier: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct GoalPatch {
    pub name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub target_count: Option<i64>,
    pub mode: Option<GoalMode>,
    pub weekend_multiplier: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct JournalInput {
    pub id: Option<String>,
    pub date: String,
    pub content: String,
    pub mood: Option<Mood>,
    pub tags: Vec<String>,
    pub pin: bool,
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Debug, Default)]
pub struct JournalPatch {
    pub date: Option<String>,
    pub content: Option<String>,
    pub mood: Option<Mood>,
    pub tags: Option<Vec<String>>,
    pub pin: Option<bool>,
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Clone, Debug, Default)]
pub struct SettingsPatch {
    pub appearance: Option<AppearanceSettings>,
    pub reminder: Option<ReminderSettings>,
    pub sync: Option<SyncSettings>,
    pub onboarding_completed: Option<bool>,
}

// --- coordinator ---------------------------------------------------------

/// Owns the Entity Store and both operation logs. Every local mutation goes
/// through here: it writes the store, appends to the logs, and arms the
/// scheduler's debounce — all before returning, so a concurrently scheduled
/// flush can never observe the store and the logs out of step.
pub struct Coordinator {
    conn: Connection,
    scheduler: Scheduler,
    status: SyncStatus,
    user_id: Option<String>,
    backoff_ms: Vec<u64>,
}

impl Coordinator {
    pub fn open(app_dir: &Path) -> Result<Self> {
        let conn = db::open(app_dir)?;
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            scheduler: Scheduler::new(db::now_ms()),
            status: SyncStatus::Idle,
            user_id: None,
            backoff_ms: PUSH_BACKOFF_MS.to_vec(),
        }
    }

    pub fn set_user(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }

    /// Overrides the per-batch retry delays. Tests pass an empty table to
    /// fail fast instead of sleeping through the real backoff.
    pub fn set_backoff_ms(&mut self, backoff_ms: Vec<u64>) {
        self.backoff_ms = backoff_ms;
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    // --- tasks -----------------------------------------------------------

    pub fn add_task(&mut self, input: TaskInput) -> Result<Task> {
        if input.name.trim().is_empty() {
            return Err(anyhow!("task name must not be empty"));
        }
        let now = db::now_ms();
        let order = match input.order {
            Some(order) => order,
            None => db::task_count(&self.conn)?,
        };
        let task = Task {
            id: input.id.unwrap_or_else(|| create_id("task")),
            name: input.name,
            category: input.category,
            color: input.color.unwrap_or_else(default_task_color),
            is_active: input.is_active.unwrap_or(true),
            allow_reminder: input.allow_reminder.unwrap_or(true),
            include_in_dashboard: input.include_in_dashboard.unwrap_or(true),
            order,
        };
        db::put_task(&self.conn, &task)?;
        let payload = serde_json::to_value(&task)?;
        self.log_cloud_op("task.upsert", payload.clone(), now)?;
        self.log_sheet_op("task.upsert", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(task)
    }

    pub fn update_task(&mut self, id: &str, patch: TaskPatch) -> Result<Task> {
        let now = db::now_ms();
        let mut task =
            db::get_task(&self.conn, id)?.ok_or_else(|| anyhow!("task not found: {id}"))?;
        if let Some(name) = patch.name {
            task.name = name;
        }
        if let Some(category) = patch.category {
            task.category = category;
        }
        if let Some(color) = patch.color {
            task.color = color;
        }
        if let Some(is_active) = patch.is_active {
            task.is_active = is_active;
        }
        if let Some(allow_reminder) = patch.allow_reminder {
            task.allow_reminder = allow_reminder;
        }
        if let Some(include_in_dashboard) = patch.include_in_dashboard {
            task.include_in_dashboard = include_in_dashboard;
        }
        if let Some(order) = patch.order {
            task.order = order;
        }
        db::put_task(&self.conn, &task)?;
        // Patches never reach the log: the logged payload is always the full
        // post-patch entity.
        let payload = serde_json::to_value(&task)?;
        self.log_cloud_op("task.upsert", payload.clone(), now)?;
        self.log_sheet_op("task.upsert", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(task)
    }

    /// Rewrites the display order of all tasks in one batched upsert.
    pub fn reorder_tasks(&mut self, ids: &[String]) -> Result<Vec<Task>> {
        let now = db::now_ms();
        let mut updated = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().enumerate() {
            let mut task =
                db::get_task(&self.conn, id)?.ok_or_else(|| anyhow!("task not found: {id}"))?;
            task.order = index as i64;
            updated.push(task);
        }
        db::bulk_put_tasks(&self.conn, &updated)?;
        let payload = serde_json::to_value(&updated)?;
        self.log_cloud_op("task.upsert", payload.clone(), now)?;
        self.log_sheet_op("task.upsert", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(updated)
    }

    /// Deletes a task and everything referencing it, locally in one
    /// transaction, remotely as exactly one `task.delete` operation —
    /// destinations run the same cascade on their side.
    pub fn delete_task(&mut self, id: &str) -> Result<db::CascadeOutcome> {
        let now = db::now_ms();
        if db::get_task(&self.conn, id)?.is_none() {
            return Err(anyhow!("task not found: {id}"));
        }
        let outcome = db::delete_task_cascade(&self.conn, id)?;
        let payload = json!({ "id": id });
        self.log_cloud_op("task.delete", payload.clone(), now)?;
        self.log_sheet_op("task.delete", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(outcome)
    }

    // --- daily records ---------------------------------------------------

    pub fn upsert_record(&mut self, input: RecordInput) -> Result<DailyRecord> {
        let now = db::now_ms();
        let record = self.normalize_record(input, now)?;
        db::put_record(&self.conn, &record)?;
        let payload = serde_json::to_value(&record)?;
        self.log_cloud_op("record.upsert", payload.clone(), now)?;
        self.log_sheet_op("record.upsert", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(record)
    }

    /// One array-payload upsert covering many records at once — "apply
    /// yesterday's values to all tasks" is a single logged operation.
    pub fn bulk_upsert_records(&mut self, inputs: Vec<RecordInput>) -> Result<Vec<DailyRecord>> {
        let now = db::now_ms();
        let mut records = Vec::with_capacity(inputs.len());
        for input in inputs {
            records.push(self.normalize_record(input, now)?);
        }
        db::bulk_put_records(&self.conn, &records)?;
        let payload = serde_json::to_value(&records)?;
        self.log_cloud_op("record.upsert", payload.clone(), now)?;
        self.log_sheet_op("record.upsert", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(records)
    }

    pub fn delete_record(&mut self, task_id: &str, date: &str) -> Result<bool> {
        let now = db::now_ms();
        let id = record_key(task_id, date);
        let Some(record) = db::get_record(&self.conn, &id)? else {
            return Ok(false);
        };
        db::delete_record_row(&self.conn, &id)?;
        // Deletes carry the full record: destinations need the task id and
        // date to clear the right cell.
        let payload = serde_json::to_value(&record)?;
        self.log_cloud_op("record.delete", payload.clone(), now)?;
        self.log_sheet_op("record.delete", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(true)
    }

    fn normalize_record(&self, input: RecordInput, now: i64) -> Result<DailyRecord> {
        NaiveDate::parse_from_str(&input.date, "%Y-%m-%d")
            .map_err(|_| anyhow!("invalid record date: {}", input.date))?;
        Ok(DailyRecord {
            id: record_key(&input.task_id, &input.date),
            date: input.date,
            task_id: input.task_id,
            count: input.count,
            note: input.note,
            last_modified: db::iso_from_ms(now),
        })
    }

    // --- goals -----------------------------------------------------------

    pub fn add_goal(&mut self, input: GoalInput) -> Result<Goal> {
        let now = db::now_ms();
        let goal = Goal {
            id: input.id.unwrap_or_else(|| create_id("goal")),
            task_id: input.task_id,
            name: input.name,
            start_date: input.start_date,
            end_date: input.end_date,
            target_count: input.target_count,
            mode: input.mode,
            weekend_multiplier: input.weekend_multiplier,
            created_at: db::iso_from_ms(now),
        };
        db::put_goal(&self.conn, &goal)?;
        self.log_cloud_op("goal.upsert", serde_json::to_value(&goal)?, now)?;
        self.scheduler.note_mutation(now, false);
        Ok(goal)
    }

    pub fn update_goal(&mut self, id: &str, patch: GoalPatch) -> Result<Goal> {
        let now = db::now_ms();
        let mut goal =
            db::get_goal(&self.conn, id)?.ok_or_else(|| anyhow!("goal not found: {id}"))?;
        if let Some(name) = patch.name {
            goal.name = name;
        }
        if let Some(start_date) = patch.start_date {
            goal.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            goal.end_date = end_date;
        }
        if let Some(target_count) = patch.target_count {
            goal.target_count = target_count;
        }
        if let Some(mode) = patch.mode {
            goal.mode = mode;
        }
        if let Some(multiplier) = patch.weekend_multiplier {
            goal.weekend_multiplier = Some(multiplier);
        }
        db::put_goal(&self.conn, &goal)?;
        self.log_cloud_op("goal.upsert", serde_json::to_value(&goal)?, now)?;
        self.scheduler.note_mutation(now, false);
        Ok(goal)
    }

    pub fn delete_goal(&mut self, id: &str) -> Result<bool> {
        let now = db::now_ms();
        if !db::delete_goal_row(&self.conn, id)? {
            return Ok(false);
        }
        self.log_cloud_op("goal.delete", json!({ "id": id }), now)?;
        self.scheduler.note_mutation(now, false);
        Ok(true)
    }

    // --- journal ---------------------------------------------------------

    pub fn add_journal_entry(&mut self, input: JournalInput) -> Result<JournalEntry> {
        let now = db::now_ms();
        let stamp = db::iso_from_ms(now);
        let entry = JournalEntry {
            id: input.id.unwrap_or_else(|| create_id("journal")),
            date: input.date,
            content: input.content,
            mood: input.mood,
            tags: input.tags,
            pin: input.pin,
            attachments: input.attachments,
            created_at: stamp.clone(),
            updated_at: stamp,
        };
        db::put_journal_entry(&self.conn, &entry)?;
        let payload = serde_json::to_value(&entry)?;
        self.log_cloud_op("journal.upsert", payload.clone(), now)?;
        self.log_sheet_op("journal.upsert", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(entry)
    }

    pub fn update_journal_entry(&mut self, id: &str, patch: JournalPatch) -> Result<JournalEntry> {
        let now = db::now_ms();
        let mut entry = db::get_journal_entry(&self.conn, id)?
            .ok_or_else(|| anyhow!("journal entry not found: {id}"))?;
        if let Some(date) = patch.date {
            entry.date = date;
        }
        if let Some(content) = patch.content {
            entry.content = content;
        }
        if let Some(mood) = patch.mood {
            entry.mood = Some(mood);
        }
        if let Some(tags) = patch.tags {
            entry.tags = tags;
        }
        if let Some(pin) = patch.pin {
            entry.pin = pin;
        }
        if let Some(attachments) = patch.attachments {
            entry.attachments = attachments;
        }
        entry.updated_at = db::iso_from_ms(now);
        db::put_journal_entry(&self.conn, &entry)?;
        let payload = serde_json::to_value(&entry)?;
        self.log_cloud_op("journal.upsert", payload.clone(), now)?;
        self.log_sheet_op("journal.upsert", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(entry)
    }

    pub fn delete_journal_entry(&mut self, id: &str) -> Result<bool> {
        let now = db::now_ms();
        let Some(entry) = db::get_journal_entry(&self.conn, id)? else {
            return Ok(false);
        };
        db::delete_journal_entry_row(&self.conn, id)?;
        let payload = serde_json::to_value(&entry)?;
        self.log_cloud_op("journal.delete", payload.clone(), now)?;
        self.log_sheet_op("journal.delete", payload, now)?;
        self.scheduler.note_mutation(now, true);
        Ok(true)
    }

    // --- widgets / categories / settings ---------------------------------

    pub fn set_widgets(&mut self, widgets: Vec<Widget>) -> Result<()> {
        let now = db::now_ms();
        db::replace_widgets(&self.conn, &widgets)?;
        self.log_cloud_op("widget.upsert", serde_json::to_value(&widgets)?, now)?;
        self.scheduler.note_mutation(now, false);
        Ok(())
    }

    pub fn add_category(&mut self, name: &str) -> Result<Category> {
        let now = db::now_ms();
        let category = Category {
            id: create_id("category"),
            name: name.to_string(),
            created_at: db::iso_from_ms(now),
        };
        db::put_category(&self.conn, &category)?;
        self.log_cloud_op("category.upsert", serde_json::to_value(&category)?, now)?;
        self.scheduler.note_mutation(now, false);
        Ok(category)
    }

    pub fn delete_category(&mut self, id: &str) -> Result<bool> {
        let now = db::now_ms();
        if !db::delete_category_row(&self.conn, id)? {
            return Ok(false);
        }
        self.log_cloud_op("category.delete", json!({ "id": id }), now)?;
        self.scheduler.note_mutation(now, false);
        Ok(true)
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) -> Result<Settings> {
        let now = db::now_ms();
        let mut settings = db::get_settings(&self.conn)?.unwrap_or_default();
        if let Some(appearance) = patch.appearance {
            settings.appearance = appearance;
        }
        if let Some(reminder) = patch.reminder {
            settings.reminder = reminder;
        }
        if let Some(sync) = patch.sync {
            settings.sync = sync;
        }
        if let Some(onboarding_completed) = patch.onboarding_completed {
            settings.onboarding_completed = onboarding_completed;
        }
        db::put_settings(&self.conn, &settings)?;
        self.log_cloud_op("settings.update", serde_json::to_value(&settings)?, now)?;
        self.scheduler.note_mutation(now, false);
        Ok(settings)
    }

    pub fn update_reminder_rules(&mut self, rules: Vec<ReminderRule>) -> Result<Settings> {
        let now = db::now_ms();
        let mut settings = db::get_settings(&self.conn)?.unwrap_or_default();
        settings.reminder.rules = rules;
        db::put_settings(&self.conn, &settings)?;
        self.log_cloud_op("settings.update", serde_json::to_value(&settings)?, now)?;
        self.scheduler.note_mutation(now, false);
        Ok(settings)
    }

    // --- flush cycles ----------------------------------------------------

    /// Explicit, immediately-invoked flush. `push` drains the cloud log in
    /// order; `pull` replaces the local store with the remote snapshot
    /// (remote wins), or uploads the local snapshot wholesale when no remote
    /// copy exists yet.
    pub fn sync_now(
        &mut self,
        backend: &dyn CloudBackend,
        push: bool,
        pull: bool,
    ) -> Result<SyncReport> {
        let Some(user_id) = self.user_id.clone() else {
            return Err(unavailable("no signed-in user"));
        };

        self.status = SyncStatus::Syncing;
        match self.run_cycle(backend, &user_id, push, pull) {
            Ok(report) => {
                self.status = SyncStatus::Idle;
                self.record_sync_success()?;
                Ok(report)
            }
            Err(e) => {
                if is_unavailable(&e) {
                    // Not an error state: the destination was unreachable,
                    // the queue is intact, the next trigger retries.
                    self.status = SyncStatus::Idle;
                } else {
                    self.status = SyncStatus::Error;
                    if let Err(record_err) = self.record_sync_error(&e) {
                        warn!("failed to record sync error: {record_err:#}");
                    }
                }
                Err(e)
            }
        }
    }

    /// Scheduled-flush wrapper: failures become observable state plus a log
    /// line, never a panic or an error for the caller.
    pub fn flush_scheduled(&mut self, backend: &dyn CloudBackend, push: bool, pull: bool) {
        match self.sync_now(backend, push, pull) {
            Ok(report) => {
                debug!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    bootstrapped = report.bootstrapped,
                    "cloud sync cycle finished"
                );
            }
            Err(e) if is_unavailable(&e) => debug!("cloud sync skipped: {e}"),
            Err(e) => warn!("cloud sync failed: {e:#}"),
        }
    }

    fn run_cycle(
        &mut self,
        backend: &dyn CloudBackend,
        user_id: &str,
        push: bool,
        pull: bool,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        if push {
            report.pushed = self.push_cloud_ops(backend, user_id)?;
        }

        if pull {
            match backend.fetch_snapshot(user_id)? {
                Some(remote) => {
                    let local = db::export_snapshot(&self.conn)?;
                    warn!(
                        local_tasks = local.tasks.len(),
                        local_records = local.records.len(),
                        remote_updated_at = remote.updated_at.as_str(),
                        "remote snapshot replaces local store"
                    );
                    db::import_snapshot(&self.conn, &remote.snapshot)?;
                    report.pulled = true;
                }
                None => {
                    let snapshot = db::export_snapshot(&self.conn)?;
                    backend.upsert_snapshot(user_id, &snapshot)?;
                    report.bootstrapped = true;
                }
            }
        }

        Ok(report)
    }

    fn push_cloud_ops(&self, backend: &dyn CloudBackend, user_id: &str) -> Result<usize> {
        let ops = db::list_cloud_ops(&self.conn)?;
        if ops.is_empty() {
            return Ok(0);
        }

        for batch in ops.chunks(PUSH_BATCH_SIZE) {
            self.push_batch_with_retry(backend, user_id, batch)?;
        }

        // Cleared only now: a failure above leaves every batch of the cycle
        // queued, including ones the server already accepted. At-least-once,
        // made safe by the idempotent merge.
        let op_ids: Vec<String> = ops.iter().map(|op| op.id.clone()).collect();
        db::delete_cloud_ops(&self.conn, &op_ids)?;
        Ok(ops.len())
    }

    fn push_batch_with_retry(
        &self,
        backend: &dyn CloudBackend,
        user_id: &str,
        batch: &[Operation],
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            let failure = match backend.push_operations(user_id, batch) {
                Ok(ack) if ack.success => return Ok(()),
                Ok(ack) => anyhow!(
                    "cloud merge rejected batch: {}",
                    ack.message.unwrap_or_else(|| "no message".to_string())
                ),
                // Retrying against a dead network just burns the backoff.
                Err(e) if is_unavailable(&e) => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.backoff_ms.len() {
                return Err(failure);
            }
            let delay = self.backoff_ms[attempt];
            debug!(attempt, delay_ms = delay, "retrying cloud batch: {failure:#}");
            thread::sleep(Duration::from_millis(delay));
            attempt += 1;
        }
    }

    /// Last-chance flush at page teardown. Never clears the log.
    pub fn teardown_flush(&self, sender: Option<&dyn KeepaliveSender>) -> Result<TeardownOutcome> {
        let ops = db::list_cloud_ops(&self.conn)?;
        if ops.is_empty() {
            return Ok(TeardownOutcome::Clean);
        }
        if let (Some(user_id), Some(sender)) = (self.user_id.as_deref(), sender) {
            if sender.send(user_id, &ops) {
                return Ok(TeardownOutcome::Dispatched(ops.len()));
            }
        }
        Ok(TeardownOutcome::WarnUnsynced(ops.len()))
    }

    // --- bookkeeping -----------------------------------------------------

    fn record_sync_success(&self) -> Result<()> {
        let mut settings = db::get_settings(&self.conn)?.unwrap_or_default();
        settings.sync.last_synced_at = Some(db::iso_from_ms(db::now_ms()));
        settings.sync.last_error = None;
        // Status bookkeeping is local-only; it must not re-enter the log.
        db::put_settings(&self.conn, &settings)
    }

    fn record_sync_error(&self, err: &anyhow::Error) -> Result<()> {
        let mut settings = db::get_settings(&self.conn)?.unwrap_or_default();
        settings.sync.last_error = Some(format!("{err:#}"));
        db::put_settings(&self.conn, &settings)
    }

    fn log_cloud_op(&self, op_type: &str, payload: serde_json::Value, now: i64) -> Result<()> {
        db::append_cloud_op(
            &self.conn,
            &Operation {
                id: create_id("op"),
                user_id: self.user_id.clone(),
                op_type: op_type.to_string(),
                payload,
                created_at: db::iso_from_ms(now),
            },
        )
    }

    fn log_sheet_op(&self, op_type: &str, payload: serde_json::Value, now: i64) -> Result<()> {
        db::append_sheet_op(
            &self.conn,
            &SheetOperation {
                id: create_id("sop"),
                op_type: op_type.to_string(),
                payload,
                created_at: db::iso_from_ms(now),
            },
        )
    }
}

fn default_task_color() -> String {
    let index = rand::thread_rng().gen_range(0..DEFAULT_COLOR_PALETTE.len());
    DEFAULT_COLOR_PALETTE[index].to_string()
}
