use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{
    Category, DailyRecord, Goal, JournalEntry, JournalTemplate, Operation, Settings,
    SheetOperation, Snapshot, Task, TemplateField, Widget, SETTINGS_ID, SNAPSHOT_VERSION,
};

#[cfg(test)]
mod store_tests;

fn db_path(app_dir: &Path) -> PathBuf {
    app_dir.join("practiceflow.sqlite3")
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

pub fn iso_from_ms(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => String::from("1970-01-01T00:00:00.000Z"),
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS tasks (
  id TEXT PRIMARY KEY,
  ord INTEGER NOT NULL,
  json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_ord ON tasks(ord);

CREATE TABLE IF NOT EXISTS records (
  id TEXT PRIMARY KEY,
  task_id TEXT NOT NULL,
  date TEXT NOT NULL,
  json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_task_date ON records(task_id, date);

CREATE TABLE IF NOT EXISTS goals (
  id TEXT PRIMARY KEY,
  task_id TEXT NOT NULL,
  json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_goals_task ON goals(task_id);

CREATE TABLE IF NOT EXISTS journal_entries (
  id TEXT PRIMARY KEY,
  date TEXT NOT NULL,
  json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_journal_date ON journal_entries(date);

CREATE TABLE IF NOT EXISTS widgets (
  id TEXT PRIMARY KEY,
  json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS journal_templates (
  id TEXT PRIMARY KEY,
  json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
  id TEXT PRIMARY KEY,
  json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
  id TEXT PRIMARY KEY,
  json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cloud_ops (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  op_id TEXT NOT NULL UNIQUE,
  user_id TEXT,
  op_type TEXT NOT NULL,
  payload TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sheet_ops (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  op_id TEXT NOT NULL UNIQUE,
  op_type TEXT NOT NULL,
  payload TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

PRAGMA user_version = 1;
"#,
        )?;
    }

    Ok(())
}

fn default_journal_template() -> JournalTemplate {
    JournalTemplate {
        id: "template-default".to_string(),
        name: "每日省思".to_string(),
        description: Some("快速記錄今日心得、感恩與提醒".to_string()),
        fields: vec![
            TemplateField {
                id: "gratitude".to_string(),
                label: "感恩".to_string(),
                placeholder: Some("感謝的人事物".to_string()),
                required: false,
            },
            TemplateField {
                id: "insight".to_string(),
                label: "心得".to_string(),
                placeholder: Some("今日修行的收穫或調整".to_string()),
                required: true,
            },
            TemplateField {
                id: "reminder".to_string(),
                label: "提醒".to_string(),
                placeholder: Some("明日可優化的重點".to_string()),
                required: false,
            },
        ],
    }
}

fn seed_defaults(conn: &Connection) -> Result<()> {
    if get_settings(conn)?.is_none() {
        put_settings(conn, &Settings::default())?;
    }

    let template_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM journal_templates", [], |row| row.get(0))?;
    if template_count == 0 {
        put_journal_template(conn, &default_journal_template())?;
    }
    Ok(())
}

pub fn open(app_dir: &Path) -> Result<Connection> {
    fs::create_dir_all(app_dir)?;
    let conn = Connection::open(db_path(app_dir))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    migrate(&conn)?;
    seed_defaults(&conn)?;
    Ok(conn)
}

/// All multi-table writes go through here so a concurrently scheduled flush
/// can never observe a partial cascade or a half-imported snapshot.
pub fn run_in_tx<T>(conn: &Connection, f: impl FnOnce() -> Result<T>) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE;")?;
    match f() {
        Ok(value) => {
            conn.execute_batch("COMMIT;")?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK;");
            Err(e)
        }
    }
}

// --- kv ------------------------------------------------------------------

pub fn kv_get_string(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value: Option<String> = conn
        .query_row(r#"SELECT value FROM kv WHERE key = ?1"#, params![key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

pub fn kv_set_string(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"INSERT INTO kv(key, value) VALUES (?1, ?2)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        params![key, value],
    )?;
    Ok(())
}

pub fn kv_get_i64(conn: &Connection, key: &str) -> Result<Option<i64>> {
    Ok(kv_get_string(conn, key)?.and_then(|v| v.parse::<i64>().ok()))
}

pub fn kv_set_i64(conn: &Connection, key: &str, value: i64) -> Result<()> {
    kv_set_string(conn, key, &value.to_string())
}

// --- tasks ---------------------------------------------------------------

pub fn put_task(conn: &Connection, task: &Task) -> Result<()> {
    let json = serde_json::to_string(task)?;
    conn.execute(
        r#"INSERT INTO tasks(id, ord, json) VALUES (?1, ?2, ?3)
           ON CONFLICT(id) DO UPDATE SET ord = excluded.ord, json = excluded.json"#,
        params![task.id, task.order, json],
    )?;
    Ok(())
}

pub fn bulk_put_tasks(conn: &Connection, tasks: &[Task]) -> Result<()> {
    run_in_tx(conn, || {
        for task in tasks {
            put_task(conn, task)?;
        }
        Ok(())
    })
}

pub fn get_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let json: Option<String> = conn
        .query_row(r#"SELECT json FROM tasks WHERE id = ?1"#, params![id], |row| row.get(0))
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(Into::into)).transpose()
}

pub fn list_tasks(conn: &Connection) -> Result<Vec<Task>> {
    collect_json(conn, r#"SELECT json FROM tasks ORDER BY ord ASC, id ASC"#)
}

pub fn task_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub records_deleted: usize,
    pub goals_deleted: usize,
}

/// Deletes a task plus every daily record and goal referencing it, in one
/// transaction. The caller logs the cascade as a single `task.delete` op.
pub fn delete_task_cascade(conn: &Connection, task_id: &str) -> Result<CascadeOutcome> {
    run_in_tx(conn, || {
        let records_deleted =
            conn.execute(r#"DELETE FROM records WHERE task_id = ?1"#, params![task_id])?;
        let goals_deleted =
            conn.execute(r#"DELETE FROM goals WHERE task_id = ?1"#, params![task_id])?;
        conn.execute(r#"DELETE FROM tasks WHERE id = ?1"#, params![task_id])?;
        Ok(CascadeOutcome {
            records_deleted,
            goals_deleted,
        })
    })
}

// --- daily records -------------------------------------------------------

pub fn put_record(conn: &Connection, record: &DailyRecord) -> Result<()> {
    let json = serde_json::to_string(record)?;
    conn.execute(
        r#"INSERT INTO records(id, task_id, date, json) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(id) DO UPDATE SET
             task_id = excluded.task_id, date = excluded.date, json = excluded.json"#,
        params![record.id, record.task_id, record.date, json],
    )?;
    Ok(())
}

pub fn bulk_put_records(conn: &Connection, records: &[DailyRecord]) -> Result<()> {
    run_in_tx(conn, || {
        for record in records {
            put_record(conn, record)?;
        }
        Ok(())
    })
}

pub fn get_record(conn: &Connection, id: &str) -> Result<Option<DailyRecord>> {
    let json: Option<String> = conn
        .query_row(r#"SELECT json FROM records WHERE id = ?1"#, params![id], |row| row.get(0))
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(Into::into)).transpose()
}

pub fn list_records(conn: &Connection) -> Result<Vec<DailyRecord>> {
    collect_json(conn, r#"SELECT json FROM records ORDER BY date ASC, id ASC"#)
}

pub fn delete_record_row(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.execute(r#"DELETE FROM records WHERE id = ?1"#, params![id])? > 0)
}

// --- goals ---------------------------------------------------------------

pub fn put_goal(conn: &Connection, goal: &Goal) -> Result<()> {
    let json = serde_json::to_string(goal)?;
    conn.execute(
        r#"INSERT INTO goals(id, task_id, json) VALUES (?1, ?2, ?3)
           ON CONFLICT(id) DO UPDATE SET task_id = excluded.task_id, json = excluded.json"#,
        params![goal.id, goal.task_id, json],
    )?;
    Ok(())
}

pub fn get_goal(conn: &Connection, id: &str) -> Result<Option<Goal>> {
    let json: Option<String> = conn
        .query_row(r#"SELECT json FROM goals WHERE id = ?1"#, params![id], |row| row.get(0))
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(Into::into)).transpose()
}

pub fn list_goals(conn: &Connection) -> Result<Vec<Goal>> {
    collect_json(conn, r#"SELECT json FROM goals ORDER BY id ASC"#)
}

pub fn delete_goal_row(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.execute(r#"DELETE FROM goals WHERE id = ?1"#, params![id])? > 0)
}

// --- journal -------------------------------------------------------------

pub fn put_journal_entry(conn: &Connection, entry: &JournalEntry) -> Result<()> {
    let json = serde_json::to_string(entry)?;
    conn.execute(
        r#"INSERT INTO journal_entries(id, date, json) VALUES (?1, ?2, ?3)
           ON CONFLICT(id) DO UPDATE SET date = excluded.date, json = excluded.json"#,
        params![entry.id, entry.date, json],
    )?;
    Ok(())
}

pub fn get_journal_entry(conn: &Connection, id: &str) -> Result<Option<JournalEntry>> {
    let json: Option<String> = conn
        .query_row(
            r#"SELECT json FROM journal_entries WHERE id = ?1"#,
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(Into::into)).transpose()
}

pub fn list_journal_entries(conn: &Connection) -> Result<Vec<JournalEntry>> {
    collect_json(conn, r#"SELECT json FROM journal_entries ORDER BY date ASC, id ASC"#)
}

pub fn delete_journal_entry_row(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.execute(r#"DELETE FROM journal_entries WHERE id = ?1"#, params![id])? > 0)
}

// --- widgets / templates / categories ------------------------------------

pub fn list_widgets(conn: &Connection) -> Result<Vec<Widget>> {
    let mut widgets: Vec<Widget> = collect_json(conn, r#"SELECT json FROM widgets"#)?;
    widgets.sort_by_key(|w| w.order);
    Ok(widgets)
}

/// The widget set is replaced wholesale, matching the dashboard editor's
/// "save layout" semantics.
pub fn replace_widgets(conn: &Connection, widgets: &[Widget]) -> Result<()> {
    run_in_tx(conn, || {
        conn.execute(r#"DELETE FROM widgets"#, [])?;
        for widget in widgets {
            let json = serde_json::to_string(widget)?;
            conn.execute(
                r#"INSERT INTO widgets(id, json) VALUES (?1, ?2)"#,
                params![widget.id, json],
            )?;
        }
        Ok(())
    })
}

pub fn put_journal_template(conn: &Connection, template: &JournalTemplate) -> Result<()> {
    let json = serde_json::to_string(template)?;
    conn.execute(
        r#"INSERT INTO journal_templates(id, json) VALUES (?1, ?2)
           ON CONFLICT(id) DO UPDATE SET json = excluded.json"#,
        params![template.id, json],
    )?;
    Ok(())
}

pub fn list_journal_templates(conn: &Connection) -> Result<Vec<JournalTemplate>> {
    collect_json(conn, r#"SELECT json FROM journal_templates ORDER BY id ASC"#)
}

pub fn put_category(conn: &Connection, category: &Category) -> Result<()> {
    let json = serde_json::to_string(category)?;
    conn.execute(
        r#"INSERT INTO categories(id, json) VALUES (?1, ?2)
           ON CONFLICT(id) DO UPDATE SET json = excluded.json"#,
        params![category.id, json],
    )?;
    Ok(())
}

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    collect_json(conn, r#"SELECT json FROM categories ORDER BY id ASC"#)
}

pub fn delete_category_row(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.execute(r#"DELETE FROM categories WHERE id = ?1"#, params![id])? > 0)
}

// --- settings ------------------------------------------------------------

pub fn get_settings(conn: &Connection) -> Result<Option<Settings>> {
    let json: Option<String> = conn
        .query_row(
            r#"SELECT json FROM settings WHERE id = ?1"#,
            params![SETTINGS_ID],
            |row| row.get(0),
        )
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(Into::into)).transpose()
}

pub fn put_settings(conn: &Connection, settings: &Settings) -> Result<()> {
    if settings.id != SETTINGS_ID {
        return Err(anyhow!("settings id must be '{SETTINGS_ID}'"));
    }
    let json = serde_json::to_string(settings)?;
    conn.execute(
        r#"INSERT INTO settings(id, json) VALUES (?1, ?2)
           ON CONFLICT(id) DO UPDATE SET json = excluded.json"#,
        params![settings.id, json],
    )?;
    Ok(())
}

// --- snapshot ------------------------------------------------------------

pub fn export_snapshot(conn: &Connection) -> Result<Snapshot> {
    Ok(Snapshot {
        tasks: list_tasks(conn)?,
        records: list_records(conn)?,
        goals: list_goals(conn)?,
        journal_entries: list_journal_entries(conn)?,
        widgets: list_widgets(conn)?,
        journal_templates: list_journal_templates(conn)?,
        categories: list_categories(conn)?,
        settings: get_settings(conn)?,
        version: SNAPSHOT_VERSION,
    })
}

/// Replaces the entire Entity Store with the snapshot in one transaction.
/// Remote-wins: any local row not present in the snapshot is gone afterward.
pub fn import_snapshot(conn: &Connection, snapshot: &Snapshot) -> Result<()> {
    run_in_tx(conn, || {
        conn.execute_batch(
            r#"
DELETE FROM tasks;
DELETE FROM records;
DELETE FROM goals;
DELETE FROM journal_entries;
DELETE FROM widgets;
DELETE FROM journal_templates;
DELETE FROM categories;
DELETE FROM settings;
"#,
        )?;
        for task in &snapshot.tasks {
            put_task(conn, task)?;
        }
        for record in &snapshot.records {
            put_record(conn, record)?;
        }
        for goal in &snapshot.goals {
            put_goal(conn, goal)?;
        }
        for entry in &snapshot.journal_entries {
            put_journal_entry(conn, entry)?;
        }
        for widget in &snapshot.widgets {
            let json = serde_json::to_string(widget)?;
            conn.execute(
                r#"INSERT INTO widgets(id, json) VALUES (?1, ?2)"#,
                params![widget.id, json],
            )?;
        }
        for template in &snapshot.journal_templates {
            put_journal_template(conn, template)?;
        }
        for category in &snapshot.categories {
            put_category(conn, category)?;
        }
        let settings = snapshot.settings.clone().unwrap_or_default();
        put_settings(conn, &settings)?;
        Ok(())
    })
}

// --- operation logs ------------------------------------------------------

pub fn append_cloud_op(conn: &Connection, op: &Operation) -> Result<()> {
    let payload = serde_json::to_string(&op.payload)?;
    conn.execute(
        r#"INSERT INTO cloud_ops(op_id, user_id, op_type, payload, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
        params![op.id, op.user_id, op.op_type, payload, op.created_at],
    )?;
    Ok(())
}

pub fn list_cloud_ops(conn: &Connection) -> Result<Vec<Operation>> {
    let mut stmt = conn.prepare(
        r#"SELECT op_id, user_id, op_type, payload, created_at
           FROM cloud_ops ORDER BY seq ASC"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let payload: String = row.get(3)?;
        out.push(Operation {
            id: row.get(0)?,
            user_id: row.get(1)?,
            op_type: row.get(2)?,
            payload: serde_json::from_str(&payload)?,
            created_at: row.get(4)?,
        });
    }
    Ok(out)
}

pub fn delete_cloud_ops(conn: &Connection, op_ids: &[String]) -> Result<()> {
    run_in_tx(conn, || {
        for op_id in op_ids {
            conn.execute(r#"DELETE FROM cloud_ops WHERE op_id = ?1"#, params![op_id])?;
        }
        Ok(())
    })
}

pub fn cloud_op_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM cloud_ops", [], |row| row.get(0))?;
    Ok(count as usize)
}

pub fn append_sheet_op(conn: &Connection, op: &SheetOperation) -> Result<()> {
    let payload = serde_json::to_string(&op.payload)?;
    conn.execute(
        r#"INSERT INTO sheet_ops(op_id, op_type, payload, created_at)
           VALUES (?1, ?2, ?3, ?4)"#,
        params![op.id, op.op_type, payload, op.created_at],
    )?;
    Ok(())
}

pub fn list_sheet_ops(conn: &Connection) -> Result<Vec<SheetOperation>> {
    let mut stmt = conn.prepare(
        r#"SELECT op_id, op_type, payload, created_at
           FROM sheet_ops ORDER BY seq ASC"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let payload: String = row.get(2)?;
        out.push(SheetOperation {
            id: row.get(0)?,
            op_type: row.get(1)?,
            payload: serde_json::from_str(&payload)?,
            created_at: row.get(3)?,
        });
    }
    Ok(out)
}

pub fn delete_sheet_ops(conn: &Connection, op_ids: &[String]) -> Result<()> {
    run_in_tx(conn, || {
        for op_id in op_ids {
            conn.execute(r#"DELETE FROM sheet_ops WHERE op_id = ?1"#, params![op_id])?;
        }
        Ok(())
    })
}

pub fn sheet_op_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sheet_ops", [], |row| row.get(0))?;
    Ok(count as usize)
}

fn collect_json<T: serde::de::DeserializeOwned>(conn: &Connection, sql: &str) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let json: String = row.get(0)?;
        out.push(serde_json::from_str(&json)?);
    }
    Ok(out)
}
