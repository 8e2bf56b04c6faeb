use tempfile::tempdir;

use super::*;
use crate::model::{record_key, GoalMode};

fn task(id: &str, ord: i64) -> Task {
    Task {
        id: id.to_string(),
        name: format!("task {id}"),
        category: "morning".to_string(),
        color: "#0284c7".to_string(),
        is_active: true,
        allow_reminder: true,
        include_in_dashboard: true,
        order: ord,
    }
}

fn record(task_id: &str, date: &str, count: i64) -> DailyRecord {
    DailyRecord {
        id: record_key(task_id, date),
        date: date.to_string(),
        task_id: task_id.to_string(),
        count,
        note: None,
        last_modified: iso_from_ms(0),
    }
}

fn goal(id: &str, task_id: &str) -> Goal {
    Goal {
        id: id.to_string(),
        task_id: task_id.to_string(),
        name: format!("goal {id}"),
        start_date: "2024-05-01".to_string(),
        end_date: "2024-05-31".to_string(),
        target_count: 100,
        mode: GoalMode::Total,
        weekend_multiplier: None,
        created_at: iso_from_ms(0),
    }
}

#[test]
fn open_enables_wal() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("read journal_mode");
    assert_eq!(journal_mode.to_lowercase(), "wal");
}

#[test]
fn open_seeds_default_settings_and_template() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    let settings = get_settings(&conn).expect("settings").expect("seeded");
    assert_eq!(settings.id, SETTINGS_ID);
    assert!(!settings.sync.enable_sync);

    let templates = list_journal_templates(&conn).expect("templates");
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].id, "template-default");

    // Reopening must not duplicate the seed.
    drop(conn);
    let conn = open(dir.path()).expect("reopen");
    assert_eq!(list_journal_templates(&conn).expect("templates").len(), 1);
}

#[test]
fn tasks_list_in_display_order() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    put_task(&conn, &task("t-b", 1)).expect("put");
    put_task(&conn, &task("t-a", 0)).expect("put");
    put_task(&conn, &task("t-c", 2)).expect("put");

    let ids: Vec<String> = list_tasks(&conn).expect("list").into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["t-a", "t-b", "t-c"]);
    assert_eq!(task_count(&conn).expect("count"), 3);
}

#[test]
fn record_put_is_keyed_by_composite_id() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    put_record(&conn, &record("t1", "2024-05-01", 1)).expect("put");
    put_record(&conn, &record("t1", "2024-05-01", 2)).expect("put");

    let records = list_records(&conn).expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "t1-2024-05-01");
    assert_eq!(records[0].count, 2);
}

#[test]
fn delete_task_cascade_removes_dependents_only() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    put_task(&conn, &task("t1", 0)).expect("put");
    put_task(&conn, &task("t2", 1)).expect("put");
    put_record(&conn, &record("t1", "2024-05-01", 1)).expect("put");
    put_record(&conn, &record("t1", "2024-05-02", 2)).expect("put");
    put_record(&conn, &record("t2", "2024-05-01", 9)).expect("put");
    put_goal(&conn, &goal("g1", "t1")).expect("put");
    put_goal(&conn, &goal("g2", "t2")).expect("put");

    let outcome = delete_task_cascade(&conn, "t1").expect("cascade");
    assert_eq!(outcome.records_deleted, 2);
    assert_eq!(outcome.goals_deleted, 1);

    assert!(get_task(&conn, "t1").expect("get").is_none());
    assert!(get_task(&conn, "t2").expect("get").is_some());
    assert_eq!(list_records(&conn).expect("records").len(), 1);
    assert_eq!(list_goals(&conn).expect("goals").len(), 1);
}

#[test]
fn import_snapshot_replaces_everything() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    put_task(&conn, &task("local-only", 0)).expect("put");
    put_record(&conn, &record("local-only", "2024-05-01", 5)).expect("put");

    let mut snapshot = Snapshot::default();
    snapshot.tasks.push(task("remote-task", 0));
    snapshot.settings = Some(Settings::default());

    import_snapshot(&conn, &snapshot).expect("import");

    let tasks = list_tasks(&conn).expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, "remote-task");
    assert!(list_records(&conn).expect("records").is_empty());
    assert!(get_settings(&conn).expect("settings").is_some());

    let round_trip = export_snapshot(&conn).expect("export");
    assert_eq!(round_trip.tasks, snapshot.tasks);
    assert_eq!(round_trip.version, SNAPSHOT_VERSION);
}

#[test]
fn cloud_ops_keep_append_order_and_delete_by_id() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    for i in 0..3 {
        append_cloud_op(
            &conn,
            &Operation {
                id: format!("op-{i}"),
                user_id: Some("u1".to_string()),
                op_type: "task.upsert".to_string(),
                payload: serde_json::json!({ "id": format!("t{i}") }),
                created_at: iso_from_ms(i),
            },
        )
        .expect("append");
    }

    let ops = list_cloud_ops(&conn).expect("list");
    let ids: Vec<&str> = ops.iter().map(|op| op.id.as_str()).collect();
    assert_eq!(ids, vec!["op-0", "op-1", "op-2"]);

    delete_cloud_ops(&conn, &["op-0".to_string(), "op-2".to_string()]).expect("delete");
    let remaining = list_cloud_ops(&conn).expect("list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "op-1");
    assert_eq!(cloud_op_count(&conn).expect("count"), 1);
}

#[test]
fn sheet_ops_are_independent_of_cloud_ops() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    append_sheet_op(
        &conn,
        &SheetOperation {
            id: "sop-1".to_string(),
            op_type: "record.upsert".to_string(),
            payload: serde_json::json!({ "taskId": "t1", "date": "2024-05-01", "count": 3 }),
            created_at: iso_from_ms(0),
        },
    )
    .expect("append");

    assert_eq!(sheet_op_count(&conn).expect("count"), 1);
    assert_eq!(cloud_op_count(&conn).expect("count"), 0);

    delete_sheet_ops(&conn, &["sop-1".to_string()]).expect("delete");
    assert_eq!(sheet_op_count(&conn).expect("count"), 0);
}

#[test]
fn kv_round_trips_strings_and_integers() {
    let dir = tempdir().expect("tempdir");
    let conn = open(dir.path()).expect("open");

    assert!(kv_get_string(&conn, "missing").expect("get").is_none());
    kv_set_string(&conn, "sync.last_error", "boom").expect("set");
    assert_eq!(
        kv_get_string(&conn, "sync.last_error").expect("get").as_deref(),
        Some("boom")
    );

    kv_set_i64(&conn, "sync.last_synced_ms", 42).expect("set");
    assert_eq!(kv_get_i64(&conn, "sync.last_synced_ms").expect("get"), Some(42));
    kv_set_i64(&conn, "sync.last_synced_ms", 43).expect("overwrite");
    assert_eq!(kv_get_i64(&conn, "sync.last_synced_ms").expect("get"), Some(43));
}
