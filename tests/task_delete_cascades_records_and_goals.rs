use practiceflow::db;
use practiceflow::model::GoalMode;
use practiceflow::sync::{Coordinator, GoalInput, RecordInput, TaskInput};

#[test]
fn deleting_a_task_removes_dependents_and_logs_one_operation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = db::open(&dir.path().join("app")).expect("open");
    let mut c = Coordinator::with_connection(conn);
    c.set_user(Some("u1".to_string()));

    c.add_task(TaskInput {
        id: Some("t1".to_string()),
        name: "Bowing".to_string(),
        category: "body".to_string(),
        ..TaskInput::default()
    })
    .expect("add task");
    for day in ["2024-05-01", "2024-05-02", "2024-05-03"] {
        c.upsert_record(RecordInput {
            task_id: "t1".to_string(),
            date: day.to_string(),
            count: 10,
            note: None,
        })
        .expect("add record");
    }
    for (goal_id, target) in [("g1", 100), ("g2", 200)] {
        c.add_goal(GoalInput {
            id: Some(goal_id.to_string()),
            task_id: "t1".to_string(),
            name: format!("target {target}"),
            start_date: "2024-05-01".to_string(),
            end_date: "2024-05-31".to_string(),
            target_count: target,
            mode: GoalMode::Total,
            weekend_multiplier: None,
        })
        .expect("add goal");
    }

    let before = db::cloud_op_count(c.conn()).expect("count");

    let outcome = c.delete_task("t1").expect("delete task");
    assert_eq!(outcome.records_deleted, 3);
    assert_eq!(outcome.goals_deleted, 2);

    // Exactly one task.delete operation for the whole cascade, not N+M+1.
    let ops = db::list_cloud_ops(c.conn()).expect("ops");
    assert_eq!(ops.len(), before + 1);
    let last = ops.last().expect("last op");
    assert_eq!(last.op_type, "task.delete");
    assert_eq!(last.payload["id"].as_str(), Some("t1"));

    assert!(db::get_task(c.conn(), "t1").expect("get").is_none());
    assert!(db::list_records(c.conn()).expect("records").is_empty());
    assert!(db::list_goals(c.conn()).expect("goals").is_empty());
}

#[test]
fn deleting_a_missing_task_is_an_error_and_logs_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = db::open(&dir.path().join("app")).expect("open");
    let mut c = Coordinator::with_connection(conn);

    c.delete_task("ghost").expect_err("missing task");
    assert_eq!(db::cloud_op_count(c.conn()).expect("count"), 0);
    assert_eq!(db::sheet_op_count(c.conn()).expect("count"), 0);
}
