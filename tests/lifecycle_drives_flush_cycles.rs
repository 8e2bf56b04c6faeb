use anyhow::Result;
use practiceflow::db;
use practiceflow::lifecycle::{FlushCycle, NullNotifier, CLOUD_DEBOUNCE_MS, SHEET_DEBOUNCE_MS};
use practiceflow::model::SheetConfig;
use practiceflow::sheets::applier::InMemorySheetsApi;
use practiceflow::sheets::{self, SheetDirectory};
use practiceflow::sync::cloud::InMemoryCloudBackend;
use practiceflow::sync::{Coordinator, RecordInput, SyncStatus, TaskInput};

struct StaticDirectory {
    sheets: Vec<SheetConfig>,
}

impl SheetDirectory for StaticDirectory {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(Some("tok".to_string()))
    }

    fn sheet_destinations(&self) -> Result<Vec<SheetConfig>> {
        Ok(self.sheets.clone())
    }

    fn journal_destinations(&self) -> Result<Vec<SheetConfig>> {
        Ok(Vec::new())
    }
}

/// The host loop in miniature: poll the scheduler, run whatever is due.
fn drive(
    c: &mut Coordinator,
    now_ms: i64,
    backend: &InMemoryCloudBackend,
    directory: &StaticDirectory,
    api: &InMemorySheetsApi,
) -> Vec<FlushCycle> {
    let due = c.scheduler_mut().poll(now_ms);
    for cycle in &due {
        match cycle {
            FlushCycle::CloudPush => c.flush_scheduled(backend, true, false),
            FlushCycle::CloudPushPull => c.flush_scheduled(backend, true, true),
            FlushCycle::Sheets => {
                sheets::flush_sheet_ops_scheduled(c.conn(), directory, api, &NullNotifier)
            }
            FlushCycle::Journal => {
                sheets::flush_journal_ops_scheduled(c.conn(), directory, api, &NullNotifier)
            }
        }
    }
    due
}

#[test]
fn a_burst_of_edits_produces_one_flush_after_the_debounce() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = db::open(&dir.path().join("app")).expect("open");
    let mut c = Coordinator::with_connection(conn);
    c.set_user(Some("u1".to_string()));

    let backend = InMemoryCloudBackend::new();
    let api = InMemorySheetsApi::new();
    api.add_spreadsheet("ss", "Practice");
    let directory = StaticDirectory {
        sheets: vec![SheetConfig {
            id: "d1".to_string(),
            title: "Practice".to_string(),
            spreadsheet_id: "ss".to_string(),
            folder_id: None,
            task_ids: vec!["t1".to_string()],
            created_at: "2024-05-01T00:00:00.000Z".to_string(),
            updated_at: "2024-05-01T00:00:00.000Z".to_string(),
        }],
    };

    c.add_task(TaskInput {
        id: Some("t1".to_string()),
        name: "Counter".to_string(),
        category: "general".to_string(),
        ..TaskInput::default()
    })
    .expect("add task");
    // A user mashing the increment button.
    for count in 1..=5 {
        c.upsert_record(RecordInput {
            task_id: "t1".to_string(),
            date: "2024-05-01".to_string(),
            count,
            note: None,
        })
        .expect("record");
    }

    // Inside the coalescing window nothing runs.
    let now = db::now_ms();
    assert!(drive(&mut c, now, &backend, &directory, &api).is_empty());
    assert!(backend.snapshot_for("u1").is_none());

    // One debounce window later both logs drain in one pass each.
    let later = now + CLOUD_DEBOUNCE_MS.max(SHEET_DEBOUNCE_MS);
    let due = drive(&mut c, later, &backend, &directory, &api);
    assert!(due.contains(&FlushCycle::CloudPush));
    assert!(due.contains(&FlushCycle::Sheets));

    assert_eq!(db::cloud_op_count(c.conn()).expect("cloud"), 0);
    assert_eq!(db::sheet_op_count(c.conn()).expect("sheet"), 0);
    assert_eq!(c.status(), SyncStatus::Idle);

    // Last write wins everywhere.
    let snapshot = backend.snapshot_for("u1").expect("snapshot");
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].count, 5);
    assert_eq!(api.cell("ss", "2024-05", 2, 2).as_deref(), Some("5"));
}

#[test]
fn scheduled_cloud_failures_surface_as_status_not_panics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = db::open(&dir.path().join("app")).expect("open");
    let mut c = Coordinator::with_connection(conn);
    // No signed-in user: the scheduled flush is skipped silently.
    c.add_task(TaskInput {
        id: Some("t1".to_string()),
        name: "Sitting".to_string(),
        category: "general".to_string(),
        ..TaskInput::default()
    })
    .expect("add task");

    let backend = InMemoryCloudBackend::new();
    c.flush_scheduled(&backend, true, false);
    assert_eq!(c.status(), SyncStatus::Idle);
    assert_eq!(db::cloud_op_count(c.conn()).expect("count"), 1);
}
