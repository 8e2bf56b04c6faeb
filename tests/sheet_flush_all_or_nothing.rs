use std::cell::RefCell;

use anyhow::Result;
use practiceflow::db;
use practiceflow::lifecycle::{Notice, Notifier};
use practiceflow::model::SheetConfig;
use practiceflow::sheets::applier::InMemorySheetsApi;
use practiceflow::sheets::{flush_journal_ops, flush_sheet_ops, SheetDirectory};
use practiceflow::sync::{is_unavailable, Coordinator, JournalInput, RecordInput, TaskInput};

struct StaticDirectory {
    token: Option<String>,
    sheets: Vec<SheetConfig>,
    journal: Vec<SheetConfig>,
}

impl SheetDirectory for StaticDirectory {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }

    fn sheet_destinations(&self) -> Result<Vec<SheetConfig>> {
        Ok(self.sheets.clone())
    }

    fn journal_destinations(&self) -> Result<Vec<SheetConfig>> {
        Ok(self.journal.clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: RefCell<Vec<Notice>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.borrow_mut().push(notice.clone());
    }
}

fn destination(id: &str, spreadsheet_id: &str, task_ids: &[&str]) -> SheetConfig {
    SheetConfig {
        id: id.to_string(),
        title: format!("sheet {id}"),
        spreadsheet_id: spreadsheet_id.to_string(),
        folder_id: None,
        task_ids: task_ids.iter().map(|s| s.to_string()).collect(),
        created_at: "2024-05-01T00:00:00.000Z".to_string(),
        updated_at: "2024-05-01T00:00:00.000Z".to_string(),
    }
}

fn seeded_coordinator() -> (tempfile::TempDir, Coordinator) {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = db::open(&dir.path().join("app")).expect("open");
    let mut c = Coordinator::with_connection(conn);
    c.set_user(Some("u1".to_string()));
    c.add_task(TaskInput {
        id: Some("t1".to_string()),
        name: "Sitting".to_string(),
        category: "meditation".to_string(),
        ..TaskInput::default()
    })
    .expect("add task");
    c.upsert_record(RecordInput {
        task_id: "t1".to_string(),
        date: "2024-05-03".to_string(),
        count: 4,
        note: None,
    })
    .expect("add record");
    (dir, c)
}

#[test]
fn one_failing_destination_aborts_the_cycle_and_clears_nothing() {
    let (_dir, c) = seeded_coordinator();
    let api = InMemorySheetsApi::new();
    api.add_spreadsheet("ok-sheet", "Linked A");
    // "broken-sheet" is never registered, so the applier fails on it.
    let directory = StaticDirectory {
        token: Some("tok".to_string()),
        sheets: vec![
            destination("d1", "ok-sheet", &["t1"]),
            destination("d2", "broken-sheet", &["t1"]),
        ],
        journal: Vec::new(),
    };
    let notifier = RecordingNotifier::default();

    let before = db::sheet_op_count(c.conn()).expect("count");
    let err = flush_sheet_ops(c.conn(), &directory, &api, &notifier).expect_err("must abort");
    assert!(err.to_string().contains("broken-sheet"));

    // Strict all-or-nothing: the D1-relevant entries stay queued too.
    assert_eq!(db::sheet_op_count(c.conn()).expect("count"), before);

    let notices = notifier.notices.borrow();
    assert_eq!(notices.len(), 1);
    assert!(matches!(notices[0], Notice::SheetSyncFailed { .. }));
}

#[test]
fn all_destinations_succeeding_clears_only_the_sheet_half_of_the_log() {
    let (_dir, mut c) = seeded_coordinator();
    c.add_journal_entry(JournalInput {
        id: None,
        date: "2024-05-03".to_string(),
        content: "quiet morning".to_string(),
        mood: None,
        tags: Vec::new(),
        pin: false,
        attachments: Vec::new(),
    })
    .expect("journal entry");

    let api = InMemorySheetsApi::new();
    api.add_spreadsheet("s-a", "Linked A");
    api.add_spreadsheet("s-b", "Linked B");
    let directory = StaticDirectory {
        token: Some("tok".to_string()),
        sheets: vec![
            destination("d1", "s-a", &["t1"]),
            destination("d2", "s-b", &["t1"]),
        ],
        journal: Vec::new(),
    };
    let notifier = RecordingNotifier::default();

    // task.upsert + record.upsert + journal.upsert queued.
    assert_eq!(db::sheet_op_count(c.conn()).expect("count"), 3);

    let outcome = flush_sheet_ops(c.conn(), &directory, &api, &notifier).expect("flush");
    assert_eq!(outcome.destinations, 2);
    assert_eq!(outcome.cleared, 2);

    // The journal entry is the other applier's business and must survive.
    let remaining = db::list_sheet_ops(c.conn()).expect("ops");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].op_type, "journal.upsert");

    let notices = notifier.notices.borrow();
    assert!(matches!(
        notices[0],
        Notice::SheetSyncSucceeded {
            destinations: 2,
            operations: 2
        }
    ));

    // Both destinations got the cell.
    assert_eq!(api.cell("s-a", "2024-05", 2, 4).as_deref(), Some("4"));
    assert_eq!(api.cell("s-b", "2024-05", 2, 4).as_deref(), Some("4"));
}

#[test]
fn journal_flush_clears_only_journal_entries() {
    let (_dir, mut c) = seeded_coordinator();
    c.add_journal_entry(JournalInput {
        id: None,
        date: "2024-05-03".to_string(),
        content: "evening notes".to_string(),
        mood: None,
        tags: Vec::new(),
        pin: false,
        attachments: Vec::new(),
    })
    .expect("journal entry");

    let api = InMemorySheetsApi::new();
    api.add_spreadsheet("j-1", "Journal");
    let directory = StaticDirectory {
        token: Some("tok".to_string()),
        sheets: Vec::new(),
        journal: vec![destination("jd", "j-1", &[])],
    };
    let notifier = RecordingNotifier::default();

    let outcome = flush_journal_ops(c.conn(), &directory, &api, &notifier).expect("flush");
    assert_eq!(outcome.cleared, 1);

    // Task/record entries are still waiting for the sheet applier.
    let remaining = db::list_sheet_ops(c.conn()).expect("ops");
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|op| !op.op_type.starts_with("journal")));

    assert_eq!(
        api.cell("j-1", "2024-05", 2, 4).as_deref(),
        Some("evening notes")
    );
}

#[test]
fn missing_token_aborts_silently_and_keeps_the_queue() {
    let (_dir, c) = seeded_coordinator();
    let api = InMemorySheetsApi::new();
    let directory = StaticDirectory {
        token: None,
        sheets: vec![destination("d1", "s-a", &["t1"])],
        journal: Vec::new(),
    };
    let notifier = RecordingNotifier::default();

    let err = flush_sheet_ops(c.conn(), &directory, &api, &notifier).expect_err("no token");
    assert!(is_unavailable(&err));
    assert_eq!(db::sheet_op_count(c.conn()).expect("count"), 2);
    assert!(notifier.notices.borrow().is_empty());
}

#[test]
fn no_linked_destinations_is_a_quiet_no_op() {
    let (_dir, c) = seeded_coordinator();
    let api = InMemorySheetsApi::new();
    let directory = StaticDirectory {
        token: Some("tok".to_string()),
        sheets: Vec::new(),
        journal: Vec::new(),
    };
    let notifier = RecordingNotifier::default();

    let outcome = flush_sheet_ops(c.conn(), &directory, &api, &notifier).expect("flush");
    assert_eq!(outcome.destinations, 0);
    assert_eq!(outcome.cleared, 0);
    assert_eq!(db::sheet_op_count(c.conn()).expect("count"), 2);
    assert!(notifier.notices.borrow().is_empty());
}
