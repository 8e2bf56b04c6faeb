use std::cell::RefCell;

use anyhow::{anyhow, Result};
use practiceflow::db;
use practiceflow::model::Operation;
use practiceflow::sync::cloud::{CloudBackend, InMemoryCloudBackend, PushAck, RemoteSnapshot};
use practiceflow::sync::{Coordinator, SyncStatus};
use serde_json::json;

/// Delegates to the in-memory store but fails a configurable number of
/// push calls first, recording every batch size it sees.
struct FlakyBackend {
    inner: InMemoryCloudBackend,
    failures_left: RefCell<usize>,
    batch_sizes: RefCell<Vec<usize>>,
}

impl FlakyBackend {
    fn failing(times: usize) -> Self {
        Self {
            inner: InMemoryCloudBackend::new(),
            failures_left: RefCell::new(times),
            batch_sizes: RefCell::new(Vec::new()),
        }
    }
}

impl CloudBackend for FlakyBackend {
    fn push_operations(&self, user_id: &str, operations: &[Operation]) -> Result<PushAck> {
        self.batch_sizes.borrow_mut().push(operations.len());
        let mut left = self.failures_left.borrow_mut();
        if *left > 0 {
            *left -= 1;
            return Err(anyhow!("merge endpoint exploded"));
        }
        self.inner.push_operations(user_id, operations)
    }

    fn fetch_snapshot(&self, user_id: &str) -> Result<Option<RemoteSnapshot>> {
        self.inner.fetch_snapshot(user_id)
    }

    fn upsert_snapshot(&self, user_id: &str, snapshot: &practiceflow::model::Snapshot) -> Result<()> {
        self.inner.upsert_snapshot(user_id, snapshot)
    }
}

fn coordinator_with_ops(op_count: usize) -> (tempfile::TempDir, Coordinator) {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = db::open(&dir.path().join("app")).expect("open");
    for i in 0..op_count {
        db::append_cloud_op(
            &conn,
            &Operation {
                id: format!("op-{i}"),
                user_id: Some("u1".to_string()),
                op_type: "record.upsert".to_string(),
                payload: json!({
                    "id": format!("t1-2024-05-{:02}", (i % 28) + 1),
                    "date": format!("2024-05-{:02}", (i % 28) + 1),
                    "taskId": "t1",
                    "count": i,
                    "lastModified": "2024-05-01T00:00:00.000Z",
                }),
                created_at: "2024-05-01T00:00:00.000Z".to_string(),
            },
        )
        .expect("append");
    }
    let mut c = Coordinator::with_connection(conn);
    c.set_user(Some("u1".to_string()));
    // No sleeping through the real backoff in tests.
    c.set_backoff_ms(Vec::new());
    (dir, c)
}

#[test]
fn push_splits_the_log_into_200_entry_batches_in_order() {
    let (_dir, mut c) = coordinator_with_ops(450);
    let backend = FlakyBackend::failing(0);

    let report = c.sync_now(&backend, true, false).expect("sync");
    assert_eq!(report.pushed, 450);
    assert_eq!(*backend.batch_sizes.borrow(), vec![200, 200, 50]);
    assert_eq!(db::cloud_op_count(c.conn()).expect("count"), 0);
}

#[test]
fn a_failing_batch_keeps_the_entire_log_queued() {
    let (_dir, mut c) = coordinator_with_ops(450);
    // First batch is accepted, every attempt at the second one fails.
    let backend = SecondBatchFails {
        inner: InMemoryCloudBackend::new(),
        calls: RefCell::new(0),
    };

    let err = c.sync_now(&backend, true, false).expect_err("push fails");
    assert!(err.to_string().contains("merge endpoint exploded"));
    assert_eq!(c.status(), SyncStatus::Error);

    // Nothing was cleared, including the batch the server already accepted.
    assert_eq!(db::cloud_op_count(c.conn()).expect("count"), 450);

    let settings = db::get_settings(c.conn()).expect("settings").expect("some");
    assert!(settings
        .sync
        .last_error
        .as_deref()
        .is_some_and(|msg| msg.contains("merge endpoint exploded")));

    // The next cycle starts from the full log and succeeds end to end.
    let healthy = FlakyBackend::failing(0);
    let report = c.sync_now(&healthy, true, false).expect("retry cycle");
    assert_eq!(report.pushed, 450);
    assert_eq!(db::cloud_op_count(c.conn()).expect("count"), 0);
    assert_eq!(c.status(), SyncStatus::Idle);
    let settings = db::get_settings(c.conn()).expect("settings").expect("some");
    assert!(settings.sync.last_error.is_none());
    assert!(settings.sync.last_synced_at.is_some());
}

struct SecondBatchFails {
    inner: InMemoryCloudBackend,
    calls: RefCell<usize>,
}

impl CloudBackend for SecondBatchFails {
    fn push_operations(&self, user_id: &str, operations: &[Operation]) -> Result<PushAck> {
        let call = {
            let mut calls = self.calls.borrow_mut();
            *calls += 1;
            *calls
        };
        if call >= 2 {
            return Err(anyhow!("merge endpoint exploded"));
        }
        self.inner.push_operations(user_id, operations)
    }

    fn fetch_snapshot(&self, user_id: &str) -> Result<Option<RemoteSnapshot>> {
        self.inner.fetch_snapshot(user_id)
    }

    fn upsert_snapshot(&self, user_id: &str, snapshot: &practiceflow::model::Snapshot) -> Result<()> {
        self.inner.upsert_snapshot(user_id, snapshot)
    }
}

#[test]
fn a_rejected_ack_counts_as_a_failure_too() {
    let (_dir, mut c) = coordinator_with_ops(10);
    let backend = Rejecting;

    let err = c.sync_now(&backend, true, false).expect_err("rejected");
    assert!(err.to_string().contains("quota exceeded"));
    assert_eq!(db::cloud_op_count(c.conn()).expect("count"), 10);
}

struct Rejecting;

impl CloudBackend for Rejecting {
    fn push_operations(&self, _user_id: &str, _operations: &[Operation]) -> Result<PushAck> {
        Ok(PushAck {
            success: false,
            message: Some("quota exceeded".to_string()),
        })
    }

    fn fetch_snapshot(&self, _user_id: &str) -> Result<Option<RemoteSnapshot>> {
        Ok(None)
    }

    fn upsert_snapshot(
        &self,
        _user_id: &str,
        _snapshot: &practiceflow::model::Snapshot,
    ) -> Result<()> {
        Ok(())
    }
}
