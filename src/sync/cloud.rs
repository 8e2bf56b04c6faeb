use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::{merge, Unavailable};
use crate::db;
use crate::model::{Operation, Snapshot};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    pub snapshot: Snapshot,
    pub updated_at: String,
}

/// The cloud destination: an idempotent merge endpoint plus whole-snapshot
/// read/write. One user id maps to one snapshot.
pub trait CloudBackend {
    fn push_operations(&self, user_id: &str, operations: &[Operation]) -> Result<PushAck>;
    fn fetch_snapshot(&self, user_id: &str) -> Result<Option<RemoteSnapshot>>;
    fn upsert_snapshot(&self, user_id: &str, snapshot: &Snapshot) -> Result<()>;
}

/// Fire-and-forget dispatch used during page teardown. `true` means the
/// platform accepted the dispatch, not that the server applied it; the
/// operation log stays queued either way.
pub trait KeepaliveSender {
    fn send(&self, user_id: &str, operations: &[Operation]) -> bool;
}

/// Reference cloud store running the merge applier in process. Tests use it
/// directly; it is also the executable description of what the remote merge
/// function does.
pub struct InMemoryCloudBackend {
    snapshots: Mutex<BTreeMap<String, RemoteSnapshot>>,
}

impl InMemoryCloudBackend {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn seed_snapshot(&self, user_id: &str, snapshot: Snapshot, updated_at: &str) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.insert(
                user_id.to_string(),
                RemoteSnapshot {
                    snapshot,
                    updated_at: updated_at.to_string(),
                },
            );
        }
    }

    pub fn snapshot_for(&self, user_id: &str) -> Option<Snapshot> {
        self.snapshots
            .lock()
            .ok()?
            .get(user_id)
            .map(|remote| remote.snapshot.clone())
    }
}

impl Default for InMemoryCloudBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudBackend for InMemoryCloudBackend {
    fn push_operations(&self, user_id: &str, operations: &[Operation]) -> Result<PushAck> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow!("poisoned lock"))?;
        let mut snapshot = snapshots
            .get(user_id)
            .map(|remote| remote.snapshot.clone())
            .unwrap_or_default();
        merge::apply_operations(&mut snapshot, operations)?;
        snapshots.insert(
            user_id.to_string(),
            RemoteSnapshot {
                snapshot,
                updated_at: db::iso_from_ms(db::now_ms()),
            },
        );
        Ok(PushAck {
            success: true,
            message: None,
        })
    }

    fn fetch_snapshot(&self, user_id: &str) -> Result<Option<RemoteSnapshot>> {
        let snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow!("poisoned lock"))?;
        Ok(snapshots.get(user_id).cloned())
    }

    fn upsert_snapshot(&self, user_id: &str, snapshot: &Snapshot) -> Result<()> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow!("poisoned lock"))?;
        snapshots.insert(
            user_id.to_string(),
            RemoteSnapshot {
                snapshot: snapshot.clone(),
                updated_at: db::iso_from_ms(db::now_ms()),
            },
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeRequest<'a> {
    user_id: &'a str,
    operations: &'a [Operation],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotUpload<'a> {
    snapshot: &'a Snapshot,
}

/// HTTP cloud destination. Transport failures (no route, timeout) surface as
/// [`Unavailable`] so cycles abort silently; HTTP-level rejections keep the
/// status and body in the error message.
pub struct HttpCloudBackend {
    client: reqwest::blocking::Client,
    base_url: String,
    auth_token: String,
}

impl HttpCloudBackend {
    pub fn new(base_url: &str, auth_token: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(anyhow!("missing cloud base url"));
        }
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
            base_url: base.to_string(),
            auth_token: auth_token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

pub(crate) fn transport_error(context: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_connect() || e.is_timeout() {
        anyhow::Error::new(Unavailable {
            reason: format!("{context}: {e}"),
        })
    } else {
        e.into()
    }
}

impl CloudBackend for HttpCloudBackend {
    fn push_operations(&self, user_id: &str, operations: &[Operation]) -> Result<PushAck> {
        let resp = self
            .client
            .post(self.url("/v1/sync/operations"))
            .bearer_auth(&self.auth_token)
            .json(&MergeRequest {
                user_id,
                operations,
            })
            .send()
            .map_err(|e| transport_error("cloud merge", e))?;

        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("cloud merge failed: HTTP {status} {text}"));
        }
        let ack: PushAck = serde_json::from_str(&text)?;
        Ok(ack)
    }

    fn fetch_snapshot(&self, user_id: &str) -> Result<Option<RemoteSnapshot>> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/sync/{user_id}/snapshot")))
            .bearer_auth(&self.auth_token)
            .send()
            .map_err(|e| transport_error("cloud snapshot read", e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("cloud snapshot read failed: HTTP {status} {text}"));
        }
        let remote: RemoteSnapshot = serde_json::from_str(&text)?;
        Ok(Some(remote))
    }

    fn upsert_snapshot(&self, user_id: &str, snapshot: &Snapshot) -> Result<()> {
        let resp = self
            .client
            .put(self.url(&format!("/v1/sync/{user_id}/snapshot")))
            .bearer_auth(&self.auth_token)
            .json(&SnapshotUpload { snapshot })
            .send()
            .map_err(|e| transport_error("cloud snapshot write", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(anyhow!("cloud snapshot write failed: HTTP {status} {text}"));
        }
        Ok(())
    }
}

impl KeepaliveSender for HttpCloudBackend {
    // Blocking fallback for platforms without a true keepalive primitive:
    // the dispatch is only "accepted" if the merge call itself succeeded.
    fn send(&self, user_id: &str, operations: &[Operation]) -> bool {
        self.push_operations(user_id, operations)
            .map(|ack| ack.success)
            .unwrap_or(false)
    }
}
