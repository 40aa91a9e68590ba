//! Durable, ordered log of pending remote operations (the "outbox").
//!
//! Every local mutation appends one [`SyncQueueEntry`]. Entries are read in
//! insertion order and never reordered; multiple entries for the same record
//! may coexist and are applied first-in, first-out. A flat log is enough
//! because only per-record ordering matters for correctness.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`add`](SyncQueue::add) | Assign an operation id and append |
//! | [`drain`](SyncQueue::drain) | Read every entry in order (not consumed) |
//! | [`remove`](SyncQueue::remove) | Drop an entry after remote success |
//! | [`update`](SyncQueue::update) | Persist attempts / error / status in place |

pub mod memory;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{new_id, Collection, Entity, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => anyhow::bail!("Unknown operation kind: '{}'", other),
        }
    }
}

/// Lifecycle of a queued entry.
///
/// `Failed` entries exhausted their attempt budget on non-transient errors;
/// drains skip them until [`SyncQueue::retry_failed`] re-arms them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Pending,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Failed => "failed",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "failed" => Ok(EntryStatus::Failed),
            other => anyhow::bail!("Unknown entry status: '{}'", other),
        }
    }
}

/// An operation about to be appended; the queue assigns id and position.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub kind: OperationKind,
    pub collection: Collection,
    pub record_id: String,
    pub payload: Value,
}

impl NewEntry {
    /// A create carrying the full record snapshot.
    pub fn create<T: Entity>(record: &Record<T>) -> Result<Self> {
        Ok(Self {
            kind: OperationKind::Create,
            collection: T::COLLECTION,
            record_id: record.id().to_string(),
            payload: record.to_json()?,
        })
    }

    /// An update carrying the full record snapshot.
    pub fn update<T: Entity>(record: &Record<T>) -> Result<Self> {
        Ok(Self {
            kind: OperationKind::Update,
            ..Self::create(record)?
        })
    }

    /// A delete carrying only the remote reference, `null` when the record
    /// never reached the remote service.
    pub fn delete(collection: Collection, record_id: &str, remote_id: Option<&str>) -> Self {
        Self {
            kind: OperationKind::Delete,
            collection,
            record_id: record_id.to_string(),
            payload: json!({ "id": record_id, "remote_id": remote_id }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub op_id: String,
    /// Insertion position. Strictly increasing, never rewritten.
    pub seq: i64,
    pub kind: OperationKind,
    pub collection: Collection,
    pub record_id: String,
    pub payload: Value,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: EntryStatus,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncQueueEntry {
    pub fn from_new(entry: NewEntry, seq: i64) -> Self {
        Self {
            op_id: new_id(),
            seq,
            kind: entry.kind,
            collection: entry.collection,
            record_id: entry.record_id,
            payload: entry.payload,
            attempts: 0,
            last_error: None,
            status: EntryStatus::Pending,
            enqueued_at: Utc::now(),
        }
    }

    /// Remote id carried in the payload, if any.
    pub fn payload_remote_id(&self) -> Option<&str> {
        self.payload.get("remote_id").and_then(Value::as_str)
    }

    /// Record revision captured in a create/update snapshot.
    pub fn payload_revision(&self) -> Option<u64> {
        self.payload.get("revision").and_then(Value::as_u64)
    }

    pub fn record_failure(&mut self, error: impl fmt::Display) {
        self.attempts += 1;
        self.last_error = Some(error.to_string());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub failed: usize,
}

/// Abstract durable queue backend.
#[async_trait]
pub trait SyncQueue: Send + Sync {
    /// Append an entry with a fresh operation id, zero attempts, no error.
    async fn add(&self, entry: NewEntry) -> Result<SyncQueueEntry>;

    /// Every entry in insertion order. Reading does not consume.
    async fn drain(&self) -> Result<Vec<SyncQueueEntry>>;

    /// Delete one entry. Absent ids are ignored.
    async fn remove(&self, op_id: &str) -> Result<()>;

    /// Persist attempts, last error, status and payload without moving the
    /// entry.
    async fn update(&self, entry: &SyncQueueEntry) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats> {
        let entries = self.drain().await?;
        let failed = entries
            .iter()
            .filter(|e| e.status == EntryStatus::Failed)
            .count();
        Ok(QueueStats {
            pending: entries.len() - failed,
            failed,
        })
    }

    /// Number of entries still waiting to be applied.
    async fn len(&self) -> Result<usize> {
        Ok(self.stats().await?.pending)
    }

    /// `true` when nothing is waiting to be applied, agreeing with
    /// [`len`](SyncQueue::len). Parked entries may still be present.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Move every failed entry back to pending with a fresh attempt budget.
    /// Returns how many were re-armed.
    async fn retry_failed(&self) -> Result<usize> {
        let mut count = 0;
        for mut entry in self.drain().await? {
            if entry.status == EntryStatus::Failed {
                entry.status = EntryStatus::Pending;
                entry.attempts = 0;
                self.update(&entry).await?;
                count += 1;
            }
        }
        Ok(count)
    }
}
