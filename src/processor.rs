//! Sync processor: replays the queue against the remote gateway.
//!
//! Entries are applied one at a time, in queue order, never concurrently,
//! so a single rate-limit budget is respected and per-record order holds.
//!
//! For each pending entry:
//!
//! 1. Dispatch on the operation kind: create → remote create, update →
//!    remote update, delete → remote archive. A delete without a remote id
//!    succeeds locally with no remote call.
//! 2. On success, acknowledge on the local record (remote id for creates,
//!    `synced` when the snapshot revision is still current) and remove the
//!    entry. The acknowledgement is a single conditional store write, so an
//!    edit made meanwhile by another process is never overwritten or
//!    mistaken for synced.
//! 3. On failure, record the error, bump the attempt count, keep the entry,
//!    and move on to the next one. Later entries for the same record are
//!    skipped for the rest of the drain.
//!
//! Configuration and storage errors stop the drain and are returned to the
//! caller. Entries that fail with non-rate-limit errors `max_attempts`
//! times are parked as [`EntryStatus::Failed`] and skipped until re-armed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use pawtrack_core::queue::{EntryStatus, OperationKind, QueueStats, SyncQueue, SyncQueueEntry};
use pawtrack_core::store::{remote_id_of, RecordStore};

use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::locks::KeyedLocks;

/// Outcome counts for one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries applied and removed.
    pub applied: usize,
    /// Entries that failed this time and stay queued.
    pub failed: usize,
    /// Entries not attempted (parked, or behind a failure on the same record).
    pub skipped: usize,
    /// Entries parked as failed during this drain.
    pub dead_lettered: usize,
    pub cancelled: bool,
}

/// Remote ids assigned by creates during one drain, by local record id.
/// Deletes read later in the same drain may predate the assignment.
type Assigned = HashMap<String, String>;

pub struct SyncProcessor {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn SyncQueue>,
    gateway: Arc<RemoteGateway>,
    locks: Arc<KeyedLocks>,
    max_attempts: u32,
    running: tokio::sync::Mutex<()>,
}

impl SyncProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn SyncQueue>,
        gateway: Arc<RemoteGateway>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            queue,
            gateway,
            locks,
            max_attempts: 5,
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Entries still waiting to be applied.
    pub async fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.queue.len().await?)
    }

    pub async fn stats(&self) -> SyncResult<QueueStats> {
        Ok(self.queue.stats().await?)
    }

    /// Drain the whole queue once.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        self.drain_until_cancelled(&CancellationToken::new()).await
    }

    /// Drain the queue, checking `cancel` between entries. An entry that has
    /// started is always finished (acknowledged or retained) first.
    pub async fn drain_until_cancelled(&self, cancel: &CancellationToken) -> SyncResult<DrainReport> {
        // Overlapping triggers wait for the running drain instead of
        // interleaving with it.
        let _running = self.running.lock().await;

        let entries = self.queue.drain().await?;
        tracing::info!(entries = entries.len(), "drain started");

        let mut report = DrainReport::default();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut assigned = Assigned::new();

        for mut entry in entries {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if entry.status == EntryStatus::Failed || blocked.contains(&entry.record_id) {
                blocked.insert(entry.record_id.clone());
                report.skipped += 1;
                continue;
            }

            match self.apply(&entry, &mut assigned).await {
                Ok(()) => {
                    self.queue.remove(&entry.op_id).await?;
                    report.applied += 1;
                    tracing::debug!(
                        op_id = %entry.op_id,
                        kind = %entry.kind,
                        collection = %entry.collection,
                        record_id = %entry.record_id,
                        "entry applied"
                    );
                }
                Err(err) if err.aborts_drain() => {
                    tracing::error!(error = %err, "drain aborted");
                    return Err(err);
                }
                Err(err) => {
                    entry.record_failure(&err);
                    if !err.is_rate_limited() && entry.attempts >= self.max_attempts {
                        entry.status = EntryStatus::Failed;
                        report.dead_lettered += 1;
                    }
                    tracing::warn!(
                        op_id = %entry.op_id,
                        kind = %entry.kind,
                        record_id = %entry.record_id,
                        attempts = entry.attempts,
                        error = %err,
                        "entry failed, kept in queue"
                    );
                    self.queue.update(&entry).await?;
                    blocked.insert(entry.record_id.clone());
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            applied = report.applied,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "drain finished"
        );
        Ok(report)
    }

    async fn apply(&self, entry: &SyncQueueEntry, assigned: &mut Assigned) -> SyncResult<()> {
        match entry.kind {
            OperationKind::Create => self.apply_create(entry, assigned).await,
            OperationKind::Update => self.apply_update(entry).await,
            OperationKind::Delete => self.apply_delete(entry, assigned).await,
        }
    }

    async fn apply_create(&self, entry: &SyncQueueEntry, assigned: &mut Assigned) -> SyncResult<()> {
        match self.store.get(entry.collection, &entry.record_id).await? {
            // Deleted before it ever synced; the queued delete has nothing to
            // archive either.
            None => return Ok(()),
            // Created remotely on an earlier run whose acknowledgement was lost.
            Some(current) if remote_id_of(&current).is_some() => {
                return self.acknowledge(entry, None).await.map(|_| ());
            }
            Some(_) => {}
        }

        let remote_id = self
            .gateway
            .create_record(entry.collection, &entry.payload)
            .await?;
        assigned.insert(entry.record_id.clone(), remote_id.clone());

        if !self.acknowledge(entry, Some(&remote_id)).await? {
            self.hand_off_remote_id(&entry.record_id, &remote_id).await?;
        }
        Ok(())
    }

    async fn apply_update(&self, entry: &SyncQueueEntry) -> SyncResult<()> {
        let Some(current) = self.store.get(entry.collection, &entry.record_id).await? else {
            // Superseded by a delete further down the queue.
            return Ok(());
        };

        let remote_id = remote_id_of(&current)
            .or_else(|| entry.payload_remote_id())
            .map(str::to_string)
            .ok_or_else(|| SyncError::MissingRemoteId {
                collection: entry.collection,
                id: entry.record_id.clone(),
            })?;

        self.gateway
            .update_record(&remote_id, &entry.payload)
            .await?;
        self.acknowledge(entry, None).await?;
        Ok(())
    }

    async fn apply_delete(&self, entry: &SyncQueueEntry, assigned: &Assigned) -> SyncResult<()> {
        let remote_id = entry
            .payload_remote_id()
            .or_else(|| assigned.get(&entry.record_id).map(String::as_str));

        match remote_id {
            Some(remote_id) => {
                self.gateway.archive_record(remote_id).await?;
            }
            None => {
                tracing::debug!(record_id = %entry.record_id, "delete of never-synced record");
            }
        }
        Ok(())
    }

    /// Record a remote success on the local copy. Returns `false` when the
    /// record no longer exists locally.
    async fn acknowledge(&self, entry: &SyncQueueEntry, remote_id: Option<&str>) -> SyncResult<bool> {
        let _guard = self.locks.lock(&entry.record_id).await;
        Ok(self
            .store
            .acknowledge(
                entry.collection,
                &entry.record_id,
                entry.payload_revision(),
                remote_id,
            )
            .await?)
    }

    /// The record was deleted locally while its create was in flight, so the
    /// queued delete may carry no remote id. Give it the one just assigned.
    async fn hand_off_remote_id(&self, record_id: &str, remote_id: &str) -> SyncResult<()> {
        for mut queued in self.queue.drain().await? {
            if queued.record_id == record_id
                && queued.kind == OperationKind::Delete
                && queued.payload_remote_id().is_none()
            {
                queued.payload["remote_id"] = Value::String(remote_id.to_string());
                self.queue.update(&queued).await?;
            }
        }
        Ok(())
    }
}
