//! In-memory [`SyncQueue`] for tests and WASM targets.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{NewEntry, SyncQueue, SyncQueueEntry};

#[derive(Default)]
struct Log {
    entries: Vec<SyncQueueEntry>,
    next_seq: i64,
}

#[derive(Default)]
pub struct InMemoryQueue {
    log: Mutex<Log>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Log>> {
        self.log
            .lock()
            .map_err(|_| anyhow!("in-memory queue lock poisoned"))
    }
}

#[async_trait]
impl SyncQueue for InMemoryQueue {
    async fn add(&self, entry: NewEntry) -> Result<SyncQueueEntry> {
        let mut log = self.lock()?;
        log.next_seq += 1;
        let entry = SyncQueueEntry::from_new(entry, log.next_seq);
        log.entries.push(entry.clone());
        Ok(entry)
    }

    async fn drain(&self) -> Result<Vec<SyncQueueEntry>> {
        Ok(self.lock()?.entries.clone())
    }

    async fn remove(&self, op_id: &str) -> Result<()> {
        self.lock()?.entries.retain(|e| e.op_id != op_id);
        Ok(())
    }

    async fn update(&self, entry: &SyncQueueEntry) -> Result<()> {
        let mut log = self.lock()?;
        if let Some(existing) = log.entries.iter_mut().find(|e| e.op_id == entry.op_id) {
            existing.attempts = entry.attempts;
            existing.last_error = entry.last_error.clone();
            existing.status = entry.status;
            existing.payload = entry.payload.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use crate::queue::EntryStatus;

    fn delete_entry(id: &str) -> NewEntry {
        NewEntry::delete(Collection::Pets, id, None)
    }

    #[tokio::test]
    async fn test_add_initializes_bookkeeping() {
        let queue = InMemoryQueue::new();
        let entry = queue.add(delete_entry("a")).await.unwrap();
        assert_eq!(entry.attempts, 0);
        assert!(entry.last_error.is_none());
        assert_eq!(entry.status, EntryStatus::Pending);
        assert!(!entry.op_id.is_empty());
    }

    #[tokio::test]
    async fn test_drain_preserves_insertion_order() {
        let queue = InMemoryQueue::new();
        for id in ["a", "b", "a", "c"] {
            queue.add(delete_entry(id)).await.unwrap();
        }
        let ids: Vec<String> = queue
            .drain()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.record_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "a", "c"]);
        // Reading does not consume.
        assert_eq!(queue.len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_update_keeps_position() {
        let queue = InMemoryQueue::new();
        let mut first = queue.add(delete_entry("a")).await.unwrap();
        queue.add(delete_entry("b")).await.unwrap();

        first.record_failure("boom");
        queue.update(&first).await.unwrap();

        let entries = queue.drain().await.unwrap();
        assert_eq!(entries[0].op_id, first.op_id);
        assert_eq!(entries[0].attempts, 1);
        assert_eq!(entries[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_remove_and_retry_failed() {
        let queue = InMemoryQueue::new();
        let a = queue.add(delete_entry("a")).await.unwrap();
        let mut b = queue.add(delete_entry("b")).await.unwrap();

        queue.remove(&a.op_id).await.unwrap();
        b.status = EntryStatus::Failed;
        b.attempts = 5;
        queue.update(&b).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.pending, stats.failed), (0, 1));
        // Only the parked entry is left: nothing to apply.
        assert_eq!(queue.len().await.unwrap(), 0);
        assert!(queue.is_empty().await.unwrap());

        assert_eq!(queue.retry_failed().await.unwrap(), 1);
        assert!(!queue.is_empty().await.unwrap());
        let entries = queue.drain().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, EntryStatus::Pending);
        assert_eq!(entries[0].attempts, 0);
    }
}
