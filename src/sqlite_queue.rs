//! SQLite-backed [`SyncQueue`].
//!
//! Entries live in the `sync_queue` table. `seq` is an AUTOINCREMENT
//! primary key, so positions are never reused and `ORDER BY seq` is the
//! insertion order across restarts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use pawtrack_core::queue::{NewEntry, SyncQueue, SyncQueueEntry};

pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<SyncQueueEntry> {
    let kind: String = row.get("kind");
    let collection: String = row.get("collection");
    let status: String = row.get("status");
    let payload: String = row.get("payload");
    let attempts: i64 = row.get("attempts");
    let enqueued_at: i64 = row.get("enqueued_at");

    Ok(SyncQueueEntry {
        op_id: row.get("op_id"),
        seq: row.get("seq"),
        kind: kind.parse()?,
        collection: collection.parse()?,
        record_id: row.get("record_id"),
        payload: serde_json::from_str(&payload).context("corrupt sync_queue payload")?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.get("last_error"),
        status: status.parse()?,
        enqueued_at: chrono::DateTime::from_timestamp_millis(enqueued_at).unwrap_or_default(),
    })
}

#[async_trait]
impl SyncQueue for SqliteQueue {
    async fn add(&self, entry: NewEntry) -> Result<SyncQueueEntry> {
        // seq is assigned by SQLite; 0 is a placeholder until the insert returns.
        let mut entry = SyncQueueEntry::from_new(entry, 0);

        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sync_queue (op_id, kind, collection, record_id, payload,
                                    attempts, last_error, status, enqueued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING seq
            "#,
        )
        .bind(&entry.op_id)
        .bind(entry.kind.as_str())
        .bind(entry.collection.as_str())
        .bind(&entry.record_id)
        .bind(serde_json::to_string(&entry.payload)?)
        .bind(entry.attempts as i64)
        .bind(&entry.last_error)
        .bind(entry.status.as_str())
        .bind(entry.enqueued_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        entry.seq = seq;
        Ok(entry)
    }

    async fn drain(&self) -> Result<Vec<SyncQueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, op_id, kind, collection, record_id, payload,
                   attempts, last_error, status, enqueued_at
            FROM sync_queue
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn remove(&self, op_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_queue WHERE op_id = ?")
            .bind(op_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, entry: &SyncQueueEntry) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue
            SET attempts = ?, last_error = ?, status = ?, payload = ?
            WHERE op_id = ?
            "#,
        )
        .bind(entry.attempts as i64)
        .bind(&entry.last_error)
        .bind(entry.status.as_str())
        .bind(serde_json::to_string(&entry.payload)?)
        .bind(&entry.op_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use pawtrack_core::models::Collection;
    use pawtrack_core::queue::EntryStatus;
    use tempfile::TempDir;

    async fn open(path: &std::path::Path) -> (SqlitePool, SqliteQueue) {
        let pool = db::connect_path(path).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        (pool.clone(), SqliteQueue::new(pool))
    }

    #[tokio::test]
    async fn test_queue_survives_restart_in_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("paw.sqlite");

        let (pool, queue) = open(&path).await;
        for id in ["a", "b", "c"] {
            queue
                .add(NewEntry::delete(Collection::Pets, id, Some("remote")))
                .await
                .unwrap();
        }
        pool.close().await;

        let (_pool, queue) = open(&path).await;
        let entries = queue.drain().await.unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(entries[0].payload_remote_id(), Some("remote"));
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let tmp = TempDir::new().unwrap();
        let (_pool, queue) = open(&tmp.path().join("paw.sqlite")).await;

        let mut first = queue
            .add(NewEntry::delete(Collection::Events, "a", None))
            .await
            .unwrap();
        let second = queue
            .add(NewEntry::delete(Collection::Events, "b", None))
            .await
            .unwrap();

        first.record_failure("remote error (500): boom");
        first.status = EntryStatus::Failed;
        queue.update(&first).await.unwrap();

        let entries = queue.drain().await.unwrap();
        assert_eq!(entries[0].op_id, first.op_id);
        assert_eq!(entries[0].attempts, 1);
        assert_eq!(entries[0].status, EntryStatus::Failed);
        assert_eq!(queue.len().await.unwrap(), 1);

        queue.remove(&second.op_id).await.unwrap();
        let entries = queue.drain().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].op_id, first.op_id);
    }
}
