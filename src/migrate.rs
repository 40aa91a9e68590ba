//! Database schema migrations (idempotent).
//!
//! One table per record collection, keyed by local id and holding the
//! record as a JSON document, plus the `sync_queue` table whose
//! autoincrement `seq` column fixes insertion order.

use anyhow::Result;
use sqlx::SqlitePool;

use pawtrack_core::models::Collection;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Table names come from a closed enum, never from user input.
    for collection in Collection::ALL {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            collection.as_str()
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            op_id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            collection TEXT NOT NULL,
            record_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            enqueued_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_queue_record_id ON sync_queue(record_id)")
        .execute(pool)
        .await?;

    Ok(())
}
