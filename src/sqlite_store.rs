//! SQLite-backed [`RecordStore`] implementation.
//!
//! Each [`Collection`] maps to its own table (see [`crate::migrate`]);
//! records are stored as JSON text keyed by local id. Every method is a
//! single statement, so every single-record operation is atomic, including
//! against other processes holding the same file. The conditional writes
//! use SQLite's JSON functions to test and patch the stored body in place.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use pawtrack_core::models::Collection;
use pawtrack_core::store::RecordStore;

/// SQLite implementation of the [`RecordStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn put(&self, collection: Collection, id: &str, record: &Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, body, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
            collection.as_str()
        ))
        .bind(id)
        .bind(serde_json::to_string(record)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let row = sqlx::query(&format!(
            "SELECT body FROM {} WHERE id = ?",
            collection.as_str()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let body: Option<String> = sqlx::query_scalar(&format!(
            "DELETE FROM {} WHERE id = ? RETURNING body",
            collection.as_str()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn replace(
        &self,
        collection: Collection,
        id: &str,
        record: &Value,
        expected_revision: u64,
    ) -> Result<bool> {
        let body = serde_json::to_string(record)?;
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET
                body = CASE
                    WHEN json_type(body, '$.remote_id') = 'text'
                    THEN json_set(?, '$.remote_id', json_extract(body, '$.remote_id'))
                    ELSE ?
                END,
                updated_at = ?
            WHERE id = ? AND json_extract(body, '$.revision') = ?
            "#,
            collection.as_str()
        ))
        .bind(&body)
        .bind(&body)
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(id)
        .bind(expected_revision as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn acknowledge(
        &self,
        collection: Collection,
        id: &str,
        revision: Option<u64>,
        remote_id: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET
                body = json_set(
                    body,
                    '$.remote_id', CASE
                        WHEN json_type(body, '$.remote_id') = 'text'
                        THEN json_extract(body, '$.remote_id')
                        ELSE ?
                    END,
                    '$.synced', CASE
                        WHEN json_type(body, '$.synced') = 'true'
                          OR json_extract(body, '$.revision') = ?
                        THEN json('true')
                        ELSE json('false')
                    END
                ),
                updated_at = ?
            WHERE id = ?
            "#,
            collection.as_str()
        ))
        .bind(remote_id)
        .bind(revision.map(|r| r as i64))
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>> {
        let rows = sqlx::query(&format!("SELECT body FROM {}", collection.as_str()))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let body: String = row.get("body");
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }
}
