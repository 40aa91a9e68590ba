//! In-memory [`RecordStore`] implementation for testing and WASM targets.
//!
//! Uses one `HashMap` per collection behind a `std::sync::RwLock`.
//! Nothing survives the process.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::models::Collection;

use super::{remote_id_of, revision_of, RecordStore};

type Tables = HashMap<Collection, HashMap<String, Value>>;

/// In-memory store for tests and WASM environments.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn put(&self, collection: Collection, id: &str, record: &Value) -> Result<()> {
        self.write()?
            .entry(collection)
            .or_default()
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        Ok(self
            .read()?
            .get(&collection)
            .and_then(|table| table.get(id))
            .cloned())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        Ok(self
            .write()?
            .get_mut(&collection)
            .and_then(|table| table.remove(id)))
    }

    async fn replace(
        &self,
        collection: Collection,
        id: &str,
        record: &Value,
        expected_revision: u64,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        let Some(stored) = tables.get_mut(&collection).and_then(|t| t.get_mut(id)) else {
            return Ok(false);
        };
        if revision_of(stored) != Some(expected_revision) {
            return Ok(false);
        }

        let mut next = record.clone();
        if let Some(remote_id) = remote_id_of(stored) {
            next["remote_id"] = Value::String(remote_id.to_string());
        }
        *stored = next;
        Ok(true)
    }

    async fn acknowledge(
        &self,
        collection: Collection,
        id: &str,
        revision: Option<u64>,
        remote_id: Option<&str>,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        let Some(stored) = tables.get_mut(&collection).and_then(|t| t.get_mut(id)) else {
            return Ok(false);
        };

        if let Some(remote_id) = remote_id.filter(|_| remote_id_of(stored).is_none()) {
            stored["remote_id"] = Value::String(remote_id.to_string());
        }
        if revision.is_some() && revision == revision_of(stored) {
            stored["synced"] = Value::Bool(true);
        }
        Ok(true)
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>> {
        Ok(self
            .read()?
            .get(&collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }
}
