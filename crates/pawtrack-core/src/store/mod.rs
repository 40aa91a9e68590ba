//! Local record store abstraction.
//!
//! The [`RecordStore`] trait is a key-value store organized into named
//! [`Collection`]s, each record keyed by its local identifier and stored as
//! a JSON document. Every single-record operation is atomic; the store
//! offers no multi-record transactions.
//!
//! Several processes may share one store (`paw watch` next to one-off
//! commands), so writes that race with the sync processor go through the
//! conditional operations [`replace`](RecordStore::replace) and
//! [`acknowledge`](RecordStore::acknowledge) instead of read-then-`put`.
//!
//! Typed access goes through the free functions [`load`], [`save`],
//! [`load_all`], and [`find`], which (de)serialize [`Record<T>`] values.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Collection, Entity, Record};

/// Predicate used by [`RecordStore::query`].
pub type Predicate<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

/// Abstract local storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put`](RecordStore::put) | Upsert a record by id, overwriting in place |
/// | [`get`](RecordStore::get) | Fetch one record, `None` when absent |
/// | [`delete`](RecordStore::delete) | Remove by id, returning what was removed |
/// | [`replace`](RecordStore::replace) | Overwrite only if the revision is unchanged |
/// | [`acknowledge`](RecordStore::acknowledge) | Record a remote success on the stored copy |
/// | [`get_all`](RecordStore::get_all) | Every record in a collection, unordered |
/// | [`query`](RecordStore::query) | `get_all` plus a filter |
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, collection: Collection, id: &str, record: &Value) -> Result<()>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    /// Remove by id. Returns the removed record, `None` when absent.
    async fn delete(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    /// Overwrite the record only while its stored `revision` is still
    /// `expected_revision`. A `remote_id` already stored wins over the one in
    /// `record`. Returns `false`, writing nothing, when the record is gone or
    /// has moved on.
    async fn replace(
        &self,
        collection: Collection,
        id: &str,
        record: &Value,
        expected_revision: u64,
    ) -> Result<bool>;

    /// Record a remote success in one step: store `remote_id` if the record
    /// has none, and set `synced` if its revision still equals `revision`.
    /// Returns `false` when the record does not exist.
    async fn acknowledge(
        &self,
        collection: Collection,
        id: &str,
        revision: Option<u64>,
        remote_id: Option<&str>,
    ) -> Result<bool>;

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>>;

    /// Records satisfying `predicate`. No index guarantees.
    async fn query(&self, collection: Collection, predicate: Predicate<'_>) -> Result<Vec<Value>> {
        let all = self.get_all(collection).await?;
        Ok(all.into_iter().filter(|v| predicate(v)).collect())
    }
}

/// Stored `revision` of a raw record.
pub fn revision_of(record: &Value) -> Option<u64> {
    record.get("revision").and_then(Value::as_u64)
}

/// Stored `remote_id` of a raw record.
pub fn remote_id_of(record: &Value) -> Option<&str> {
    record.get("remote_id").and_then(Value::as_str)
}

/// Load a typed record by id.
pub async fn load<T: Entity>(store: &dyn RecordStore, id: &str) -> Result<Option<Record<T>>> {
    match store.get(T::COLLECTION, id).await? {
        Some(value) => Ok(Some(Record::from_json(value)?)),
        None => Ok(None),
    }
}

/// Upsert a typed record.
pub async fn save<T: Entity>(store: &dyn RecordStore, record: &Record<T>) -> Result<()> {
    store
        .put(T::COLLECTION, record.id(), &record.to_json()?)
        .await
}

/// Load every record of a collection.
pub async fn load_all<T: Entity>(store: &dyn RecordStore) -> Result<Vec<Record<T>>> {
    store
        .get_all(T::COLLECTION)
        .await?
        .into_iter()
        .map(Record::from_json)
        .collect()
}

/// Load every record of a collection that satisfies `predicate`.
pub async fn find<T, F>(store: &dyn RecordStore, predicate: F) -> Result<Vec<Record<T>>>
where
    T: Entity,
    F: Fn(&Record<T>) -> bool + Send,
{
    Ok(load_all::<T>(store)
        .await?
        .into_iter()
        .filter(|r| predicate(r))
        .collect())
}
