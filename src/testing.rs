//! Store double that lets a test slip another writer in between steps.
//!
//! Writes scheduled with [`HookedStore::before_acknowledge`],
//! [`HookedStore::before_replace`] or [`HookedStore::before_delete`] run
//! once, right before the next call of that method, against the shared
//! [`InMemoryStore`]. Services built over [`HookedStore::shared`] with their
//! own [`KeyedLocks`](crate::locks::KeyedLocks) behave like a second process
//! on the same database file.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use pawtrack_core::models::Collection;
use pawtrack_core::store::memory::InMemoryStore;
use pawtrack_core::store::RecordStore;

type Hook = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
pub struct HookedStore {
    inner: Arc<InMemoryStore>,
    before_ack: Mutex<Option<Hook>>,
    before_replace: Mutex<Option<Hook>>,
    before_delete: Mutex<Option<Hook>>,
}

impl HookedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The underlying store, without hooks.
    pub fn shared(&self) -> Arc<InMemoryStore> {
        self.inner.clone()
    }

    pub fn before_acknowledge<F>(&self, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        *self.before_ack.lock().unwrap() = Some(Box::pin(write));
    }

    pub fn before_replace<F>(&self, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        *self.before_replace.lock().unwrap() = Some(Box::pin(write));
    }

    pub fn before_delete<F>(&self, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        *self.before_delete.lock().unwrap() = Some(Box::pin(write));
    }
}

async fn run_once(slot: &Mutex<Option<Hook>>) {
    let hook = slot.lock().unwrap().take();
    if let Some(hook) = hook {
        hook.await;
    }
}

#[async_trait]
impl RecordStore for HookedStore {
    async fn put(&self, collection: Collection, id: &str, record: &Value) -> Result<()> {
        self.inner.put(collection, id, record).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        run_once(&self.before_delete).await;
        self.inner.delete(collection, id).await
    }

    async fn replace(
        &self,
        collection: Collection,
        id: &str,
        record: &Value,
        expected_revision: u64,
    ) -> Result<bool> {
        run_once(&self.before_replace).await;
        self.inner
            .replace(collection, id, record, expected_revision)
            .await
    }

    async fn acknowledge(
        &self,
        collection: Collection,
        id: &str,
        revision: Option<u64>,
        remote_id: Option<&str>,
    ) -> Result<bool> {
        run_once(&self.before_ack).await;
        self.inner
            .acknowledge(collection, id, revision, remote_id)
            .await
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>> {
        self.inner.get_all(collection).await
    }
}
