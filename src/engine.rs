//! Wiring: one store, one queue, one gateway, and the services on top.

use std::sync::Arc;
use std::time::Duration;

use pawtrack_core::queue::SyncQueue;
use pawtrack_core::store::RecordStore;

use crate::config::{Config, SyncConfig};
use crate::db;
use crate::error::SyncResult;
use crate::gateway::RemoteGateway;
use crate::locks::KeyedLocks;
use crate::migrate;
use crate::processor::SyncProcessor;
use crate::services::{CareItems, Contacts, EventTypes, Events, Pets, RecordService, Stamps};
use crate::sqlite_queue::SqliteQueue;
use crate::sqlite_store::SqliteStore;
use crate::trigger::SyncTrigger;

pub struct SyncEngine {
    pub pets: Pets,
    pub events: Events,
    pub contacts: Contacts,
    pub care_items: CareItems,
    pub event_types: EventTypes,
    pub stamps: Stamps,
    pub processor: Arc<SyncProcessor>,
    pub store: Arc<dyn RecordStore>,
    pub queue: Arc<dyn SyncQueue>,
    sync: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn SyncQueue>,
        gateway: Arc<RemoteGateway>,
        sync: &SyncConfig,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let processor = SyncProcessor::new(store.clone(), queue.clone(), gateway, locks.clone())
            .with_max_attempts(sync.max_attempts);

        Self {
            pets: RecordService::new(store.clone(), queue.clone(), locks.clone()),
            events: RecordService::new(store.clone(), queue.clone(), locks.clone()),
            contacts: RecordService::new(store.clone(), queue.clone(), locks.clone()),
            care_items: RecordService::new(store.clone(), queue.clone(), locks.clone()),
            event_types: RecordService::new(store.clone(), queue.clone(), locks.clone()),
            stamps: RecordService::new(store.clone(), queue.clone(), locks),
            processor: Arc::new(processor),
            store,
            queue,
            sync: sync.clone(),
        }
    }

    /// Open the SQLite database named in `config` (creating and migrating it
    /// as needed) and build the production gateway.
    pub async fn open(config: &Config) -> SyncResult<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let queue = Arc::new(SqliteQueue::new(pool));
        let gateway = Arc::new(RemoteGateway::from_config(&config.remote)?);
        Ok(Self::new(store, queue, gateway, &config.sync))
    }

    pub async fn pending_count(&self) -> SyncResult<usize> {
        self.processor.pending_count().await
    }

    /// Background trigger using the configured debounce and interval.
    pub fn trigger(&self) -> SyncTrigger {
        SyncTrigger::new(
            self.processor.clone(),
            Duration::from_millis(self.sync.debounce_ms),
            Duration::from_secs(self.sync.interval_secs),
        )
    }
}
