//! Per-key async locks.
//!
//! A record service holds the lock for a record id across the local write
//! and the queue append, and the processor holds it while patching a record
//! after a remote success. That keeps "one queue entry per mutation, local
//! write first" intact on a multi-threaded runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    slots.retain(|_, weak| weak.strong_count() > 0);
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.to_string(), Arc::downgrade(&slot));
                    slot
                }
            }
        };
        slot.lock_owned().await
    }
}
