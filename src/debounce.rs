//! Keyed debouncer.
//!
//! Scheduling an action under a key replaces whatever was pending under the
//! same key; the action runs once the key has been quiet for the delay.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct Debouncer<K> {
    delay: Duration,
    pending: Arc<Mutex<HashMap<K, (u64, JoinHandle<()>)>>>,
    generation: AtomicU64,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `action` after the delay unless `key` is rescheduled or cancelled
    /// first. Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, key: K, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        // Held across the spawn so the task cannot look itself up before it
        // has been registered.
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        let delay = self.delay;
        let registry = self.pending.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                // A newer schedule may have replaced us after the sleep ended.
                match registry.get(&task_key) {
                    Some((g, _)) if *g == generation => {
                        registry.remove(&task_key);
                    }
                    _ => return,
                }
            }
            action().await;
        });

        if let Some((_, previous)) = pending.insert(key, (generation, handle)) {
            previous.abort();
        }
    }

    /// Drop the pending action for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, (_, handle)) in pending.drain() {
            handle.abort();
        }
    }

    /// Number of keys with an action waiting.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, (_, handle)) in pending.drain() {
            handle.abort();
        }
    }
}
