//! When drains happen.
//!
//! Local mutations call [`SyncTrigger::request_sync`], which coalesces
//! bursts into a single drain after a quiet period. [`SyncTrigger::run`]
//! additionally drains on a fixed interval until cancelled. Drain failures
//! are logged; the entries stay queued for the next trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::debounce::Debouncer;
use crate::processor::SyncProcessor;

const DRAIN_KEY: &str = "drain";

pub struct SyncTrigger {
    processor: Arc<SyncProcessor>,
    debouncer: Debouncer<&'static str>,
    interval: Duration,
    cancel: CancellationToken,
}

impl SyncTrigger {
    pub fn new(processor: Arc<SyncProcessor>, debounce: Duration, interval: Duration) -> Self {
        Self {
            processor,
            debouncer: Debouncer::new(debounce),
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) and any in-flight drain between
    /// entries.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask for a drain soon. Repeated requests within the debounce window
    /// collapse into one.
    pub fn request_sync(&self) {
        let processor = self.processor.clone();
        let cancel = self.cancel.clone();
        self.debouncer.schedule(DRAIN_KEY, move || async move {
            drain_logged(&processor, &cancel).await;
        });
    }

    /// Drain immediately, then every `interval`, until cancelled.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    drain_logged(&self.processor, &self.cancel).await;
                }
            }
        }
        self.debouncer.cancel_all();
        tracing::info!("sync trigger stopped");
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

async fn drain_logged(processor: &SyncProcessor, cancel: &CancellationToken) {
    if let Err(e) = processor.drain_until_cancelled(cancel).await {
        tracing::warn!(error = %e, "background drain failed");
    }
}
