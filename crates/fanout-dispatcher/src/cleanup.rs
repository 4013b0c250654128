//! Periodic retention cleanup (spec §4.10), one worker per store covering both its outbox and its
//! inbox. Shape lifted directly from `trace_dispatcher::outbox_drain_loop` /
//! `lease_reaper_loop`: poll on an interval, `tokio::select!` against a shutdown `watch`, log and
//! swallow transient errors (including a missing relation) rather than letting them kill the loop.

use crate::store_provider::StoreHandle;
use std::time::Duration;
use tokio::sync::watch;

pub struct CleanupService {
    store: StoreHandle,
    retention: Duration,
    interval: Duration,
}

impl CleanupService {
    pub fn new(store: StoreHandle, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Runs one cleanup pass against both the outbox and the inbox, returning the total row count
    /// deleted. A missing-relation failure on either side is logged and treated as zero deleted,
    /// not propagated — the schema may simply not be deployed yet (spec §4.2).
    pub async fn tick_once(&self) -> u64 {
        let mut deleted = 0u64;

        match self.store.outbox.cleanup_processed(self.retention).await {
            Ok(count) => deleted += count,
            Err(err) => {
                tracing::warn!(
                    event = "fanout.cleanup.outbox.error",
                    store = %self.store.identifier,
                    error = %err,
                    "outbox cleanup error"
                );
            }
        }

        match self.store.inbox.cleanup_processed(self.retention).await {
            Ok(count) => deleted += count,
            Err(err) => {
                tracing::warn!(
                    event = "fanout.cleanup.inbox.error",
                    store = %self.store.identifier,
                    error = %err,
                    "inbox cleanup error"
                );
            }
        }

        tracing::info!(
            event = "fanout.cleanup.tick",
            store = %self.store.identifier,
            deleted,
            "cleanup tick complete"
        );
        deleted
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                return;
            }

            self.tick_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }
}
