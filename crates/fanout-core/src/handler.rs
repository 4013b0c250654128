//! The handler capability (§4.6) and the cancellation signal handlers are invoked with (§5).

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

/// A cooperative cancellation signal, backed by a `watch` channel in the teacher's idiom
/// (`trace_dispatcher`'s `outbox_drain_loop`/`lease_reaper_loop` use the same
/// `watch::Sender<bool>`/`watch::Receiver<bool>` pair for graceful shutdown). The dispatcher
/// merges the run's own cancellation with the lease runner's (if the run is lease-scoped) before
/// invoking a handler, per spec §5.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that never fires, for contexts with no cancellation source (e.g. a one-shot test
    /// invocation).
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Resolves immediately if it already has.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }

    /// Combine two signals into one that fires as soon as either does.
    pub fn merge(a: CancelSignal, b: CancelSignal) -> CancelSignal {
        let (tx, rx) = watch::channel(a.is_cancelled() || b.is_cancelled());
        tokio::spawn(async move {
            let mut a = a;
            let mut b = b;
            tokio::select! {
                _ = a.cancelled() => {}
                _ = b.cancelled() => {}
            }
            let _ = tx.send(true);
        });
        CancelSignal::new(rx)
    }
}

/// Context passed to a handler for one message invocation.
pub struct HandlerContext {
    pub cancel: CancelSignal,
    pub attempt: i32,
}

#[derive(Debug)]
pub struct HandlerMessage {
    pub id: uuid::Uuid,
    pub topic: String,
    pub payload: Value,
}

/// A single-method capability mapping one topic to behavior (spec §4.6, §9: "prefer tagged
/// variants or a simple interface, not inheritance" — modeled here as one trait with one method,
/// same shape as `trace_core::Signer`).
#[async_trait]
pub trait Handler: Send + Sync {
    fn topic(&self) -> &str;

    async fn handle(&self, message: &HandlerMessage, ctx: &mut HandlerContext) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_fires_when_either_side_fires() {
        let (tx_a, rx_a) = watch::channel(false);
        let (_tx_b, rx_b) = watch::channel(false);
        let merged = CancelSignal::merge(CancelSignal::new(rx_a), CancelSignal::new(rx_b));

        tx_a.send(true).unwrap();

        let mut merged = merged;
        tokio::time::timeout(std::time::Duration::from_secs(1), merged.cancelled())
            .await
            .expect("merged signal should fire promptly");
        assert!(merged.is_cancelled());
    }

    #[test]
    fn never_is_not_cancelled() {
        assert!(!CancelSignal::never().is_cancelled());
    }
}
