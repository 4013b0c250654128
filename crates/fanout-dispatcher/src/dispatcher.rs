//! One processing pass across every configured store (spec §4.4). Loop/shutdown shape follows
//! `trace_dispatcher::outbox_drain_loop`; the claim-then-dispatch-then-report body is new, driven
//! by the spec's state machine rather than the teacher's single-queue drain.

use crate::backoff::BackoffPolicy;
use crate::handler::HandlerResolver;
use crate::selection::SelectionStrategy;
use crate::store_provider::StoreProvider;
use fanout_core::handler::{CancelSignal, HandlerContext, HandlerMessage};
use fanout_core::{OwnerToken, Result};
use std::sync::Mutex;
use std::time::Duration;

pub struct DispatcherConfig {
    pub outbox_batch_size: i64,
    pub inbox_batch_size: i64,
    pub lease_duration: Duration,
    pub max_attempts: i32,
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            outbox_batch_size: 50,
            inbox_batch_size: 50,
            lease_duration: Duration::from_secs(30),
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

enum ClaimedItem {
    Outbox(fanout_core::outbox::OutboxWorkItem),
    Inbox(fanout_core::inbox::InboxWorkItem),
}

impl ClaimedItem {
    fn id(&self) -> uuid::Uuid {
        match self {
            ClaimedItem::Outbox(item) => item.id,
            ClaimedItem::Inbox(item) => item.id,
        }
    }

    fn topic(&self) -> &str {
        match self {
            ClaimedItem::Outbox(item) => &item.topic,
            ClaimedItem::Inbox(item) => &item.topic,
        }
    }

    fn payload(&self) -> &serde_json::Value {
        match self {
            ClaimedItem::Outbox(item) => &item.payload,
            ClaimedItem::Inbox(item) => &item.payload,
        }
    }

    fn attempt(&self) -> i32 {
        match self {
            ClaimedItem::Outbox(item) => item.retry_count + 1,
            ClaimedItem::Inbox(item) => item.attempts + 1,
        }
    }

    /// `Some` only for an outbox item that carries a join correlation (spec §4.3); the inbox has
    /// no join concept.
    fn join_id(&self) -> Option<uuid::Uuid> {
        match self {
            ClaimedItem::Outbox(item) => item.join_id,
            ClaimedItem::Inbox(_) => None,
        }
    }
}

/// Orchestrates one run across every store the provider currently lists (spec §4.4, combined with
/// DESIGN.md Open Question 5: outbox and inbox are claimed together per store per run, sharing one
/// `remaining_budget` and one owner token).
pub struct MultiStoreDispatcher {
    provider: Box<dyn StoreProvider>,
    selection: Box<dyn SelectionStrategy>,
    resolver: HandlerResolver,
    config: DispatcherConfig,
    last_non_empty: Mutex<Vec<usize>>,
}

impl MultiStoreDispatcher {
    pub fn new(
        provider: Box<dyn StoreProvider>,
        selection: Box<dyn SelectionStrategy>,
        resolver: HandlerResolver,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            provider,
            selection,
            resolver,
            config,
            last_non_empty: Mutex::new(Vec::new()),
        }
    }

    /// Runs one pass and returns the total number of work items processed. Never waits on I/O
    /// beyond each claimed item's own handler invocation; the caller decides whether to sleep when
    /// this returns zero (spec §4.4 "Back-pressure").
    pub async fn run_once(&self, cancel: CancelSignal) -> Result<u64> {
        if cancel.is_cancelled() {
            return Ok(0);
        }

        let stores = self.provider.list().await?;
        if stores.is_empty() {
            return Ok(0);
        }

        let owner = OwnerToken::new();
        let last_non_empty = self.last_non_empty.lock().expect("dispatcher state poisoned").clone();
        let order = self.selection.order(stores.len(), &last_non_empty);

        let mut processed = 0u64;
        let mut newly_non_empty = Vec::new();
        let mut remaining_budget = self.config.outbox_batch_size + self.config.inbox_batch_size;

        for index in order {
            if remaining_budget <= 0 {
                break;
            }
            let store = &stores[index];

            let outbox_items = store
                .outbox
                .claim_due(remaining_budget.min(self.config.outbox_batch_size), owner, self.config.lease_duration)
                .await?;
            remaining_budget -= outbox_items.len() as i64;

            let inbox_items = if remaining_budget > 0 {
                let items = store
                    .inbox
                    .claim(owner, self.config.lease_duration, remaining_budget.min(self.config.inbox_batch_size))
                    .await?;
                remaining_budget -= items.len() as i64;
                items
            } else {
                Vec::new()
            };

            if !outbox_items.is_empty() || !inbox_items.is_empty() {
                newly_non_empty.push(index);
            }

            let mut items: Vec<ClaimedItem> = Vec::with_capacity(outbox_items.len() + inbox_items.len());
            items.extend(outbox_items.into_iter().map(ClaimedItem::Outbox));
            items.extend(inbox_items.into_iter().map(ClaimedItem::Inbox));

            for item in items {
                self.dispatch_one(store, owner, item, cancel.clone()).await?;
                processed += 1;
            }
        }

        *self.last_non_empty.lock().expect("dispatcher state poisoned") = newly_non_empty;
        Ok(processed)
    }

    async fn dispatch_one(
        &self,
        store: &crate::store_provider::StoreHandle,
        owner: OwnerToken,
        item: ClaimedItem,
        cancel: CancelSignal,
    ) -> Result<()> {
        let Some(handler) = self.resolver.resolve(item.topic()) else {
            tracing::warn!(
                event = "fanout.dispatch.no_handler",
                store = %store.identifier,
                topic = item.topic(),
                "no handler registered for topic"
            );
            self.give_up(store, owner, &item, "no handler").await?;
            return Ok(());
        };

        let message = HandlerMessage {
            id: item.id(),
            topic: item.topic().to_string(),
            payload: item.payload().clone(),
        };
        let mut ctx = HandlerContext {
            cancel,
            attempt: item.attempt(),
        };

        match handler.handle(&message, &mut ctx).await {
            Ok(()) => {
                self.complete(store, owner, &item).await?;
            }
            Err(_err) if ctx.cancel.is_cancelled() => {
                // spec §5: a handler that observes cancellation is treated as a reschedule/abandon
                // with zero delay, never as a give-up — the run's own cancellation (or a lost
                // lease) is not evidence the message itself is poison.
                tracing::warn!(
                    event = "fanout.dispatch.cancelled",
                    store = %store.identifier,
                    topic = item.topic(),
                    "handler observed cancellation; rescheduling with no delay"
                );
                self.retry_with_max_attempts(store, owner, &item, Duration::ZERO, "cancelled", i32::MAX)
                    .await?;
            }
            Err(err) => {
                let next_attempt = item.attempt() + 1;
                if next_attempt > self.config.max_attempts {
                    tracing::warn!(
                        event = "fanout.dispatch.give_up",
                        store = %store.identifier,
                        topic = item.topic(),
                        error = %err,
                        "handler failed past max_attempts"
                    );
                    self.give_up(store, owner, &item, &err.to_string()).await?;
                } else {
                    let delay = self.config.backoff.delay_for(next_attempt);
                    tracing::warn!(
                        event = "fanout.dispatch.retry",
                        store = %store.identifier,
                        topic = item.topic(),
                        error = %err,
                        attempt = next_attempt,
                        "handler failed, scheduling retry"
                    );
                    self.retry(store, owner, &item, delay, &err.to_string()).await?;
                }
            }
        }

        Ok(())
    }

    /// Notifies this store's join coordinator, if any, after an outbox mutation that may have
    /// landed the row in a terminal status (spec §4.3, global invariant 5). A no-op for inbox
    /// items and for outbox items with no `join_id`; the coordinator itself re-checks the row's
    /// actual status and is a no-op if it didn't actually go terminal (e.g. a plain retry).
    async fn notify_join(&self, store: &crate::store_provider::StoreHandle, item: &ClaimedItem) -> Result<()> {
        if item.join_id().is_none() {
            return Ok(());
        }
        let Some(join) = &store.join else {
            return Ok(());
        };
        join.on_child_terminal(item.id()).await
    }

    async fn complete(&self, store: &crate::store_provider::StoreHandle, owner: OwnerToken, item: &ClaimedItem) -> Result<()> {
        match item {
            ClaimedItem::Outbox(work) => {
                store.outbox.mark_dispatched(work.id, owner).await?;
            }
            ClaimedItem::Inbox(work) => {
                store.inbox.ack(owner, std::slice::from_ref(&work.id)).await?;
            }
        }
        self.notify_join(store, item).await
    }

    async fn retry(
        &self,
        store: &crate::store_provider::StoreHandle,
        owner: OwnerToken,
        item: &ClaimedItem,
        delay: Duration,
        error: &str,
    ) -> Result<()> {
        self.retry_with_max_attempts(store, owner, item, delay, error, self.config.max_attempts)
            .await
    }

    /// Same as `retry`, but lets the caller override the `max_attempts` the store checks
    /// `retry_count` against. Cancellation (spec §5) always rescheds with `i32::MAX` here, so the
    /// run's own shutdown never consumes the message's real retry budget or dead-letters it.
    async fn retry_with_max_attempts(
        &self,
        store: &crate::store_provider::StoreHandle,
        owner: OwnerToken,
        item: &ClaimedItem,
        delay: Duration,
        error: &str,
        max_attempts: i32,
    ) -> Result<()> {
        match item {
            ClaimedItem::Outbox(work) => {
                store.outbox.reschedule(work.id, owner, delay, error, max_attempts).await?;
            }
            ClaimedItem::Inbox(work) => {
                store
                    .inbox
                    .abandon(owner, std::slice::from_ref(&work.id), error, Some(delay))
                    .await?;
            }
        }
        self.notify_join(store, item).await
    }

    async fn give_up(
        &self,
        store: &crate::store_provider::StoreHandle,
        owner: OwnerToken,
        item: &ClaimedItem,
        error: &str,
    ) -> Result<()> {
        match item {
            ClaimedItem::Outbox(work) => {
                store.outbox.fail(work.id, owner, error).await?;
            }
            ClaimedItem::Inbox(work) => {
                store.inbox.fail(owner, std::slice::from_ref(&work.id), error).await?;
            }
        }
        self.notify_join(store, item).await
    }
}
