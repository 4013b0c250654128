//! Store enumeration (spec §4.7): a static configured list, or a discovery-backed provider
//! refreshed on a timer. The refresh clock is injected (`MonotonicClock`) so the refresh-on-stale
//! behavior is testable with `FakeMonotonicClock` rather than real wall-clock sleeps.

use fanout_core::clock::MonotonicClock;
use fanout_core::discovery::{Discovery, StoreConfig};
use fanout_core::inbox::InboxStore;
use fanout_core::join::JoinCoordinator;
use fanout_core::outbox::OutboxStore;
use fanout_core::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One addressable store: its outbox, its inbox, an optional join coordinator (present whenever
/// this store's outbox participates in fan-out/fan-in, spec §4.3), and a stable identifier for
/// logging/lookup.
#[derive(Clone)]
pub struct StoreHandle {
    pub identifier: String,
    pub outbox: Arc<dyn OutboxStore>,
    pub inbox: Arc<dyn InboxStore>,
    pub join: Option<Arc<dyn JoinCoordinator>>,
}

#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn list(&self) -> Result<Vec<StoreHandle>>;
}

/// Static list, known at construction time. `identifier` is whatever the caller derived from each
/// connection string (spec §4.7 "derived from the database name").
pub struct ConfiguredProvider {
    stores: Vec<StoreHandle>,
}

impl ConfiguredProvider {
    pub fn new(stores: Vec<StoreHandle>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl StoreProvider for ConfiguredProvider {
    async fn list(&self) -> Result<Vec<StoreHandle>> {
        Ok(self.stores.clone())
    }
}

struct CachedState {
    stores: Vec<StoreHandle>,
    last_refresh: Option<Duration>,
}

/// Backed by a [`Discovery`] capability, refreshed lazily on `list()` when the last refresh is
/// older than `refresh_interval`. `build` turns a freshly discovered [`StoreConfig`] into a
/// [`StoreHandle`]; it lives here rather than in `fanout-postgres` so this crate stays free of a
/// concrete database dependency. `build` is fallible so a bad discovered connection string
/// surfaces as a `list()` error rather than panicking the worker.
pub struct DynamicProvider {
    discovery: Arc<dyn Discovery>,
    build: Arc<dyn Fn(&StoreConfig) -> Result<StoreHandle> + Send + Sync>,
    refresh_interval: Duration,
    clock: Arc<dyn MonotonicClock>,
    state: Mutex<CachedState>,
}

impl DynamicProvider {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        build: Arc<dyn Fn(&StoreConfig) -> Result<StoreHandle> + Send + Sync>,
        refresh_interval: Duration,
        clock: Arc<dyn MonotonicClock>,
    ) -> Self {
        Self {
            discovery,
            build,
            refresh_interval,
            clock,
            state: Mutex::new(CachedState {
                stores: Vec::new(),
                last_refresh: None,
            }),
        }
    }

    fn is_stale(&self, now: Duration, last_refresh: Option<Duration>) -> bool {
        match last_refresh {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.refresh_interval,
        }
    }
}

#[async_trait]
impl StoreProvider for DynamicProvider {
    async fn list(&self) -> Result<Vec<StoreHandle>> {
        let now = self.clock.now();
        let needs_refresh = {
            let state = self.state.lock().expect("dynamic provider state poisoned");
            self.is_stale(now, state.last_refresh)
        };

        if !needs_refresh {
            let state = self.state.lock().expect("dynamic provider state poisoned");
            return Ok(state.stores.clone());
        }

        let discovered = self.discovery.discover().await?;
        let stores: Vec<StoreHandle> = discovered
            .iter()
            .map(|config| (self.build)(config))
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.state.lock().expect("dynamic provider state poisoned");
        state.stores = stores.clone();
        state.last_refresh = Some(now);
        Ok(stores)
    }
}
