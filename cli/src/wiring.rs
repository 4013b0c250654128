//! Composition root: turns a [`FanoutConfig`] into the concrete `fanout-postgres` stores and
//! `fanout-dispatcher` services the `worker` subcommand drives. Kept as plain free functions rather
//! than a struct, the way `harness::migrate::run` takes a `&HarnessConfig` directly.

use crate::config::FanoutConfig;
use anyhow::Context;
use fanout_core::clock::SystemMonotonicClock;
use fanout_core::discovery::Discovery;
use fanout_dispatcher::{
    ConfiguredProvider, DispatcherConfig, DynamicProvider, HandlerResolver, LifecycleConfig, LifecycleService,
    MultiStoreDispatcher, RoundRobin, StoreHandle, StoreProvider,
};
use fanout_postgres::{ControlPlaneDiscovery, PgInboxStore, PgJoinCoordinator, PgLeaseStore, PgOutboxStore};
use std::sync::Arc;

/// Connects to one tenant database and wraps it in a [`StoreHandle`] keyed by `identifier`.
pub async fn store_handle_for(identifier: &str, database_url: &str) -> anyhow::Result<StoreHandle> {
    let pool = fanout_postgres::connect(database_url, 5)
        .await
        .with_context(|| format!("connect to store '{identifier}'"))?;
    fanout_postgres::migrate(&pool)
        .await
        .with_context(|| format!("migrate store '{identifier}'"))?;

    Ok(StoreHandle {
        identifier: identifier.to_string(),
        outbox: Arc::new(PgOutboxStore::new(pool.clone())),
        inbox: Arc::new(PgInboxStore::new(pool.clone())),
        join: Some(Arc::new(PgJoinCoordinator::new(pool))),
    })
}

/// Builds a `fanout-postgres`-backed store provider: a single configured store when discovery is
/// off, or a [`DynamicProvider`] against the control-plane database when it's on (spec §4.7).
pub async fn build_store_provider(cfg: &FanoutConfig) -> anyhow::Result<Box<dyn StoreProvider>> {
    if cfg.uses_discovery {
        let control_plane_url = cfg
            .control_plane_database_url
            .as_deref()
            .context("control plane database url is required when uses_discovery is set")?;
        let control_plane_pool = fanout_postgres::connect(control_plane_url, 5)
            .await
            .context("connect to control plane database")?;
        let discovery: Arc<dyn Discovery> = Arc::new(ControlPlaneDiscovery::new(control_plane_pool));

        let build = Arc::new(|config: &fanout_core::discovery::StoreConfig| -> fanout_core::Result<StoreHandle> {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(&config.database_url)
                .map_err(fanout_core::Error::from)?;
            Ok(StoreHandle {
                identifier: config.identifier.clone(),
                outbox: Arc::new(PgOutboxStore::new(pool.clone())),
                inbox: Arc::new(PgInboxStore::new(pool.clone())),
                join: Some(Arc::new(PgJoinCoordinator::new(pool))),
            })
        });

        Ok(Box::new(DynamicProvider::new(
            discovery,
            build,
            cfg.discovery_refresh_interval(),
            Arc::new(SystemMonotonicClock::default()),
        )))
    } else {
        let store = store_handle_for("default", &cfg.database_url).await?;
        Ok(Box::new(ConfiguredProvider::new(vec![store])))
    }
}

/// Validates startup preconditions (spec §4.9) before any worker loop starts.
pub async fn validate_startup(cfg: &FanoutConfig) -> anyhow::Result<()> {
    let control_plane: Option<Arc<dyn Discovery>> = match &cfg.control_plane_database_url {
        Some(url) => {
            let pool = fanout_postgres::connect(url, 2).await.context("connect to control plane database")?;
            Some(Arc::new(ControlPlaneDiscovery::new(pool)))
        }
        None => None,
    };

    let configured_store_count = if cfg.uses_discovery { 0 } else { 1 };
    let lifecycle_config = LifecycleConfig {
        uses_discovery: cfg.uses_discovery,
        requires_database_at_startup: cfg.requires_database_at_startup,
        configured_store_count,
        control_plane,
    };

    LifecycleService::validate(&lifecycle_config)
        .await
        .map_err(anyhow::Error::from)
        .context("startup precondition failed")
}

/// Assembles a ready-to-run [`MultiStoreDispatcher`], plus the store list observed at startup (used
/// to spin up one [`fanout_dispatcher::CleanupService`] per store without opening a second
/// connection pool per store).
pub async fn build_dispatcher(
    cfg: &FanoutConfig,
    resolver: HandlerResolver,
) -> anyhow::Result<(MultiStoreDispatcher, Vec<StoreHandle>)> {
    let provider = build_store_provider(cfg).await?;
    let stores = provider.list().await.context("list stores")?;
    let dispatcher_config = DispatcherConfig {
        outbox_batch_size: cfg.outbox_batch_size,
        inbox_batch_size: cfg.inbox_batch_size,
        lease_duration: cfg.lease_duration(),
        max_attempts: cfg.max_attempts,
        backoff: fanout_dispatcher::BackoffPolicy::default(),
    };

    let dispatcher = MultiStoreDispatcher::new(provider, Box::new(RoundRobin::new()), resolver, dispatcher_config);
    Ok((dispatcher, stores))
}

/// Builds the lease the worker process holds for the lifetime of its run, if `lease_name` is set.
pub async fn acquire_lease(
    cfg: &FanoutConfig,
    lease_name: &str,
    owner: &str,
) -> anyhow::Result<Option<fanout_dispatcher::LeaseRunner>> {
    let pool = fanout_postgres::connect(&cfg.database_url, 2)
        .await
        .context("connect to lease store")?;
    let store: Arc<dyn fanout_core::lease::LeaseStore> = Arc::new(PgLeaseStore::new(pool));
    let clock: Arc<dyn fanout_core::clock::MonotonicClock> = Arc::new(SystemMonotonicClock::default());

    fanout_dispatcher::LeaseRunner::acquire(lease_name, owner, cfg.lease_duration(), cfg.renew_fraction, store, clock)
        .await
        .context("acquire lease")
}
