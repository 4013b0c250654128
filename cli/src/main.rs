use anyhow::Context;
use clap::{Parser, Subcommand};
use fanout_core::handler::CancelSignal;
use fanout_dispatcher::{CleanupService, HandlerResolver};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod wiring;

use config::FanoutConfig;

#[derive(Parser, Debug)]
#[command(name = "fanout-cli")]
#[command(about = "Multi-store outbox/inbox dispatcher runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the outbox/inbox/leases schema to the configured database(s).
    Migrate,

    /// Check startup preconditions (spec §4.9) without starting the worker loop.
    Validate,

    /// Run the dispatcher, lease renewal, and cleanup loops until interrupted.
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = FanoutConfig::from_env().context("load fanout config")?;

    match cli.command {
        Command::Migrate => run_migrate(&cfg).await,
        Command::Validate => run_validate(&cfg).await,
        Command::Worker => run_worker(&cfg).await,
    }
}

async fn run_migrate(cfg: &FanoutConfig) -> anyhow::Result<()> {
    let pool = fanout_postgres::connect(&cfg.database_url, 5).await.context("connect database")?;
    fanout_postgres::migrate(&pool).await.context("run migrations")?;

    if let Some(control_plane_url) = &cfg.control_plane_database_url {
        let control_plane_pool = fanout_postgres::connect(control_plane_url, 5)
            .await
            .context("connect control plane database")?;
        fanout_postgres::migrate(&control_plane_pool).await.context("run control plane migrations")?;
    }

    tracing::info!(event = "fanout.migrate.complete", "migrations complete");
    Ok(())
}

async fn run_validate(cfg: &FanoutConfig) -> anyhow::Result<()> {
    wiring::validate_startup(cfg).await?;
    tracing::info!(event = "fanout.validate.ok", "startup preconditions satisfied");
    Ok(())
}

/// Runs the dispatcher poll loop, a cleanup loop per store, and (if configured) a held lease,
/// until SIGINT. Loop/shutdown shape mirrors `trace_dispatcher::outbox_drain_loop`: check the
/// shutdown signal, do the work, then `tokio::select!` between a sleep and the shutdown signal.
async fn run_worker(cfg: &FanoutConfig) -> anyhow::Result<()> {
    wiring::validate_startup(cfg).await?;

    let owner = uuid::Uuid::new_v4().to_string();
    let lease = wiring::acquire_lease(cfg, "fanout-worker", &owner).await?;
    let cancel = match &lease {
        Some(runner) => runner.cancellation(),
        None => CancelSignal::never(),
    };

    // Application-specific topics are registered by the embedding binary; this composition root
    // carries no handlers of its own.
    let resolver = HandlerResolver::new();
    let (dispatcher, stores) = wiring::build_dispatcher(cfg, resolver).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut cleanup_tasks = Vec::with_capacity(stores.len());
    for store in stores {
        let identifier = store.identifier.clone();
        let cleanup = CleanupService::new(store, cfg.retention_period(), cfg.cleanup_interval());
        let cleanup_shutdown_rx = shutdown_rx.clone();
        cleanup_tasks.push((identifier, tokio::spawn(async move { cleanup.run(cleanup_shutdown_rx).await })));
    }

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(event = "fanout.worker.shutdown_requested", "shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut shutdown_rx = shutdown_rx;
    loop {
        if *shutdown_rx.borrow() || cancel.is_cancelled() {
            break;
        }

        if let Some(runner) = &lease {
            runner.try_renew_now().await;
            if runner.is_lost() {
                tracing::warn!(event = "fanout.worker.lease_lost", "lease lost; stopping worker");
                break;
            }
        }

        let processed = dispatcher.run_once(cancel.clone()).await.context("dispatcher run")?;
        if processed == 0 {
            tokio::select! {
                _ = tokio::time::sleep(cfg.dispatcher_poll_interval()) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }

    if let Some(runner) = &lease {
        let _ = runner.release().await;
    }

    for (identifier, task) in cleanup_tasks {
        task.abort();
        tracing::debug!(event = "fanout.worker.cleanup_stopped", store = %identifier, "cleanup loop stopped");
    }
    tracing::info!(event = "fanout.worker.stopped", "worker stopped");
    Ok(())
}
