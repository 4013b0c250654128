//! Postgres-backed implementations of the `fanout-core` store contracts.
//!
//! Connection pooling, migrations, and the `FOR UPDATE SKIP LOCKED` claim discipline all follow
//! `trace-core`'s `lite::pgqueue` module; this crate simply generalizes that shape across the
//! outbox, inbox, lease, join, and discovery contracts.

mod discovery;
mod inbox;
mod join;
mod lease;
mod outbox;

pub use discovery::ControlPlaneDiscovery;
pub use inbox::PgInboxStore;
pub use join::{JoinSpec, PgJoinCoordinator};
pub use lease::PgLeaseStore;
pub use outbox::PgOutboxStore;

use fanout_core::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connects and runs the tenant-bundle migrations embedded in this crate, the same
/// `PgPoolOptions::new().max_connections(n).connect(url)` idiom as `harness::runner::connect_pool`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the tenant-bundle schema (`outbox`, `inbox`, `leases`) and the additive control-plane
/// `tenant_databases` table. Idempotent: every statement is `CREATE ... IF NOT EXISTS`.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
