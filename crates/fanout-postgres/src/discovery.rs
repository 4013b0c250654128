use async_trait::async_trait;
use fanout_core::discovery::{Discovery, StoreConfig};
use fanout_core::Result;
use sqlx::{PgPool, Row};

/// Queries the control-plane database's `tenant_databases` table (spec §6 "control-plane bundle").
/// Grounded on the plain `SELECT`-and-map shape of `trace_dispatcher::status::fetch_chain_sync_status`
/// — no joins, no filtering, the whole table is the discovery result.
#[derive(Clone)]
pub struct ControlPlaneDiscovery {
    pool: PgPool,
}

impl ControlPlaneDiscovery {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Discovery for ControlPlaneDiscovery {
    async fn discover(&self) -> Result<Vec<StoreConfig>> {
        let rows = sqlx::query("SELECT identifier, database_url FROM tenant_databases ORDER BY identifier")
            .fetch_all(&self.pool)
            .await?;

        let mut stores = Vec::with_capacity(rows.len());
        for row in rows {
            stores.push(StoreConfig {
                identifier: row.try_get("identifier")?,
                database_url: row.try_get("database_url")?,
            });
        }

        Ok(stores)
    }
}
