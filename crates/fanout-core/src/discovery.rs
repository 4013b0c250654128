//! Store discovery (§4.7): how the `DynamicProvider` learns which tenant databases exist.

use crate::Result;
use async_trait::async_trait;

/// Connection configuration for one tenant database, as returned by a [`Discovery`]
/// implementation or supplied statically to a `ConfiguredProvider`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Stable identifier for this store (derived from the database name for a configured store;
    /// whatever the control plane uses as a primary key for a discovered one).
    pub identifier: String,
    pub database_url: String,
}

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<StoreConfig>>;
}
