//! Startup precondition checks (spec §4.9). Run once before the worker fabric comes up; a failure
//! here is fatal and distinct from any steady-state error.

use fanout_core::discovery::Discovery;
use fanout_core::Result;
use std::sync::Arc;

pub struct LifecycleConfig {
    pub uses_discovery: bool,
    pub requires_database_at_startup: bool,
    pub configured_store_count: usize,
    pub control_plane: Option<Arc<dyn Discovery>>,
}

pub struct LifecycleService;

impl LifecycleService {
    /// Validates startup preconditions, returning an error describing which one failed.
    pub async fn validate(config: &LifecycleConfig) -> Result<()> {
        if !config.uses_discovery && config.requires_database_at_startup && config.configured_store_count == 0 {
            return Err(fanout_core::Error::msg("At least one database is required"));
        }

        if let Some(control_plane) = &config.control_plane {
            control_plane
                .discover()
                .await
                .map_err(|err| fanout_core::Error::msg(format!("control plane unreachable: {err}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fanout_core::discovery::StoreConfig;

    struct FailingDiscovery;

    #[async_trait]
    impl Discovery for FailingDiscovery {
        async fn discover(&self) -> Result<Vec<StoreConfig>> {
            Err(fanout_core::Error::msg("connection refused"))
        }
    }

    struct WorkingDiscovery;

    #[async_trait]
    impl Discovery for WorkingDiscovery {
        async fn discover(&self) -> Result<Vec<StoreConfig>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn static_mode_with_no_configured_stores_fails_when_required() {
        let config = LifecycleConfig {
            uses_discovery: false,
            requires_database_at_startup: true,
            configured_store_count: 0,
            control_plane: None,
        };
        let err = LifecycleService::validate(&config).await.unwrap_err();
        assert!(err.to_string().contains("At least one database is required"));
    }

    #[tokio::test]
    async fn discovery_mode_tolerates_empty_list_when_not_required() {
        let config = LifecycleConfig {
            uses_discovery: true,
            requires_database_at_startup: false,
            configured_store_count: 0,
            control_plane: None,
        };
        LifecycleService::validate(&config).await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_control_plane_is_reported_distinctly() {
        let config = LifecycleConfig {
            uses_discovery: true,
            requires_database_at_startup: false,
            configured_store_count: 0,
            control_plane: Some(Arc::new(FailingDiscovery)),
        };
        let err = LifecycleService::validate(&config).await.unwrap_err();
        assert!(err.to_string().contains("control plane unreachable"));
    }

    #[tokio::test]
    async fn reachable_control_plane_passes_even_with_zero_tenants() {
        let config = LifecycleConfig {
            uses_discovery: true,
            requires_database_at_startup: false,
            configured_store_count: 0,
            control_plane: Some(Arc::new(WorkingDiscovery)),
        };
        LifecycleService::validate(&config).await.unwrap();
    }
}
