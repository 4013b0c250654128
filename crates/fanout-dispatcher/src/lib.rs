//! Orchestration layer driving the `fanout-core` contracts: handler resolution, store discovery,
//! selection, the multi-store dispatcher loop, the router, and the cleanup/lifecycle/lease-runner
//! background services. Database-agnostic — every module here is generic over the `fanout-core`
//! traits and has no direct `sqlx` dependency, mirroring the `trace-dispatcher` / `trace-core`
//! split in the teacher repo.

pub mod backoff;
pub mod cleanup;
pub mod dispatcher;
pub mod handler;
pub mod lease_runner;
pub mod lifecycle;
pub mod router;
pub mod selection;
pub mod store_provider;

#[cfg(test)]
mod tests_support;

pub use backoff::BackoffPolicy;
pub use cleanup::CleanupService;
pub use dispatcher::{DispatcherConfig, MultiStoreDispatcher};
pub use handler::HandlerResolver;
pub use lease_runner::LeaseRunner;
pub use lifecycle::{LifecycleConfig, LifecycleService};
pub use router::Router;
pub use selection::{DrainFirst, RoundRobin, SelectionStrategy};
pub use store_provider::{ConfiguredProvider, DynamicProvider, StoreHandle, StoreProvider};
