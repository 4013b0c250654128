//! The lease contract (§4.5): acquire/renew/release of a named, fenced, exclusive lease row.

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A monotonically increasing token returned by every successful `acquire`, used to detect stale
/// holders across process restarts (§ GLOSSARY "fencing token").
pub type Fencing = i64;

#[derive(Debug, Clone, Copy)]
pub struct LeaseGrant {
    pub fencing: Fencing,
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Attempt to acquire `name` for `owner`. Returns `None` if another live owner already holds
    /// it. Returns a fresh, strictly increasing fencing token on success (whether this is a first
    /// acquisition or a steal of an expired lease).
    async fn acquire(&self, name: &str, owner: &str, lease_duration: Duration) -> Result<Option<LeaseGrant>>;

    /// Extend `name`'s expiry, provided `owner` and `fencing` still match the current holder.
    /// Returns `false` (not an error) if the lease was lost out from under the caller.
    async fn renew(&self, name: &str, owner: &str, fencing: Fencing, lease_duration: Duration) -> Result<bool>;

    /// Best-effort release. Returns `false` if `owner`/`fencing` no longer match (already stolen).
    async fn release(&self, name: &str, owner: &str, fencing: Fencing) -> Result<bool>;
}
