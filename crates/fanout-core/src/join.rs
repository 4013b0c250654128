//! The join coordinator capability (§4.3): notified once an outbox item carrying a `join_id`
//! reaches a terminal status, so the parent `join.wait` row's pending count can be decremented
//! and the join completed once the last child lands.

use crate::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Implemented by the concrete store crate (see `fanout_postgres::PgJoinCoordinator`) and driven
/// by the dispatcher after any terminal-or-potentially-terminal transition of an outbox item that
/// carries a `join_id`. Implementations must be idempotent and a no-op for a child whose parent
/// has already gone terminal or whose own status isn't actually terminal yet.
#[async_trait]
pub trait JoinCoordinator: Send + Sync {
    async fn on_child_terminal(&self, child_id: Uuid) -> Result<()>;
}
