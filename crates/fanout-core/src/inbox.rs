//! The inbox contract (§4.2): idempotent receive-and-acknowledge with retention cleanup.

use crate::outbox::MutationOutcome;
use crate::owner::OwnerToken;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStatus {
    Seen,
    InFlight,
    Done,
    Dead,
}

impl InboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InboxStatus::Seen => "seen",
            InboxStatus::InFlight => "in_flight",
            InboxStatus::Done => "done",
            InboxStatus::Dead => "dead",
        }
    }
}

impl std::str::FromStr for InboxStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "seen" => Ok(InboxStatus::Seen),
            "in_flight" => Ok(InboxStatus::InFlight),
            "done" => Ok(InboxStatus::Done),
            "dead" => Ok(InboxStatus::Dead),
            other => Err(crate::Error::msg(format!("unknown inbox status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboxWorkItem {
    pub id: Uuid,
    pub message_id: String,
    pub source: String,
    pub topic: String,
    pub payload: Value,
    pub attempts: i32,
}

#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Idempotent insert keyed on `(message_id, source)`. On conflict, only `last_seen_at` moves;
    /// status/attempts/payload of an existing row are left untouched.
    async fn enqueue(&self, message_id: &str, source: &str, topic: &str, payload: Value) -> Result<()>;

    /// Atomically select up to `batch_size` visible `Seen` rows, flip them to `InFlight` under
    /// `owner`, and return them.
    async fn claim(
        &self,
        owner: OwnerToken,
        lease_duration: Duration,
        batch_size: i64,
    ) -> Result<Vec<InboxWorkItem>>;

    /// Terminal success transition for every id currently owned by `owner`. Ids not owned are
    /// left untouched (no-op, not an error).
    async fn ack(&self, owner: OwnerToken, ids: &[Uuid]) -> Result<MutationOutcome>;

    /// Retry transition: returns the row to `Seen` (immediately, or after `delay` via
    /// `visible_at`), increments `attempts`, records `last_error`.
    async fn abandon(
        &self,
        owner: OwnerToken,
        ids: &[Uuid],
        last_error: &str,
        delay: Option<Duration>,
    ) -> Result<MutationOutcome>;

    /// Terminal dead-letter transition.
    async fn fail(&self, owner: OwnerToken, ids: &[Uuid], error: &str) -> Result<MutationOutcome>;

    /// Administrative `Dead -> Seen` transition.
    async fn revive(&self, ids: &[Uuid], reason: &str, delay: Option<Duration>) -> Result<()>;

    /// Return any `InFlight` row whose lease has elapsed to `Seen`. Returns the count reaped.
    async fn reap_expired(&self) -> Result<u64>;

    /// Delete `Done`/`Dead` rows whose terminal timestamp is older than `retention`.
    async fn cleanup_processed(&self, retention: Duration) -> Result<u64>;
}
