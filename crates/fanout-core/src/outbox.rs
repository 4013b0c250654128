//! The outbox contract (§4.1): a claim-and-dispatch state machine with lease timeouts, retry and
//! dead-letter policy.

use crate::owner::OwnerToken;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Ready,
    InFlight,
    Done,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Ready => "ready",
            OutboxStatus::InFlight => "in_flight",
            OutboxStatus::Done => "done",
            OutboxStatus::Failed => "failed",
            OutboxStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Done | OutboxStatus::Failed | OutboxStatus::Dead)
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ready" => Ok(OutboxStatus::Ready),
            "in_flight" => Ok(OutboxStatus::InFlight),
            "done" => Ok(OutboxStatus::Done),
            "failed" => Ok(OutboxStatus::Failed),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(crate::Error::msg(format!("unknown outbox status: {other}"))),
        }
    }
}

/// A row claimed off the outbox: everything a handler needs, plus enough bookkeeping for the
/// dispatcher to report the outcome back against the same lease.
#[derive(Debug, Clone)]
pub struct OutboxWorkItem {
    pub id: Uuid,
    pub topic: String,
    pub payload: Value,
    pub retry_count: i32,
    pub join_id: Option<Uuid>,
}

/// Whether a lease-scoped mutation (mark_dispatched/reschedule/fail, ack/abandon/fail on the
/// inbox) actually applied. `NotOwned` means the caller's owner token no longer holds the lease
/// (it expired and was reaped, or another owner claimed the row) — this is not an error, it is the
/// no-op described in spec §5: "a row claimed by an expired owner must not be Ack'd".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    NotOwned,
}

impl MutationOutcome {
    pub fn from_rows_affected(rows: u64) -> Self {
        if rows > 0 {
            MutationOutcome::Applied
        } else {
            MutationOutcome::NotOwned
        }
    }

    pub fn is_applied(self) -> bool {
        matches!(self, MutationOutcome::Applied)
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a Ready row. `due_at = None` means immediately due.
    async fn enqueue(
        &self,
        topic: &str,
        payload: Value,
        due_at: Option<DateTime<Utc>>,
        join_id: Option<Uuid>,
    ) -> Result<Uuid>;

    /// Atomically select up to `batch_size` due `Ready` rows, flip them to `InFlight` under
    /// `owner`, and return them in due-time order. Ties broken by `id`.
    async fn claim_due(
        &self,
        batch_size: i64,
        owner: OwnerToken,
        lease_duration: Duration,
    ) -> Result<Vec<OutboxWorkItem>>;

    /// Terminal success transition. Requires `owner` to currently hold the lease.
    async fn mark_dispatched(&self, id: Uuid, owner: OwnerToken) -> Result<MutationOutcome>;

    /// Retry transition: increments `retry_count`; transitions to `Dead` instead of `Ready` if
    /// the new count reaches `max_attempts` (see DESIGN.md Open Question 3).
    async fn reschedule(
        &self,
        id: Uuid,
        owner: OwnerToken,
        delay: Duration,
        error: &str,
        max_attempts: i32,
    ) -> Result<MutationOutcome>;

    /// Terminal failure transition (not subject to `max_attempts` — an explicit give-up).
    async fn fail(&self, id: Uuid, owner: OwnerToken, error: &str) -> Result<MutationOutcome>;

    /// Return any `InFlight` row whose lease has elapsed to `Ready` (or `Dead`, if that pushes
    /// `retry_count` to `max_attempts`). Returns the count of rows reaped.
    async fn reap_expired(&self, max_attempts: i32) -> Result<u64>;

    /// Delete terminal rows whose `processed_at` (or creation time, for rows that never
    /// processed) is older than `retention`. Returns the count of rows deleted.
    async fn cleanup_processed(&self, retention: Duration) -> Result<u64>;
}
