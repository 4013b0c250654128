//! In-memory doubles shared across this crate's hermetic unit tests. Mirrors the shape of the real
//! `fanout-postgres` stores closely enough that dispatcher/router/cleanup tests exercise the same
//! state machine without a database.

#![cfg(test)]

use async_trait::async_trait;
use fanout_core::inbox::{InboxStatus, InboxStore, InboxWorkItem};
use fanout_core::join::JoinCoordinator;
use fanout_core::lease::{Fencing, LeaseGrant, LeaseStore};
use fanout_core::outbox::{MutationOutcome, OutboxStatus, OutboxStore, OutboxWorkItem};
use fanout_core::{Error, OwnerToken, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
struct OutboxRow {
    topic: String,
    payload: Value,
    status: OutboxStatus,
    due_at: Option<DateTime<Utc>>,
    retry_count: i32,
    join_id: Option<Uuid>,
    lease_owner: Option<OwnerToken>,
}

#[derive(Default)]
pub struct InMemoryOutboxStore {
    rows: Mutex<HashMap<Uuid, OutboxRow>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_of(&self, id: Uuid) -> Option<OutboxStatus> {
        self.rows.lock().unwrap().get(&id).map(|row| row.status)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(
        &self,
        topic: &str,
        payload: Value,
        due_at: Option<DateTime<Utc>>,
        join_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.rows.lock().unwrap().insert(
            id,
            OutboxRow {
                topic: topic.to_string(),
                payload,
                status: OutboxStatus::Ready,
                due_at,
                retry_count: 0,
                join_id,
                lease_owner: None,
            },
        );
        Ok(id)
    }

    async fn claim_due(&self, batch_size: i64, owner: OwnerToken, _lease_duration: Duration) -> Result<Vec<OutboxWorkItem>> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let mut due_ids: Vec<Uuid> = rows
            .iter()
            .filter(|(_, row)| row.status == OutboxStatus::Ready && row.due_at.map(|d| d <= now).unwrap_or(true))
            .map(|(id, _)| *id)
            .collect();
        due_ids.sort();
        due_ids.truncate(batch_size.max(0) as usize);

        let mut items = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            let row = rows.get_mut(&id).unwrap();
            row.status = OutboxStatus::InFlight;
            row.lease_owner = Some(owner);
            items.push(OutboxWorkItem {
                id,
                topic: row.topic.clone(),
                payload: row.payload.clone(),
                retry_count: row.retry_count,
                join_id: row.join_id,
            });
        }
        Ok(items)
    }

    async fn mark_dispatched(&self, id: Uuid, owner: OwnerToken) -> Result<MutationOutcome> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(MutationOutcome::NotOwned);
        };
        if row.status != OutboxStatus::InFlight || row.lease_owner != Some(owner) {
            return Ok(MutationOutcome::NotOwned);
        }
        row.status = OutboxStatus::Done;
        row.lease_owner = None;
        Ok(MutationOutcome::Applied)
    }

    async fn reschedule(&self, id: Uuid, owner: OwnerToken, delay: Duration, error: &str, max_attempts: i32) -> Result<MutationOutcome> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(MutationOutcome::NotOwned);
        };
        if row.status != OutboxStatus::InFlight || row.lease_owner != Some(owner) {
            return Ok(MutationOutcome::NotOwned);
        }
        row.retry_count += 1;
        row.lease_owner = None;
        let _ = error;
        if row.retry_count >= max_attempts {
            row.status = OutboxStatus::Dead;
        } else {
            row.status = OutboxStatus::Ready;
            row.due_at = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        }
        Ok(MutationOutcome::Applied)
    }

    async fn fail(&self, id: Uuid, owner: OwnerToken, _error: &str) -> Result<MutationOutcome> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(MutationOutcome::NotOwned);
        };
        if row.status != OutboxStatus::InFlight || row.lease_owner != Some(owner) {
            return Ok(MutationOutcome::NotOwned);
        }
        row.status = OutboxStatus::Failed;
        row.lease_owner = None;
        Ok(MutationOutcome::Applied)
    }

    async fn reap_expired(&self, _max_attempts: i32) -> Result<u64> {
        Ok(0)
    }

    async fn cleanup_processed(&self, _retention: Duration) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, row| !row.status.is_terminal());
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Clone)]
struct InboxRow {
    message_id: String,
    source: String,
    topic: String,
    payload: Value,
    status: InboxStatus,
    attempts: i32,
    lease_owner: Option<OwnerToken>,
}

#[derive(Default)]
pub struct InMemoryInboxStore {
    rows: Mutex<HashMap<Uuid, InboxRow>>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn enqueue(&self, message_id: &str, source: &str, topic: &str, payload: Value) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .values()
            .any(|row| row.message_id == message_id && row.source == source)
        {
            return Ok(());
        }
        rows.insert(
            Uuid::new_v4(),
            InboxRow {
                message_id: message_id.to_string(),
                source: source.to_string(),
                topic: topic.to_string(),
                payload,
                status: InboxStatus::Seen,
                attempts: 0,
                lease_owner: None,
            },
        );
        Ok(())
    }

    async fn claim(&self, owner: OwnerToken, _lease_duration: Duration, batch_size: i64) -> Result<Vec<InboxWorkItem>> {
        let mut rows = self.rows.lock().unwrap();
        let mut ids: Vec<Uuid> = rows
            .iter()
            .filter(|(_, row)| row.status == InboxStatus::Seen)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids.truncate(batch_size.max(0) as usize);

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let row = rows.get_mut(&id).unwrap();
            row.status = InboxStatus::InFlight;
            row.lease_owner = Some(owner);
            items.push(InboxWorkItem {
                id,
                message_id: row.message_id.clone(),
                source: row.source.clone(),
                topic: row.topic.clone(),
                payload: row.payload.clone(),
                attempts: row.attempts,
            });
        }
        Ok(items)
    }

    async fn ack(&self, owner: OwnerToken, ids: &[Uuid]) -> Result<MutationOutcome> {
        let mut rows = self.rows.lock().unwrap();
        let mut applied = false;
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                if row.status == InboxStatus::InFlight && row.lease_owner == Some(owner) {
                    row.status = InboxStatus::Done;
                    row.attempts += 1;
                    row.lease_owner = None;
                    applied = true;
                }
            }
        }
        Ok(if applied { MutationOutcome::Applied } else { MutationOutcome::NotOwned })
    }

    async fn abandon(&self, owner: OwnerToken, ids: &[Uuid], _last_error: &str, _delay: Option<Duration>) -> Result<MutationOutcome> {
        let mut rows = self.rows.lock().unwrap();
        let mut applied = false;
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                if row.status == InboxStatus::InFlight && row.lease_owner == Some(owner) {
                    row.status = InboxStatus::Seen;
                    row.attempts += 1;
                    row.lease_owner = None;
                    applied = true;
                }
            }
        }
        Ok(if applied { MutationOutcome::Applied } else { MutationOutcome::NotOwned })
    }

    async fn fail(&self, owner: OwnerToken, ids: &[Uuid], _error: &str) -> Result<MutationOutcome> {
        let mut rows = self.rows.lock().unwrap();
        let mut applied = false;
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                if row.status == InboxStatus::InFlight && row.lease_owner == Some(owner) {
                    row.status = InboxStatus::Dead;
                    row.lease_owner = None;
                    applied = true;
                }
            }
        }
        Ok(if applied { MutationOutcome::Applied } else { MutationOutcome::NotOwned })
    }

    async fn revive(&self, ids: &[Uuid], _reason: &str, _delay: Option<Duration>) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                row.status = InboxStatus::Seen;
            }
        }
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64> {
        Ok(0)
    }

    async fn cleanup_processed(&self, _retention: Duration) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, row| !matches!(row.status, InboxStatus::Done | InboxStatus::Dead));
        Ok((before - rows.len()) as u64)
    }
}

/// An `OutboxStore` double that always reports a missing relation, for cleanup-service tests that
/// exercise the "tolerate an undeployed schema" path (spec §4.2/§4.10).
pub struct NullOutboxStore;

#[async_trait]
impl OutboxStore for NullOutboxStore {
    async fn enqueue(&self, _topic: &str, _payload: Value, _due_at: Option<DateTime<Utc>>, _join_id: Option<Uuid>) -> Result<Uuid> {
        Err(Error::msg("relation \"outbox\" does not exist"))
    }

    async fn claim_due(&self, _batch_size: i64, _owner: OwnerToken, _lease_duration: Duration) -> Result<Vec<OutboxWorkItem>> {
        Ok(Vec::new())
    }

    async fn mark_dispatched(&self, _id: Uuid, _owner: OwnerToken) -> Result<MutationOutcome> {
        Ok(MutationOutcome::NotOwned)
    }

    async fn reschedule(&self, _id: Uuid, _owner: OwnerToken, _delay: Duration, _error: &str, _max_attempts: i32) -> Result<MutationOutcome> {
        Ok(MutationOutcome::NotOwned)
    }

    async fn fail(&self, _id: Uuid, _owner: OwnerToken, _error: &str) -> Result<MutationOutcome> {
        Ok(MutationOutcome::NotOwned)
    }

    async fn reap_expired(&self, _max_attempts: i32) -> Result<u64> {
        Ok(0)
    }

    async fn cleanup_processed(&self, _retention: Duration) -> Result<u64> {
        Err(Error::msg("relation \"outbox\" does not exist"))
    }
}

/// Records every `child_id` it was notified about, for dispatcher tests asserting that a terminal
/// outbox transition actually drives the join coordinator (spec §4.3 invariant 5).
#[derive(Default)]
pub struct FakeJoinCoordinator {
    notified: Mutex<Vec<Uuid>>,
}

impl FakeJoinCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notified(&self) -> Vec<Uuid> {
        self.notified.lock().unwrap().clone()
    }
}

#[async_trait]
impl JoinCoordinator for FakeJoinCoordinator {
    async fn on_child_terminal(&self, child_id: Uuid) -> Result<()> {
        self.notified.lock().unwrap().push(child_id);
        Ok(())
    }
}

struct LeaseRow {
    owner: String,
    fencing: Fencing,
    expires_at: DateTime<Utc>,
}

/// A wall-clock-driven `LeaseStore` double. Renewal *scheduling* in the lease runner tests is
/// exercised against `FakeMonotonicClock`; this store only needs to track who currently holds each
/// named lease, so it is fine for it to use real `Utc::now()` with a generous expiry.
#[derive(Default)]
pub struct FakeLeaseStore {
    leases: Mutex<HashMap<String, LeaseRow>>,
    fail_next_renew: std::sync::atomic::AtomicBool,
}

impl FakeLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_renew(&self) {
        self.fail_next_renew.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn expire(&self, name: &str) {
        if let Some(row) = self.leases.lock().unwrap().get_mut(name) {
            row.expires_at = Utc::now() - chrono::Duration::hours(1);
        }
    }
}

#[async_trait]
impl LeaseStore for FakeLeaseStore {
    async fn acquire(&self, name: &str, owner: &str, lease_duration: Duration) -> Result<Option<LeaseGrant>> {
        let mut leases = self.leases.lock().unwrap();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(lease_duration).unwrap_or_default();
        match leases.get_mut(name) {
            Some(row) if row.expires_at > now => Ok(None),
            Some(row) => {
                row.owner = owner.to_string();
                row.fencing += 1;
                row.expires_at = expires_at;
                Ok(Some(LeaseGrant { fencing: row.fencing }))
            }
            None => {
                leases.insert(
                    name.to_string(),
                    LeaseRow {
                        owner: owner.to_string(),
                        fencing: 1,
                        expires_at,
                    },
                );
                Ok(Some(LeaseGrant { fencing: 1 }))
            }
        }
    }

    async fn renew(&self, name: &str, owner: &str, fencing: Fencing, lease_duration: Duration) -> Result<bool> {
        if self.fail_next_renew.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::msg("simulated transient renew failure"));
        }
        let mut leases = self.leases.lock().unwrap();
        match leases.get_mut(name) {
            Some(row) if row.owner == owner && row.fencing == fencing => {
                row.expires_at = Utc::now() + chrono::Duration::from_std(lease_duration).unwrap_or_default();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, owner: &str, fencing: Fencing) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap();
        match leases.get(name) {
            Some(row) if row.owner == owner && row.fencing == fencing => {
                leases.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

pub struct NullInboxStore;

#[async_trait]
impl InboxStore for NullInboxStore {
    async fn enqueue(&self, _message_id: &str, _source: &str, _topic: &str, _payload: Value) -> Result<()> {
        Ok(())
    }

    async fn claim(&self, _owner: OwnerToken, _lease_duration: Duration, _batch_size: i64) -> Result<Vec<InboxWorkItem>> {
        Ok(Vec::new())
    }

    async fn ack(&self, _owner: OwnerToken, _ids: &[Uuid]) -> Result<MutationOutcome> {
        Ok(MutationOutcome::NotOwned)
    }

    async fn abandon(&self, _owner: OwnerToken, _ids: &[Uuid], _last_error: &str, _delay: Option<Duration>) -> Result<MutationOutcome> {
        Ok(MutationOutcome::NotOwned)
    }

    async fn fail(&self, _owner: OwnerToken, _ids: &[Uuid], _error: &str) -> Result<MutationOutcome> {
        Ok(MutationOutcome::NotOwned)
    }

    async fn revive(&self, _ids: &[Uuid], _reason: &str, _delay: Option<Duration>) -> Result<()> {
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64> {
        Ok(0)
    }

    async fn cleanup_processed(&self, _retention: Duration) -> Result<u64> {
        Err(Error::msg("relation \"inbox\" does not exist"))
    }
}
