//! Monotonic-clock-scheduled lease renewal (spec §4.5). The renewal *decision* (has the schedule
//! passed, has enough monotonic time elapsed to count as progress) always reads the injected
//! `MonotonicClock`; only the lease row's `expires_at` is computed from a wall clock, by the
//! `LeaseStore` implementation itself. Renewal scheduling is grounded on the `renew_at`/`expires_at`
//! split in `examples/other_examples/3f16cc8f_kube-rs-kube__kube-runtime-src-lease.rs.rs` and the
//! create/renew/revoke method shape of
//! `examples/other_examples/6314ac5e_VanitasCaesar1-ZVault__crates-vaultrs-core-src-lease.rs.rs`;
//! the actual tick-driven loop follows `trace_dispatcher::lease_reaper_loop`.

use fanout_core::clock::MonotonicClock;
use fanout_core::handler::CancelSignal;
use fanout_core::lease::{Fencing, LeaseStore};
use fanout_core::{Error, Result};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::from_secs_f64((duration.as_secs_f64() * factor).max(0.0))
}

pub struct LeaseRunner {
    name: String,
    owner: String,
    lease_duration: Duration,
    renew_fraction: f64,
    grace_fraction: f64,
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn MonotonicClock>,
    fencing: Fencing,
    next_renewal: Mutex<Duration>,
    failure_started_at: Mutex<Option<Duration>>,
    lost_tx: watch::Sender<bool>,
    lost_rx: watch::Receiver<bool>,
}

impl LeaseRunner {
    /// Attempts one acquire. `None` if another live owner already holds `name`.
    pub async fn acquire(
        name: impl Into<String>,
        owner: impl Into<String>,
        lease_duration: Duration,
        renew_fraction: f64,
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn MonotonicClock>,
    ) -> Result<Option<Self>> {
        let name = name.into();
        let owner = owner.into();

        let Some(grant) = store.acquire(&name, &owner, lease_duration).await? else {
            return Ok(None);
        };

        let now = clock.now();
        let (lost_tx, lost_rx) = watch::channel(false);
        Ok(Some(Self {
            name,
            owner,
            lease_duration,
            renew_fraction,
            grace_fraction: 0.5,
            store,
            clock,
            fencing: grant.fencing,
            next_renewal: Mutex::new(now + scale(lease_duration, renew_fraction)),
            failure_started_at: Mutex::new(None),
            lost_tx,
            lost_rx,
        }))
    }

    /// A signal that fires once the lease is lost (renewal failed beyond the grace window, or the
    /// caller released it). Merge this with a run's own cancellation before invoking a handler.
    pub fn cancellation(&self) -> CancelSignal {
        CancelSignal::new(self.lost_rx.clone())
    }

    pub fn is_lost(&self) -> bool {
        *self.lost_rx.borrow()
    }

    pub fn throw_if_lost(&self) -> Result<()> {
        if self.is_lost() {
            Err(Error::msg(format!("lease '{}' lost", self.name)))
        } else {
            Ok(())
        }
    }

    /// Test hook exposing the scheduled next-renewal instant, so hermetic tests can assert on
    /// scheduling without reaching into private fields.
    pub fn debug_next_renewal_monotonic(&self) -> Duration {
        *self.next_renewal.lock().expect("lease runner state poisoned")
    }

    /// Meant to be driven by an external periodic timer. A no-op (returns `false` without touching
    /// the database) unless the scheduled renewal instant has passed — this is what makes a
    /// redundant/duplicate tick, with no monotonic progress since the last one, harmless.
    pub async fn try_renew_now(&self) -> bool {
        if self.is_lost() {
            return false;
        }

        let now = self.clock.now();
        let scheduled = *self.next_renewal.lock().expect("lease runner state poisoned");
        if now < scheduled {
            return false;
        }

        match self
            .store
            .renew(&self.name, &self.owner, self.fencing, self.lease_duration)
            .await
        {
            Ok(true) => {
                *self.failure_started_at.lock().expect("lease runner state poisoned") = None;
                let mut next = self.next_renewal.lock().expect("lease runner state poisoned");
                *next = now + scale(self.lease_duration, self.renew_fraction);
                tracing::debug!(event = "fanout.lease.renewed", name = %self.name, "lease renewed");
                true
            }
            Ok(false) => {
                tracing::warn!(event = "fanout.lease.lost", name = %self.name, "lease lost (no longer the holder)");
                let _ = self.lost_tx.send(true);
                false
            }
            Err(err) => {
                self.handle_renew_error(now, err).await;
                false
            }
        }
    }

    async fn handle_renew_error(&self, now: Duration, err: Error) {
        let grace = scale(self.lease_duration, self.grace_fraction);
        let mut failure_started_at = self.failure_started_at.lock().expect("lease runner state poisoned");
        let started = *failure_started_at.get_or_insert(now);

        if now.saturating_sub(started) >= grace {
            tracing::warn!(
                event = "fanout.lease.renew_exhausted",
                name = %self.name,
                error = %err,
                "lease renewal retries exhausted; marking lease lost"
            );
            drop(failure_started_at);
            let _ = self.lost_tx.send(true);
            return;
        }

        let jitter = Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..grace.as_secs_f64().max(0.001)));
        tracing::warn!(
            event = "fanout.lease.renew_error",
            name = %self.name,
            error = %err,
            "lease renewal error; retrying with jitter"
        );
        drop(failure_started_at);
        *self.next_renewal.lock().expect("lease runner state poisoned") = now + jitter;
    }

    pub async fn release(&self) -> Result<()> {
        self.store.release(&self.name, &self.owner, self.fencing).await?;
        let _ = self.lost_tx.send(true);
        Ok(())
    }
}
