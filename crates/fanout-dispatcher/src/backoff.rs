//! `attempt -> delay` policy for outbox reschedule / inbox abandon (spec §4.4, §6 `backoff_policy`).
//! Exponential with a cap, grounded on the `compute_next_attempt_at` shape in
//! `examples/other_examples/44a2237c_erayack-backend__src-dispatcher-store.rs.rs`.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    factor: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        Self { base, max, factor }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::new(base, max, 2.0)
    }

    /// `attempt` is 1-based: the delay computed for the first retry after the initial failure.
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let attempt = attempt.max(1) as i32;
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt - 1);
        let capped = scaled.min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_saturates_at_max() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[test]
    fn attempt_zero_is_treated_as_first_attempt() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(0), policy.delay_for(1));
    }
}
