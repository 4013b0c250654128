//! Store ordering within one dispatcher run (spec §4.4).

use std::sync::atomic::{AtomicUsize, Ordering};

pub trait SelectionStrategy: Send + Sync {
    /// Returns store indices in the order they should be consulted this run, given the current
    /// store count and which indices returned a non-empty batch last run.
    fn order(&self, store_count: usize, last_non_empty: &[usize]) -> Vec<usize>;
}

/// Rotates the starting index by one per run, guaranteeing no store is starved for more than
/// `store_count - 1` runs while queues stay non-empty (spec §4.4 "Properties").
pub struct RoundRobin {
    next_start: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            next_start: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for RoundRobin {
    fn order(&self, store_count: usize, _last_non_empty: &[usize]) -> Vec<usize> {
        if store_count == 0 {
            return Vec::new();
        }
        let start = self.next_start.fetch_add(1, Ordering::SeqCst) % store_count;
        (0..store_count).map(|offset| (start + offset) % store_count).collect()
    }
}

/// Sticky: continues with whichever store returned a non-empty batch last run, falling back to
/// round-robin order once every store has gone quiet.
pub struct DrainFirst {
    fallback: RoundRobin,
}

impl DrainFirst {
    pub fn new() -> Self {
        Self {
            fallback: RoundRobin::new(),
        }
    }
}

impl Default for DrainFirst {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for DrainFirst {
    fn order(&self, store_count: usize, last_non_empty: &[usize]) -> Vec<usize> {
        if store_count == 0 {
            return Vec::new();
        }
        if let Some(&sticky) = last_non_empty.first() {
            if sticky < store_count {
                let mut order = vec![sticky];
                order.extend((0..store_count).filter(|&i| i != sticky));
                return order;
            }
        }
        self.fallback.order(store_count, last_non_empty)
    }
}
