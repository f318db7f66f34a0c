// src/metrics.rs
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lifetime counters for one pool. Updated without taking the pool lock.
#[repr(C, align(64))]
pub struct PoolMetrics {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub checkouts: AtomicUsize,
    pub idle_hits: AtomicUsize,
    pub evictions: AtomicUsize,
    pub replacement_failures: AtomicUsize,
}

/// Point-in-time copy of [`PoolMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub created: usize,
    pub destroyed: usize,
    pub checkouts: usize,
    pub idle_hits: usize,
    pub evictions: usize,
    pub replacement_failures: usize,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            checkouts: AtomicUsize::new(0),
            idle_hits: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
            replacement_failures: AtomicUsize::new(0),
        }
    }

    pub fn inc_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_checkout(&self, idle_hit: bool) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        if idle_hit {
            self.idle_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replacement_failure(&self) {
        self.replacement_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            idle_hits: self.idle_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            replacement_failures: self.replacement_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}
