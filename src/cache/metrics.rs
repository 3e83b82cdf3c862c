//! Monotonic cache counters exposed through `CacheManager::stats`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheMetrics {
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    dist_hits: AtomicU64,
    dist_misses: AtomicU64,
    errors: AtomicU64,
    total_ops: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheMetricsSnapshot {
    pub local_hits: u64,
    pub local_misses: u64,
    pub dist_hits: u64,
    pub dist_misses: u64,
    pub errors: u64,
    pub total_ops: u64,
}

impl CacheMetrics {
    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_miss(&self) {
        self.local_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dist_hit(&self) {
        self.dist_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dist_miss(&self) {
        self.dist_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_op(&self) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            local_misses: self.local_misses.load(Ordering::Relaxed),
            dist_hits: self.dist_hits.load(Ordering::Relaxed),
            dist_misses: self.dist_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_ops: self.total_ops.load(Ordering::Relaxed),
        }
    }
}
