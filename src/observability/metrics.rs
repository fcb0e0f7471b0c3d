//! Lightweight atomic-counter metrics registry.
//!
//! Mirrors the teacher's `observability::metrics` in spirit (a handful of
//! named counters, no external exporter wired in by default) but scoped to
//! the counters this crate's own testable properties care about.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracked over the lifetime of a [`crate::driver::Driver`].
#[derive(Debug, Default)]
pub struct Metrics {
    /// Number of targets that completed a `match` pass.
    pub targets_matched: AtomicU64,
    /// Number of depdb lines matched via `expect` without a rewrite.
    pub depdb_hits: AtomicU64,
    /// Number of depdb lines that forced a rewrite from that point.
    pub depdb_misses: AtomicU64,
    /// Number of header-extractor restarts (§4.6.1).
    pub header_restarts: AtomicU64,
    /// Number of libraries whose argv range was hoisted to the end (§4.7).
    pub libraries_hoisted: AtomicU64,
}

impl Metrics {
    /// Creates a zeroed metrics registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments `targets_matched`.
    pub fn record_target_matched(&self) {
        self.targets_matched.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments `depdb_hits`.
    pub fn record_depdb_hit(&self) {
        self.depdb_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments `depdb_misses`.
    pub fn record_depdb_miss(&self) {
        self.depdb_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments `header_restarts`.
    pub fn record_header_restart(&self) {
        self.header_restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments `libraries_hoisted`.
    pub fn record_library_hoisted(&self) {
        self.libraries_hoisted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            targets_matched: self.targets_matched.load(Ordering::Relaxed),
            depdb_hits: self.depdb_hits.load(Ordering::Relaxed),
            depdb_misses: self.depdb_misses.load(Ordering::Relaxed),
            header_restarts: self.header_restarts.load(Ordering::Relaxed),
            libraries_hoisted: self.libraries_hoisted.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of [`Metrics`], convenient for assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// See [`Metrics::targets_matched`].
    pub targets_matched: u64,
    /// See [`Metrics::depdb_hits`].
    pub depdb_hits: u64,
    /// See [`Metrics::depdb_misses`].
    pub depdb_misses: u64,
    /// See [`Metrics::header_restarts`].
    pub header_restarts: u64,
    /// See [`Metrics::libraries_hoisted`].
    pub libraries_hoisted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let m = Metrics::new();
        assert_eq!(m.snapshot().targets_matched, 0);
        m.record_target_matched();
        m.record_target_matched();
        assert_eq!(m.snapshot().targets_matched, 2);
    }
}
