//! Global atomic counters for dispatch activity.
//!
//! Incremented at the call site; [`Metrics::flush`] emits the current values
//! as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    dispatches: AtomicU64,
    member_calls: AtomicU64,
    recasts: AtomicU64,
    parallel_units: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            dispatches: AtomicU64::new(0),
            member_calls: AtomicU64::new(0),
            recasts: AtomicU64::new(0),
            parallel_units: AtomicU64::new(0),
        }
    }

    /// One collective method call (sequential or parallel).
    pub fn inc_dispatches(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "dispatches", "counter incremented");
    }

    pub fn inc_member_calls(&self) {
        self.member_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "member_calls", "counter incremented");
    }

    pub fn inc_recasts(&self) {
        self.recasts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "recasts", "counter incremented");
    }

    /// One work unit handed to a parallel backend.
    pub fn inc_parallel_units(&self) {
        self.parallel_units.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "parallel_units", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            dispatches = self.dispatches(),
            member_calls = self.member_calls(),
            recasts = self.recasts(),
            parallel_units = self.parallel_units(),
        );
    }

    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    pub fn member_calls(&self) -> u64 {
        self.member_calls.load(Ordering::Relaxed)
    }

    pub fn recasts(&self) -> u64 {
        self.recasts.load(Ordering::Relaxed)
    }

    pub fn parallel_units(&self) -> u64 {
        self.parallel_units.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.dispatches.store(0, Ordering::Relaxed);
        self.member_calls.store(0, Ordering::Relaxed);
        self.recasts.store(0, Ordering::Relaxed);
        self.parallel_units.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_dispatches();
        m.inc_member_calls();
        m.inc_member_calls();
        m.inc_member_calls();
        m.inc_parallel_units();
        assert_eq!(m.dispatches(), 1);
        assert_eq!(m.member_calls(), 3);
        assert_eq!(m.recasts(), 0);
        assert_eq!(m.parallel_units(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_dispatches();
        m.inc_recasts();
        m.reset();
        assert_eq!(m.dispatches(), 0);
        assert_eq!(m.recasts(), 0);
    }
}
