use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking suspension sweeps across invocations.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Invocations that started a sweep.
    pub sweeps_started: AtomicU64,
    /// Sweeps that walked every page.
    pub sweeps_completed: AtomicU64,
    /// Sweeps aborted by a repository failure.
    pub sweeps_failed: AtomicU64,
    /// Invocations cancelled by the scheduler timeout.
    pub sweeps_timed_out: AtomicU64,
    /// Candidate pages fetched.
    pub pages_fetched: AtomicU64,
    /// Accounts examined.
    pub accounts_processed: AtomicU64,
    /// Accounts moved to `suspended`.
    pub accounts_suspended: AtomicU64,
    /// Accounts left untouched (already suspended, gone, or ineligible).
    pub accounts_skipped: AtomicU64,
    /// Accounts whose suspend call failed.
    pub accounts_failed: AtomicU64,
}

impl SweepMetrics {
    pub fn increment_sweeps_started(&self) {
        self.sweeps_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sweeps_completed(&self) {
        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sweeps_failed(&self) {
        self.sweeps_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sweeps_timed_out(&self) {
        self.sweeps_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pages_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_accounts_processed(&self) {
        self.accounts_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_accounts_suspended(&self) {
        self.accounts_suspended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_accounts_skipped(&self) {
        self.accounts_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_accounts_failed(&self) {
        self.accounts_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sweeps_started: self.sweeps_started.load(Ordering::Relaxed),
            sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
            sweeps_failed: self.sweeps_failed.load(Ordering::Relaxed),
            sweeps_timed_out: self.sweeps_timed_out.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            accounts_processed: self.accounts_processed.load(Ordering::Relaxed),
            accounts_suspended: self.accounts_suspended.load(Ordering::Relaxed),
            accounts_skipped: self.accounts_skipped.load(Ordering::Relaxed),
            accounts_failed: self.accounts_failed.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`SweepMetrics`] at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sweeps_started: u64,
    pub sweeps_completed: u64,
    pub sweeps_failed: u64,
    pub sweeps_timed_out: u64,
    pub pages_fetched: u64,
    pub accounts_processed: u64,
    pub accounts_suspended: u64,
    pub accounts_skipped: u64,
    pub accounts_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_zero() {
        let m = SweepMetrics::default();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_and_snapshot() {
        let m = SweepMetrics::default();
        m.increment_sweeps_started();
        m.increment_sweeps_started();
        m.increment_sweeps_completed();
        m.increment_sweeps_timed_out();
        m.increment_pages_fetched();
        m.increment_accounts_processed();
        m.increment_accounts_processed();
        m.increment_accounts_processed();
        m.increment_accounts_suspended();
        m.increment_accounts_skipped();
        m.increment_accounts_failed();

        let snap = m.snapshot();
        assert_eq!(snap.sweeps_started, 2);
        assert_eq!(snap.sweeps_completed, 1);
        assert_eq!(snap.sweeps_failed, 0);
        assert_eq!(snap.sweeps_timed_out, 1);
        assert_eq!(snap.pages_fetched, 1);
        assert_eq!(snap.accounts_processed, 3);
        assert_eq!(snap.accounts_suspended, 1);
        assert_eq!(snap.accounts_skipped, 1);
        assert_eq!(snap.accounts_failed, 1);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let m = SweepMetrics::default();
        m.increment_accounts_suspended();
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["accounts_suspended"], 1);
        assert_eq!(json["sweeps_failed"], 0);
    }
}
