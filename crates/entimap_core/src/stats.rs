//! Session statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! session.save(&person).await?;
//! session.flush().await?;
//!
//! let stats = session.stats();
//! println!("inserted: {}", stats.inserts);
//! println!("skipped dirty checks: {}", stats.skipped_dirty_checks);
//! ```

use crate::store::BulkWriteResult;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of a session.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Completed flushes.
    flushes: AtomicU64,
    /// Documents inserted by flushes.
    inserts: AtomicU64,
    /// Documents replaced or updated by flushes.
    updates: AtomicU64,
    /// Documents removed by flushes and `remove_all`.
    removes: AtomicU64,
    /// Dirty checks that found no change.
    skipped_dirty_checks: AtomicU64,
    /// Documents loaded from the store.
    loads: AtomicU64,
    /// Operations that failed with an operational error.
    task_errors: AtomicU64,
}

impl SessionStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_flush(&self, written: BulkWriteResult, skipped: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.inserts.fetch_add(written.inserted, Ordering::Relaxed);
        self.updates.fetch_add(written.modified, Ordering::Relaxed);
        self.removes.fetch_add(written.removed, Ordering::Relaxed);
        self.skipped_dirty_checks
            .fetch_add(skipped, Ordering::Relaxed);
    }

    pub(crate) fn record_removes(&self, count: u64) {
        self.removes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task_error(&self) {
        self.task_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            skipped_dirty_checks: self.skipped_dirty_checks.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            task_errors: self.task_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Completed flushes.
    pub flushes: u64,
    /// Documents inserted.
    pub inserts: u64,
    /// Documents replaced or updated.
    pub updates: u64,
    /// Documents removed.
    pub removes: u64,
    /// Dirty checks that found no change.
    pub skipped_dirty_checks: u64,
    /// Documents loaded from the store.
    pub loads: u64,
    /// Operational failures.
    pub task_errors: u64,
}
