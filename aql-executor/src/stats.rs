//! Query execution statistics.
//!
//! Counters live in atomics on the query context so every operator can
//! bump them without threading mutable references around. Remote operators
//! ship [`StatsSnapshot`]s and apply deltas, so a coordinator accumulates
//! peer counters without double-counting across successive responses.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live statistics counters of one engine.
#[derive(Debug)]
pub struct ExecutionStats {
    scanned_full: AtomicU64,
    scanned_index: AtomicU64,
    filtered: AtomicU64,
    writes_executed: AtomicU64,
    writes_ignored: AtomicU64,
    /// -1 until a fullCount-enabled Limit initializes it.
    full_count: AtomicI64,
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self {
            scanned_full: AtomicU64::new(0),
            scanned_index: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            writes_executed: AtomicU64::new(0),
            writes_ignored: AtomicU64::new(0),
            full_count: AtomicI64::new(-1),
        }
    }
}

impl ExecutionStats {
    /// Count documents produced by full collection scans.
    pub fn add_scanned_full(&self, n: usize) {
        self.scanned_full.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Count documents produced by index lookups.
    pub fn add_scanned_index(&self, n: usize) {
        self.scanned_index.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Count rows rejected by a filter.
    pub fn add_filtered(&self, n: usize) {
        self.filtered.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Count one successful write.
    pub fn add_write_executed(&self) {
        self.writes_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one ignored write error.
    pub fn add_write_ignored(&self) {
        self.writes_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Move the fullCount counter from its unset default to zero.
    pub fn init_full_count(&self) {
        let _ = self
            .full_count
            .compare_exchange(-1, 0, Ordering::Relaxed, Ordering::Relaxed);
    }

    /// Add to the fullCount counter.
    pub fn add_full_count(&self, n: usize) {
        self.full_count.fetch_add(n as i64, Ordering::Relaxed);
    }

    /// The current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scanned_full: self.scanned_full.load(Ordering::Relaxed),
            scanned_index: self.scanned_index.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            writes_executed: self.writes_executed.load(Ordering::Relaxed),
            writes_ignored: self.writes_ignored.load(Ordering::Relaxed),
            full_count: self.full_count.load(Ordering::Relaxed),
        }
    }

    /// Fold a peer's counter movement between two snapshots into these
    /// counters.
    pub fn add_delta(&self, previous: &StatsSnapshot, new: &StatsSnapshot) {
        self.scanned_full
            .fetch_add(new.scanned_full - previous.scanned_full, Ordering::Relaxed);
        self.scanned_index.fetch_add(
            new.scanned_index - previous.scanned_index,
            Ordering::Relaxed,
        );
        self.filtered
            .fetch_add(new.filtered - previous.filtered, Ordering::Relaxed);
        self.writes_executed.fetch_add(
            new.writes_executed - previous.writes_executed,
            Ordering::Relaxed,
        );
        self.writes_ignored.fetch_add(
            new.writes_ignored - previous.writes_ignored,
            Ordering::Relaxed,
        );
        if new.full_count >= 0 {
            self.init_full_count();
            self.full_count.fetch_add(
                new.full_count - previous.full_count.max(0),
                Ordering::Relaxed,
            );
        }
    }
}

/// A serializable point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Documents produced by full scans.
    pub scanned_full: u64,
    /// Documents produced by index lookups.
    pub scanned_index: u64,
    /// Rows rejected by filters.
    pub filtered: u64,
    /// Successful writes.
    pub writes_executed: u64,
    /// Ignored write errors.
    pub writes_ignored: u64,
    /// Limit fullCount, -1 when no fullCount-enabled Limit ran.
    pub full_count: i64,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            scanned_full: 0,
            scanned_index: 0,
            filtered: 0,
            writes_executed: 0,
            writes_ignored: 0,
            full_count: -1,
        }
    }
}

/// A warning attached to a query, propagated through remote shutdown
/// responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Numeric warning code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}
