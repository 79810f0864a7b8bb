//! Arena counters and point-in-time statistics.
//!
//! Counters are bumped only on slow paths (commit calls, lost races,
//! exhaustion, reset). The fast path, a bump that lands in already
//! committed memory, touches nothing here.

use std::sync::atomic::{AtomicU64, Ordering};

/// A snapshot of an arena's cursors and counters.
///
/// Values are read independently, so under concurrent allocation the
/// fields need not describe a single instant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Declared capacity in bytes.
    pub capacity: usize,
    /// Allocation cursor: bytes handed out since the last reset, padding included.
    pub allocated_bytes: usize,
    /// Commit cursor: length of the committed prefix.
    pub committed_bytes: usize,
    /// Commit calls issued, including redundant ones from lost races.
    pub commit_calls: u64,
    /// Compare-and-swap attempts on the commit cursor that lost to another thread.
    pub commit_races: u64,
    /// Allocations that returned `CapacityExhausted`.
    pub exhausted: u64,
    /// Number of resets.
    pub resets: u64,
}

impl ArenaStats {
    /// Bytes still available for allocation.
    pub fn remaining_bytes(&self) -> usize {
        self.capacity.saturating_sub(self.allocated_bytes)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ArenaCounters {
    commit_calls: AtomicU64,
    commit_races: AtomicU64,
    exhausted: AtomicU64,
    resets: AtomicU64,
}

impl ArenaCounters {
    pub(crate) fn record_commit_call(&self) {
        self.commit_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_race(&self) {
        self.commit_races.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, stats: &mut ArenaStats) {
        stats.commit_calls = self.commit_calls.load(Ordering::Relaxed);
        stats.commit_races = self.commit_races.load(Ordering::Relaxed);
        stats.exhausted = self.exhausted.load(Ordering::Relaxed);
        stats.resets = self.resets.load(Ordering::Relaxed);
    }
}
