//! Lock-free growth of the committed prefix.
//!
//! [`CommitFrontier`] tracks how much of the reservation is physically
//! backed. A thread that needs more commits the missing pages first and
//! only then tries to publish the new frontier with a compare-and-swap:
//!
//! ```text
//! load frontier (Acquire)
//! ├── needed <= frontier  → done, no system call
//! └── otherwise
//!     ├── commit [frontier, target)        ← physical backing first
//!     └── CAS frontier → target (Release)  ← publication second
//!         ├── won  → done
//!         └── lost → reload, re-check
//! ```
//!
//! Every value the frontier can hold was therefore reached by a CAS that
//! follows a successful commit of that range. Publishing before
//! committing would let a thread observe a frontier covering pages that
//! are not yet mapped and fault on them.
//!
//! Threads that race may commit overlapping ranges. Commits are
//! idempotent, so the cost is only redundant system calls; a larger
//! commit granularity makes such races rarer. Progress is lock-free,
//! not wait-free: some thread's CAS always succeeds, but a given thread
//! may lose repeatedly under sustained contention.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::align::saturating_align_up;
use crate::error::{ArenaError, VmError};
use crate::stats::ArenaCounters;

/// The commit cursor, on its own cache line.
#[repr(align(128))]
pub(crate) struct CommitFrontier {
    committed: AtomicUsize,
}

impl CommitFrontier {
    pub(crate) fn new() -> Self {
        Self {
            committed: AtomicUsize::new(0),
        }
    }

    /// Length of the prefix that is guaranteed committed.
    pub(crate) fn load(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    /// Make sure `[0, needed)` is committed before returning.
    ///
    /// `commit(offset, len)` backs `len` bytes starting at `offset`;
    /// `offset` is always a multiple of `granularity`. The frontier is
    /// advanced in whole `granularity` steps but never beyond `limit`,
    /// and `needed` must not exceed `limit`.
    ///
    /// A commit failure is returned immediately and never retried: only
    /// lost races loop.
    pub(crate) fn ensure<F>(
        &self,
        needed: usize,
        granularity: usize,
        limit: usize,
        counters: &ArenaCounters,
        mut commit: F,
    ) -> Result<(), ArenaError>
    where
        F: FnMut(usize, usize) -> Result<(), VmError>,
    {
        debug_assert!(needed <= limit);
        debug_assert!(granularity.is_power_of_two());

        let mut committed = self.committed.load(Ordering::Acquire);
        loop {
            if needed <= committed {
                return Ok(());
            }
            // Cumulative target, never the increment: the frontier must
            // only ever grow.
            let target = saturating_align_up(needed, granularity).min(limit);
            let len = target - committed;

            counters.record_commit_call();
            tracing::trace!(from = committed, to = target, len, "committing");
            if let Err(source) = commit(committed, len) {
                tracing::error!(
                    offset = committed,
                    len,
                    error = %source,
                    "commit failed for in-range request"
                );
                return Err(ArenaError::CommitFailed {
                    offset: committed,
                    len,
                    source,
                });
            }

            match self.committed.compare_exchange(
                committed,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => {
                    counters.record_commit_race();
                    tracing::trace!(expected = committed, actual, "lost commit race");
                    committed = actual;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const PAGE: usize = 4096;

    fn ok_commit(
        log: &RefCell<Vec<(usize, usize)>>,
    ) -> impl FnMut(usize, usize) -> Result<(), VmError> + '_ {
        move |offset, len| {
            log.borrow_mut().push((offset, len));
            Ok(())
        }
    }

    #[test]
    fn fast_path_issues_no_commit() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let log = RefCell::new(Vec::new());
        f.ensure(100, PAGE, 1 << 20, &counters, ok_commit(&log)).unwrap();
        f.ensure(4096, PAGE, 1 << 20, &counters, ok_commit(&log)).unwrap();
        assert_eq!(*log.borrow(), vec![(0, PAGE)]);
        assert_eq!(f.load(), PAGE);
    }

    #[test]
    fn commits_whole_pages_beyond_frontier() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let log = RefCell::new(Vec::new());
        f.ensure(8000, PAGE, 1 << 20, &counters, ok_commit(&log)).unwrap();
        assert_eq!(f.load(), 8192);
        f.ensure(8193, PAGE, 1 << 20, &counters, ok_commit(&log)).unwrap();
        assert_eq!(*log.borrow(), vec![(0, 8192), (8192, PAGE)]);
        assert_eq!(f.load(), 3 * PAGE);
    }

    #[test]
    fn frontier_accumulates_instead_of_storing_increment() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let log = RefCell::new(Vec::new());
        for page in 1..=5 {
            f.ensure(page * PAGE, PAGE, 1 << 20, &counters, ok_commit(&log)).unwrap();
            assert_eq!(f.load(), page * PAGE);
        }
        // Each step committed exactly one new page, starting at the old frontier.
        let expected: Vec<_> = (0..5).map(|p| (p * PAGE, PAGE)).collect();
        assert_eq!(*log.borrow(), expected);
    }

    #[test]
    fn frontier_clamped_to_limit() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let log = RefCell::new(Vec::new());
        f.ensure(5000, PAGE, 6000, &counters, ok_commit(&log)).unwrap();
        assert_eq!(f.load(), 6000);
        assert_eq!(*log.borrow(), vec![(0, 6000)]);
    }

    #[test]
    fn granularity_controls_step() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let log = RefCell::new(Vec::new());
        f.ensure(10, 65536, 1 << 20, &counters, ok_commit(&log)).unwrap();
        assert_eq!(f.load(), 65536);
    }

    #[test]
    fn frontier_unchanged_while_commit_runs() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        f.ensure(PAGE, PAGE, 1 << 20, &counters, |_, _| Ok(())).unwrap();
        let mut seen = None;
        f.ensure(3 * PAGE, PAGE, 1 << 20, &counters, |_, _| {
            seen = Some(f.load());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, Some(PAGE), "frontier must not move before commit returns");
        assert_eq!(f.load(), 3 * PAGE);
    }

    #[test]
    fn lost_race_rechecks_and_skips_if_covered() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let mut calls = 0;
        f.ensure(PAGE, PAGE, 1 << 20, &counters, |_, _| {
            calls += 1;
            // Another thread publishes a larger frontier mid-commit.
            f.committed.store(4 * PAGE, Ordering::Release);
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(f.load(), 4 * PAGE);
        let mut stats = crate::stats::ArenaStats::default();
        counters.fill(&mut stats);
        assert_eq!(stats.commit_races, 1);
        assert_eq!(stats.commit_calls, 1);
    }

    #[test]
    fn lost_race_recommits_from_new_frontier() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let log = RefCell::new(Vec::new());
        let mut first = true;
        f.ensure(3 * PAGE, PAGE, 1 << 20, &counters, |offset, len| {
            log.borrow_mut().push((offset, len));
            if first {
                first = false;
                f.committed.store(PAGE, Ordering::Release);
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(*log.borrow(), vec![(0, 3 * PAGE), (PAGE, 2 * PAGE)]);
        assert_eq!(f.load(), 3 * PAGE);
    }

    #[test]
    fn commit_failure_is_not_retried_and_frontier_holds() {
        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let mut calls = 0;
        let err = f
            .ensure(PAGE + 1, PAGE, 1 << 20, &counters, |_, len| {
                calls += 1;
                Err(VmError::Commit { len, os_code: Some(12) })
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(f.load(), 0);
        assert_eq!(
            err,
            ArenaError::CommitFailed {
                offset: 0,
                len: 2 * PAGE,
                source: VmError::Commit {
                    len: 2 * PAGE,
                    os_code: Some(12)
                },
            }
        );
    }

    #[test]
    fn concurrent_ensure_is_monotonic_and_covering() {
        use std::sync::atomic::AtomicBool;

        let f = CommitFrontier::new();
        let counters = ArenaCounters::default();
        let limit = 64 * PAGE;
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            let sampler = s.spawn(|| {
                let mut last = 0;
                while !done.load(Ordering::Acquire) {
                    let now = f.load();
                    assert!(now >= last, "frontier shrank: {last} -> {now}");
                    last = now;
                }
            });
            let workers: Vec<_> = (0..4)
                .map(|t| {
                    let f = &f;
                    let counters = &counters;
                    s.spawn(move || {
                        for i in 0..256 {
                            let needed = ((i * 4 + t) * 256).min(limit);
                            f.ensure(needed, PAGE, limit, counters, |_, _| Ok(())).unwrap();
                            assert!(f.load() >= needed);
                        }
                    })
                })
                .collect();
            for w in workers {
                w.join().unwrap();
            }
            done.store(true, Ordering::Release);
            sampler.join().unwrap();
        });
        assert_eq!(f.load(), limit);
    }

    #[test]
    fn frontier_is_cache_line_aligned() {
        assert!(std::mem::align_of::<CommitFrontier>() >= 128);
    }
}
