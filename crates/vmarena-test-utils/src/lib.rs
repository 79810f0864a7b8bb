//! Test drivers and checkers for vmarena development.
//!
//! - [`hammer`] / [`hammer_checked`]: drive an arena from many threads at
//!   once and collect every grant.
//! - [`assert_disjoint`]: no two non-empty grants overlap.
//! - [`sample_committed_while`]: record the commit cursor from a side
//!   thread while a workload runs.
//! - [`fixtures`]: arenas and constants for the reference scenarios.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

use vmarena::{Allocation, Arena, ArenaError, SimulatedVm, VirtualMemory};

/// One successful allocation, as seen by the thread that made it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocRecord {
    pub thread: usize,
    pub offset: usize,
    pub len: usize,
}

impl AllocRecord {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Outcome of a [`hammer`] run.
#[derive(Clone, Debug, Default)]
pub struct HammerReport {
    /// Every successful allocation, across all threads.
    pub records: Vec<AllocRecord>,
    /// Number of `CapacityExhausted` results.
    pub exhausted: usize,
    /// Successful allocations whose range was not committed at return.
    /// Only populated by [`hammer_checked`].
    pub uncommitted: usize,
}

impl HammerReport {
    pub fn succeeded(&self) -> usize {
        self.records.len()
    }
}

/// Run `calls` allocations of `size`/`align` on each of `threads` threads.
///
/// All threads start together behind a barrier. Each successful grant is
/// zero-filled and stamped with the thread index, so an uncommitted page
/// on a real backend faults here rather than later.
///
/// # Panics
///
/// Panics on any error other than `CapacityExhausted`, or if a stamp is
/// found overwritten by the end of the run.
pub fn hammer<V: VirtualMemory>(
    arena: &Arena<V>,
    threads: usize,
    calls: usize,
    size: usize,
    align: usize,
) -> HammerReport {
    run(arena, threads, calls, size, align, |_| true)
}

/// Like [`hammer`], but also checks with the simulated backend that each
/// grant was committed at the instant `allocate` returned.
pub fn hammer_checked(
    arena: &Arena<SimulatedVm>,
    threads: usize,
    calls: usize,
    size: usize,
    align: usize,
) -> HammerReport {
    run(arena, threads, calls, size, align, |a: &Allocation<'_>| {
        arena
            .vm()
            .is_committed(arena.base_ptr(), a.offset(), a.len())
    })
}

fn run<V, F>(
    arena: &Arena<V>,
    threads: usize,
    calls: usize,
    size: usize,
    align: usize,
    committed_at_return: F,
) -> HammerReport
where
    V: VirtualMemory,
    F: Fn(&Allocation<'_>) -> bool + Sync,
{
    let barrier = Barrier::new(threads);
    let per_thread: Vec<(Vec<AllocRecord>, usize, usize)> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let barrier = &barrier;
                let check = &committed_at_return;
                s.spawn(move || {
                    let mut records = Vec::with_capacity(calls);
                    let mut stamped = Vec::new();
                    let mut exhausted = 0;
                    let mut uncommitted = 0;
                    barrier.wait();
                    for _ in 0..calls {
                        match arena.allocate(size, align) {
                            Ok(a) => {
                                if !check(&a) {
                                    uncommitted += 1;
                                }
                                records.push(AllocRecord {
                                    thread: t,
                                    offset: a.offset(),
                                    len: a.len(),
                                });
                                let bytes = a.into_zeroed();
                                bytes.fill(stamp(t));
                                stamped.push(bytes);
                            }
                            Err(ArenaError::CapacityExhausted { .. }) => exhausted += 1,
                            Err(e) => panic!("thread {t}: unexpected allocation error: {e}"),
                        }
                    }
                    for bytes in &stamped {
                        assert!(
                            bytes.iter().all(|&b| b == stamp(t)),
                            "thread {t}: allocation overwritten by another thread"
                        );
                    }
                    (records, exhausted, uncommitted)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("allocation thread panicked"))
            .collect()
    });

    let mut report = HammerReport::default();
    for (records, exhausted, uncommitted) in per_thread {
        report.records.extend(records);
        report.exhausted += exhausted;
        report.uncommitted += uncommitted;
    }
    report
}

fn stamp(thread: usize) -> u8 {
    (thread as u8).wrapping_mul(37).wrapping_add(1)
}

/// Assert that no two non-empty records overlap.
///
/// # Panics
///
/// Panics naming the first overlapping pair.
pub fn assert_disjoint(records: &[AllocRecord]) {
    let mut sorted: Vec<_> = records.iter().filter(|r| r.len > 0).copied().collect();
    sorted.sort_by_key(|r| r.offset);
    for w in sorted.windows(2) {
        assert!(
            w[0].end() <= w[1].offset,
            "overlapping allocations: {:?} and {:?}",
            w[0],
            w[1]
        );
    }
}

/// Run `work` while a side thread samples `arena.committed()`.
///
/// Returns the work's result and the samples in observation order,
/// including one final sample taken after `work` finished.
pub fn sample_committed_while<V, R, F>(arena: &Arena<V>, work: F) -> (R, Vec<usize>)
where
    V: VirtualMemory,
    F: FnOnce() -> R,
{
    let done = AtomicBool::new(false);
    thread::scope(|s| {
        let sampler = s.spawn(|| {
            let mut samples = Vec::new();
            while !done.load(Ordering::Acquire) {
                samples.push(arena.committed());
                thread::yield_now();
            }
            samples.push(arena.committed());
            samples
        });
        let result = work();
        done.store(true, Ordering::Release);
        let samples = sampler.join().expect("sampler thread panicked");
        (result, samples)
    })
}
