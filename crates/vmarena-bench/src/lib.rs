//! Benchmark profiles and utilities for vmarena.
//!
//! Provides pre-built [`ArenaProfile`]s for benchmarks and the demo:
//!
//! - [`reference_profile`]: 1 MiB arena, 3 threads × 1024 `i32` slots
//! - [`stress_profile`]: 256 MiB arena, 8 threads × 1M small objects
//! - [`run_profile`]: drive a profile to completion and report totals

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::thread;

use vmarena::{Arena, ArenaConfig, ArenaError, InitError, VirtualMemory};

/// Shape of a concurrent allocation workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaProfile {
    /// Arena capacity in bytes.
    pub capacity: usize,
    /// Commit step in bytes; `None` means one page.
    pub commit_granularity: Option<usize>,
    /// Allocating threads.
    pub threads: usize,
    /// Allocations per thread.
    pub per_thread: usize,
    /// Bytes per allocation.
    pub object_size: usize,
    /// Alignment per allocation.
    pub object_align: usize,
}

impl ArenaProfile {
    /// Arena config for this profile.
    pub fn config(&self) -> ArenaConfig {
        let config = ArenaConfig::new(self.capacity);
        match self.commit_granularity {
            Some(g) => config.with_commit_granularity(g),
            None => config,
        }
    }

    /// Build an arena for this profile on `vm`.
    pub fn build<V: VirtualMemory>(&self, vm: V) -> Result<Arena<V>, InitError> {
        Arena::with_config(self.config(), vm)
    }

    /// Total allocation calls across all threads.
    pub fn total_calls(&self) -> usize {
        self.threads * self.per_thread
    }
}

/// Reference profile: 1 MiB arena, 3 threads × 1024 `i32` slots.
pub fn reference_profile() -> ArenaProfile {
    ArenaProfile {
        capacity: 1 << 20,
        commit_granularity: None,
        threads: 3,
        per_thread: 1024,
        object_size: std::mem::size_of::<i32>(),
        object_align: std::mem::align_of::<i32>(),
    }
}

/// Stress profile: 256 MiB arena, 8 threads × 1M 24-byte objects.
///
/// Touches roughly 200 MiB, so the commit path runs tens of thousands
/// of times under contention.
pub fn stress_profile() -> ArenaProfile {
    ArenaProfile {
        capacity: 256 << 20,
        commit_granularity: None,
        threads: 8,
        per_thread: 1 << 20,
        object_size: 24,
        object_align: 8,
    }
}

/// Totals from one [`run_profile`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunTotals {
    /// Successful allocations.
    pub succeeded: usize,
    /// `CapacityExhausted` results.
    pub exhausted: usize,
}

/// Run `profile` against `arena` from `profile.threads` scoped threads.
///
/// Each successful allocation gets its first byte written so committed
/// pages are actually touched.
///
/// # Errors
///
/// Returns the first fatal error any thread hit. Threads stop on their
/// first fatal error; capacity exhaustion is counted, not returned.
pub fn run_profile<V: VirtualMemory>(
    arena: &Arena<V>,
    profile: &ArenaProfile,
) -> Result<RunTotals, ArenaError> {
    let results: Vec<Result<RunTotals, ArenaError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..profile.threads)
            .map(|_| {
                s.spawn(move || {
                    let mut totals = RunTotals::default();
                    for _ in 0..profile.per_thread {
                        match arena.allocate(profile.object_size, profile.object_align) {
                            Ok(a) => {
                                if let Some(b) = a.into_uninit().first_mut() {
                                    b.write(1);
                                }
                                totals.succeeded += 1;
                            }
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(_) => totals.exhausted += 1,
                        }
                    }
                    Ok(totals)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
            .collect()
    });

    let mut sum = RunTotals::default();
    for r in results {
        let t = r?;
        sum.succeeded += t.succeeded;
        sum.exhausted += t.exhausted;
    }
    Ok(sum)
}
