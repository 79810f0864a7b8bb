//! Concurrent allocation walkthrough.
//!
//! Demonstrates: reserve 1 MiB → three threads allocate and write 1024
//! `i32`s each → progress reported over a channel → verify every value →
//! reset → repeat without new commits.
//!
//! Run with `RUST_LOG=vmarena=debug` to see the arena's own events, or
//! `RUST_LOG=vmarena=trace` to see every commit.

use std::thread;

use crossbeam_channel::unbounded;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vmarena::Arena;

const THREADS: usize = 3;
const PER_THREAD: usize = 1024;
const REPORT_EVERY: usize = 256;

enum Progress {
    Allocated { thread: usize, count: usize },
    Done { thread: usize, sum: i64 },
}

fn run_round(arena: &Arena, round: usize) {
    let (tx, rx) = unbounded();

    let slots: Vec<Vec<&mut i32>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let tx = tx.clone();
                s.spawn(move || {
                    let mut mine = Vec::with_capacity(PER_THREAD);
                    let mut sum = 0i64;
                    for i in 0..PER_THREAD {
                        let value = (t * PER_THREAD + i) as i32;
                        mine.push(arena.alloc_value(value).unwrap());
                        sum += i64::from(value);
                        if (i + 1) % REPORT_EVERY == 0 {
                            tx.send(Progress::Allocated {
                                thread: t,
                                count: i + 1,
                            })
                            .unwrap();
                        }
                    }
                    tx.send(Progress::Done { thread: t, sum }).unwrap();
                    mine
                })
            })
            .collect();
        drop(tx);

        for msg in rx.iter() {
            match msg {
                Progress::Allocated { thread, count } => {
                    println!("  [round {round}] thread {thread}: {count:>4} allocated");
                }
                Progress::Done { thread, sum } => {
                    println!("  [round {round}] thread {thread}: done, sum={sum}");
                }
            }
        }

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (t, values) in slots.iter().enumerate() {
        for (i, v) in values.iter().enumerate() {
            assert_eq!(**v, (t * PER_THREAD + i) as i32, "slot overwritten");
        }
    }

    let stats = arena.stats();
    tracing::info!(
        round,
        allocated = stats.allocated_bytes,
        committed = stats.committed_bytes,
        commit_calls = stats.commit_calls,
        commit_races = stats.commit_races,
        "round complete"
    );
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_thread_names(true))
        .init();

    println!("=== vmarena concurrent allocation example ===\n");

    let mut arena = Arena::new(1 << 20).unwrap();
    println!(
        "reserved {} bytes, page size {}, nothing committed yet\n",
        arena.reserved_len(),
        arena.page_size()
    );

    run_round(&arena, 1);
    let committed = arena.committed();

    arena.reset();
    println!("\nreset: allocation cursor back to 0, {committed} bytes stay committed\n");

    run_round(&arena, 2);
    assert_eq!(arena.committed(), committed, "reset round should not commit");

    println!("\nfinal stats: {:?}", arena.stats());
}
