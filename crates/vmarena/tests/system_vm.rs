//! Smoke tests against the host's virtual-memory subsystem.
//!
//! Every grant is written through its pointer, so a page that was handed
//! out before being committed faults the test process.

#![cfg(all(any(unix, windows), not(miri)))]

use vmarena::{Arena, ArenaConfig, ArenaError, SystemVm, DEFAULT_ALIGN};
use vmarena_test_utils::{assert_disjoint, hammer};

#[test]
fn concurrent_values_survive() {
    let arena = Arena::new(1 << 20).unwrap();
    let slots: Vec<Vec<&mut i32>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..3)
            .map(|t| {
                let arena = &arena;
                s.spawn(move || {
                    (0..1024)
                        .map(|i| arena.alloc_value(t * 10_000 + i).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (t, values) in slots.iter().enumerate() {
        for (i, v) in values.iter().enumerate() {
            assert_eq!(**v, (t * 10_000 + i) as i32);
        }
    }
    assert_eq!(arena.allocated(), 3 * 1024 * DEFAULT_ALIGN);
    assert!(arena.committed() >= arena.allocated());
    assert_eq!(arena.committed() % arena.page_size(), 0);
}

#[test]
fn hammer_writes_every_grant() {
    let arena = Arena::new(4 << 20).unwrap();
    let report = hammer(&arena, 4, 5000, 100, 16);
    assert_eq!(report.exhausted, 0);
    assert_disjoint(&report.records);
    assert!(arena.committed() <= arena.capacity());
}

#[test]
fn exhaustion_on_real_pages() {
    let page = SystemVm::host_page_size();
    let arena = Arena::new(page).unwrap();
    let report = hammer(&arena, 3, page / 8, 4, 8);
    assert_eq!(report.succeeded(), page / 8);
    assert_eq!(arena.allocated(), page);
    assert_eq!(arena.committed(), page);
    assert!(matches!(
        arena.alloc(1),
        Err(ArenaError::CapacityExhausted { .. })
    ));
}

#[test]
fn reset_rewrites_same_pages() {
    let mut arena = Arena::new(1 << 16).unwrap();
    let first = arena.alloc(64).unwrap().as_ptr();
    let committed = arena.committed();
    arena.reset();
    let again = arena.alloc(64).unwrap();
    assert_eq!(again.as_ptr(), first);
    again.into_zeroed().fill(0x5A);
    assert_eq!(arena.committed(), committed);
}

#[cfg(target_pointer_width = "64")]
#[test]
fn large_reservation_commits_lazily() {
    let arena = Arena::with_config(ArenaConfig::new(16 << 30), SystemVm).unwrap();
    assert_eq!(arena.committed(), 0);
    let a = arena.allocate(1 << 20, 4096).unwrap();
    a.into_zeroed()[(1 << 20) - 1] = 1;
    assert_eq!(arena.committed(), 1 << 20);
}
