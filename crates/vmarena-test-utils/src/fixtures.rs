//! Reusable arena fixtures.
//!
//! Constants and builders for the reference scenarios:
//!
//! - A: 4 KiB arena, 3 threads × 1024 `allocate(4, 8)`; exactly 512 fit.
//! - B: 1 MiB arena, 1000 sequential `allocate(4, 8)`; 8000 bytes
//!   allocated, two 4 KiB pages committed.
//! - C: B, then reset, then B again; no further commits.

use vmarena::{Arena, ArenaConfig, SimulatedVm};

/// Page size used by every simulated fixture.
pub const PAGE_SIZE: usize = 4096;

pub const SCENARIO_A_CAPACITY: usize = 4096;
pub const SCENARIO_A_THREADS: usize = 3;
pub const SCENARIO_A_CALLS: usize = 1024;

pub const SCENARIO_B_CAPACITY: usize = 1 << 20;
pub const SCENARIO_B_CALLS: usize = 1000;

/// Object size and alignment shared by the scenarios (an `i32` at
/// pointer alignment).
pub const OBJECT_SIZE: usize = 4;
pub const OBJECT_ALIGN: usize = 8;

/// A simulated arena with 4 KiB pages, plus an observer handle on its backend.
pub fn sim_arena(capacity: usize) -> (Arena<SimulatedVm>, SimulatedVm) {
    sim_arena_with(ArenaConfig::new(capacity).with_min_align(OBJECT_ALIGN))
}

/// A simulated arena with 4 KiB pages built from `config`.
///
/// # Panics
///
/// Panics if `config` is invalid for 4 KiB pages.
pub fn sim_arena_with(config: ArenaConfig) -> (Arena<SimulatedVm>, SimulatedVm) {
    let vm = SimulatedVm::with_page_size(PAGE_SIZE);
    let arena = Arena::with_config(config, vm.clone()).expect("fixture config is valid");
    (arena, vm)
}

/// Run scenario B's allocation sequence on one thread.
///
/// # Panics
///
/// Panics if any allocation fails.
pub fn allocate_scenario_b(arena: &Arena<SimulatedVm>) {
    for i in 0..SCENARIO_B_CALLS {
        if let Err(e) = arena.allocate(OBJECT_SIZE, OBJECT_ALIGN) {
            panic!("scenario B allocation {i} failed: {e}");
        }
    }
}
