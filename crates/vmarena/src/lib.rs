//! Lock-free bump arena over lazily committed virtual memory.
//!
//! An [`Arena`] reserves its full capacity of address space up front and
//! commits physical pages only as allocations reach them. Any number of
//! threads allocate through a shared reference without taking locks.
//!
//! # Architecture
//!
//! ```text
//! Arena
//! ├── BumpCursor      allocation cursor: fetch_add or CAS bump, exact rollback
//! ├── CommitFrontier  commit cursor: commit-then-publish CAS loop
//! └── Reservation<V>  reserved range, released on drop
//!     └── V: VirtualMemory (SystemVm | SimulatedVm)
//! ```
//!
//! Allocation flow: bump the allocation cursor → bounds check (roll back
//! and fail, or continue) → grow the committed prefix to cover the grant
//! → return a pointer into the arena.
//!
//! The commit cursor only ever advances after the pages it covers have
//! been committed, so a thread that observes it can never touch unmapped
//! memory.
//!
//! # Example
//!
//! ```
//! use vmarena::{Arena, DEFAULT_ALIGN};
//!
//! let arena = Arena::new(1 << 20).unwrap();
//! std::thread::scope(|s| {
//!     for _ in 0..3 {
//!         s.spawn(|| {
//!             for i in 0..1024 {
//!                 *arena.alloc_value(i as i32).unwrap() += 1;
//!             }
//!         });
//!     }
//! });
//! assert_eq!(arena.allocated(), 3 * 1024 * DEFAULT_ALIGN);
//! ```
//!
//! # Safety
//!
//! This crate contains `unsafe` code in three places: the OS backend
//! ([`vm::os`]), the simulated backend ([`vm::sim`]), and pointer
//! construction in [`arena`]. Every block carries a `// SAFETY:` comment.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod align;
pub mod arena;
mod bump;
mod commit;
pub mod config;
pub mod error;
pub mod stats;
pub mod vm;

// Public re-exports for the primary API surface.
pub use arena::{Allocation, Arena};
pub use config::{ArenaConfig, ConfigError, DEFAULT_ALIGN};
pub use error::{ArenaError, InitError, VmError};
pub use stats::ArenaStats;
pub use vm::{Reservation, SimulatedVm, SystemVm, VirtualMemory};
