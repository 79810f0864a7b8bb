//! The arena: one reservation, two cursors.
//!
//! [`Arena`] owns a reserved address range and composes the wait-free
//! bump cursor with the lock-free commit frontier. Allocation bumps
//! first, then makes sure the granted range is committed, and only then
//! builds a pointer into it.

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

use crate::bump::BumpCursor;
use crate::commit::CommitFrontier;
use crate::config::{ArenaConfig, DEFAULT_ALIGN};
use crate::error::{ArenaError, InitError};
use crate::stats::{ArenaCounters, ArenaStats};
use crate::vm::{Reservation, SystemVm, VirtualMemory};

/// A concurrent bump arena over lazily committed virtual memory.
///
/// Any number of threads may call [`allocate`](Self::allocate) through a
/// shared reference. Memory is only returned in bulk, by
/// [`reset`](Self::reset) or by dropping the arena, which releases the
/// whole reservation.
pub struct Arena<V: VirtualMemory = SystemVm> {
    cursor: BumpCursor,
    frontier: CommitFrontier,
    reservation: Reservation<V>,
    capacity: usize,
    granularity: usize,
    min_align: usize,
    counters: ArenaCounters,
}

// Compile-time assertion: Arena must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Arena>();
    assert::<Arena<crate::vm::SimulatedVm>>();
};

impl Arena<SystemVm> {
    /// Reserve `capacity` bytes of address space from the OS.
    ///
    /// Nothing is committed until the first allocation.
    pub fn new(capacity: usize) -> Result<Self, InitError> {
        Self::with_config(ArenaConfig::new(capacity), SystemVm)
    }
}

impl<V: VirtualMemory> Arena<V> {
    /// Build an arena from an explicit config and backend.
    pub fn with_config(config: ArenaConfig, vm: V) -> Result<Self, InitError> {
        let page_size = vm.page_size();
        config.validate(page_size)?;
        let granularity = config.resolved_commit_granularity(page_size);
        let reservation =
            Reservation::new(vm, config.capacity).map_err(|source| InitError::ReservationFailed {
                capacity: config.capacity,
                source,
            })?;
        tracing::debug!(
            capacity = config.capacity,
            reserved = reservation.len(),
            page_size,
            granularity,
            min_align = config.min_align,
            "arena created"
        );
        Ok(Self {
            cursor: BumpCursor::new(),
            frontier: CommitFrontier::new(),
            reservation,
            capacity: config.capacity,
            granularity,
            min_align: config.min_align,
            counters: ArenaCounters::default(),
        })
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// Wait-free when the range is already committed; otherwise joins the
    /// lock-free commit protocol. The returned range is committed for its
    /// full length and disjoint from every other live allocation. Writing
    /// past `size` is the caller's responsibility to avoid.
    ///
    /// A zero-sized request succeeds at the current cursor without
    /// committing anything.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::CapacityExhausted`] if the request does not fit.
    ///   The allocation cursor is left exactly as it was.
    /// - [`ArenaError::CommitFailed`] if the backend cannot commit an
    ///   in-range request. Treat as fatal.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn allocate(&self, size: usize, align: usize) -> Result<Allocation<'_>, ArenaError> {
        assert!(
            align.is_power_of_two(),
            "alignment {align} is not a power of two"
        );
        let base = self.reservation.base();
        let grant = match self.cursor.reserve(
            size,
            align,
            self.min_align,
            self.capacity,
            base.as_ptr() as usize,
        ) {
            Ok(grant) => grant,
            Err(_) => {
                self.counters.record_exhausted();
                tracing::trace!(size, align, capacity = self.capacity, "capacity exhausted");
                return Err(ArenaError::CapacityExhausted {
                    requested: size,
                    capacity: self.capacity,
                });
            }
        };

        if size > 0 {
            self.frontier.ensure(
                grant.end,
                self.granularity,
                self.capacity,
                &self.counters,
                |offset, len| {
                    // SAFETY: ensure() only passes granularity-aligned offsets
                    // (hence page-aligned) with offset + len <= capacity, and
                    // capacity <= reservation length.
                    unsafe { self.reservation.commit(offset, len) }
                },
            )?;
        }

        // SAFETY: grant.offset <= capacity <= reservation length, so the
        // pointer stays within (or one past) the reserved range.
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(grant.offset)) };
        Ok(Allocation {
            ptr,
            offset: grant.offset,
            len: size,
            _arena: PhantomData,
        })
    }

    /// Allocate `size` bytes at [`DEFAULT_ALIGN`].
    pub fn alloc(&self, size: usize) -> Result<Allocation<'_>, ArenaError> {
        self.allocate(size, DEFAULT_ALIGN)
    }

    /// Allocate space for `layout`.
    pub fn alloc_layout(&self, layout: Layout) -> Result<Allocation<'_>, ArenaError> {
        self.allocate(layout.size(), layout.align())
    }

    /// Move `value` into the arena.
    ///
    /// The value is never dropped; its storage is reclaimed by
    /// [`reset`](Self::reset) or by dropping the arena.
    pub fn alloc_value<T>(&self, value: T) -> Result<&mut T, ArenaError> {
        let ptr = self.alloc_layout(Layout::new::<T>())?.as_non_null().cast::<T>();
        // SAFETY: the allocation is committed, exclusively ours, sized and
        // aligned for T, and lives as long as the shared borrow of self.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copy `src` into the arena.
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Result<&mut [T], ArenaError> {
        let layout = Layout::array::<T>(src.len()).map_err(|_| ArenaError::CapacityExhausted {
            requested: mem::size_of::<T>().saturating_mul(src.len()),
            capacity: self.capacity,
        })?;
        let ptr = self.alloc_layout(layout)?.as_non_null().cast::<T>();
        // SAFETY: as in alloc_value; the source cannot overlap a fresh
        // allocation we exclusively own.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len());
            Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), src.len()))
        }
    }

    /// Rewind the allocation cursor to zero.
    ///
    /// The commit cursor is untouched: pages committed so far stay
    /// committed and are reused by later allocations without new commit
    /// calls. The exclusive borrow guarantees no allocation is in flight
    /// and no previous allocation is still borrowed.
    pub fn reset(&mut self) {
        // SAFETY: &mut self excludes concurrent allocate calls and
        // outstanding allocation borrows.
        unsafe { self.reset_shared() }
    }

    /// Rewind the allocation cursor through a shared reference.
    ///
    /// For arenas shared behind `Arc` where [`reset`](Self::reset) is not
    /// reachable.
    ///
    /// # Safety
    ///
    /// No other thread may be inside any allocation method during this
    /// call (e.g. all workers parked at a barrier), and no reference or
    /// pointer obtained from an earlier allocation may be used afterwards.
    pub unsafe fn reset_shared(&self) {
        let allocated = self.allocated();
        self.cursor.rewind();
        self.counters.record_reset();
        tracing::debug!(
            allocated,
            committed = self.frontier.load(),
            "arena reset"
        );
    }

    /// Declared capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocation cursor: bytes handed out since the last reset,
    /// including alignment padding. Never exceeds capacity.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.cursor.load().min(self.capacity)
    }

    /// Commit cursor: length of the committed prefix. Never decreases.
    #[inline]
    pub fn committed(&self) -> usize {
        self.frontier.load()
    }

    /// Bytes still available for allocation.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.allocated())
    }

    /// Backend page size.
    pub fn page_size(&self) -> usize {
        self.reservation.vm().page_size()
    }

    /// Bytes committed per commit step.
    pub fn commit_granularity(&self) -> usize {
        self.granularity
    }

    /// Granule allocation sizes are rounded to.
    pub fn min_align(&self) -> usize {
        self.min_align
    }

    /// Reserved length: capacity rounded up to whole pages.
    pub fn reserved_len(&self) -> usize {
        self.reservation.len()
    }

    /// Address of offset 0.
    pub fn base_ptr(&self) -> NonNull<u8> {
        self.reservation.base()
    }

    /// The virtual-memory backend.
    pub fn vm(&self) -> &V {
        self.reservation.vm()
    }

    /// Snapshot of cursors and counters.
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            capacity: self.capacity,
            allocated_bytes: self.allocated(),
            committed_bytes: self.committed(),
            ..Default::default()
        };
        self.counters.fill(&mut stats);
        stats
    }
}

impl<V: VirtualMemory> fmt::Debug for Arena<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("base", &self.reservation.base())
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated())
            .field("committed", &self.committed())
            .field("granularity", &self.granularity)
            .finish()
    }
}

/// A committed byte range handed out by [`Arena::allocate`].
///
/// Borrows the arena, so it cannot outlive it or survive a
/// [`reset`](Arena::reset).
pub struct Allocation<'a> {
    ptr: NonNull<u8>,
    offset: usize,
    len: usize,
    _arena: PhantomData<&'a mut [u8]>,
}

// SAFETY: an Allocation is a unique handle to its bytes, like &mut [u8].
unsafe impl Send for Allocation<'_> {}
// SAFETY: shared access exposes only the address and length.
unsafe impl Sync for Allocation<'_> {}

impl<'a> Allocation<'a> {
    /// Offset of the first byte from the arena base.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Usable length in bytes (the requested size, padding excluded).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether this is a zero-sized allocation.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw pointer to the first byte.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Non-null pointer to the first byte.
    #[inline]
    pub fn as_non_null(&self) -> NonNull<u8> {
        self.ptr
    }

    /// View the range as possibly-uninitialised bytes.
    ///
    /// After a reset the range may hold whatever an earlier allocation
    /// left behind, including uninitialised padding.
    pub fn into_uninit(self) -> &'a mut [MaybeUninit<u8>] {
        // SAFETY: the range is committed, exclusively owned for 'a, and
        // MaybeUninit<u8> has no validity requirements.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast(), self.len) }
    }

    /// Zero the range and view it as bytes.
    pub fn into_zeroed(self) -> &'a mut [u8] {
        // SAFETY: the range is committed and exclusively owned for 'a;
        // after write_bytes every byte is initialised.
        unsafe {
            ptr::write_bytes(self.ptr.as_ptr(), 0, self.len);
            std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
        }
    }
}

impl fmt::Debug for Allocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("ptr", &self.ptr)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
