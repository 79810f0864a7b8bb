//! Virtual-memory primitives consumed by the arena.
//!
//! The arena never talks to the OS directly. It reserves, commits and
//! releases through a [`VirtualMemory`] backend:
//!
//! - [`SystemVm`]: the process's virtual-memory subsystem
//!   (`mmap`/`mprotect`/`munmap` on Unix, `VirtualAlloc`/`VirtualFree` on Windows).
//! - [`SimulatedVm`]: heap-backed, page-size configurable, records every
//!   commit call and can inject failures. Used by tests and benches.
//!
//! [`Reservation`] owns a reserved range and releases it on drop.

pub mod os;
pub mod sim;

use std::ptr::NonNull;

use crate::align::checked_align_up;
use crate::error::VmError;

pub use os::SystemVm;
pub use sim::SimulatedVm;

/// A provider of reservable, lazily committable address space.
///
/// # Safety
///
/// Implementors must uphold, for every range returned by `reserve`:
///
/// - The range is exclusively owned by the caller until `release`.
/// - After `commit(addr, len)` returns `Ok`, every byte of `[addr, addr+len)`
///   is readable and writable from any thread, and a byte committed for
///   the first time reads as zero.
/// - `commit` is idempotent: committing an already-committed page neither
///   fails nor changes its contents.
pub unsafe trait VirtualMemory: Send + Sync {
    /// Page size in bytes. Always a power of two.
    fn page_size(&self) -> usize;

    /// Reserve `len` bytes of address space with no physical backing.
    ///
    /// `len` is a non-zero multiple of [`page_size`](Self::page_size).
    /// The returned address is page-aligned.
    fn reserve(&self, len: usize) -> Result<NonNull<u8>, VmError>;

    /// Back `[addr, addr+len)` with physical memory.
    ///
    /// # Safety
    ///
    /// `addr` must be page-aligned and the range must lie inside a
    /// reservation obtained from this backend that has not been released.
    unsafe fn commit(&self, addr: NonNull<u8>, len: usize) -> Result<(), VmError>;

    /// Return a whole reservation, committed or not, to the backend.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must be exactly a pair previously returned by
    /// `reserve`, and no reference into the range may outlive this call.
    unsafe fn release(&self, addr: NonNull<u8>, len: usize);
}

/// An exclusively-owned reserved address range.
///
/// Created once when an arena is built, released once on drop, whether
/// or not any of it was committed.
pub struct Reservation<V: VirtualMemory> {
    vm: V,
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the range is exclusively owned and only reachable through the
// reservation; the backend itself is Send + Sync by trait bound.
unsafe impl<V: VirtualMemory> Send for Reservation<V> {}
// SAFETY: shared access only reads base/len and calls the Sync backend.
unsafe impl<V: VirtualMemory> Sync for Reservation<V> {}

impl<V: VirtualMemory> Reservation<V> {
    /// Reserve at least `len` bytes from `vm`, rounded up to whole pages.
    pub fn new(vm: V, len: usize) -> Result<Self, VmError> {
        let page_size = vm.page_size();
        let len = checked_align_up(len.max(1), page_size).ok_or(VmError::Reserve {
            len,
            os_code: None,
        })?;
        let base = vm.reserve(len)?;
        tracing::debug!(len, page_size, base = ?base, "reserved address range");
        Ok(Self { vm, base, len })
    }

    /// First byte of the reservation.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Reserved length in bytes (a multiple of the page size).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: a reservation spans at least one page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The backend that owns this range.
    #[inline]
    pub fn vm(&self) -> &V {
        &self.vm
    }

    /// Commit `len` bytes starting `offset` bytes into the reservation.
    ///
    /// # Safety
    ///
    /// `offset` must be page-aligned and `offset + len <= self.len()`.
    pub(crate) unsafe fn commit(&self, offset: usize, len: usize) -> Result<(), VmError> {
        debug_assert!(offset % self.vm.page_size() == 0);
        debug_assert!(offset + len <= self.len);
        // SAFETY: offset is within the reservation per caller contract, so
        // the add stays in bounds and cannot produce a null pointer.
        let addr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        // SAFETY: the range lies inside our live reservation.
        unsafe { self.vm.commit(addr, len) }
    }
}

impl<V: VirtualMemory> Drop for Reservation<V> {
    fn drop(&mut self) {
        tracing::debug!(len = self.len, base = ?self.base, "releasing address range");
        // SAFETY: base/len came from reserve() and this is the only release.
        // Borrows handed out by the arena cannot outlive it, and the arena
        // owns this reservation.
        unsafe { self.vm.release(self.base, self.len) };
    }
}

impl<V: VirtualMemory + std::fmt::Debug> std::fmt::Debug for Reservation<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("vm", &self.vm)
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}
