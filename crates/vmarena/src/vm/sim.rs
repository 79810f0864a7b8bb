//! Heap-backed virtual memory with commit bookkeeping.
//!
//! [`SimulatedVm`] hands out zeroed, page-aligned heap blocks as
//! "reservations" and tracks commit state per page. It cannot fault on
//! access to uncommitted pages the way real virtual memory does, so
//! tests assert coverage explicitly through [`is_committed`](SimulatedVm::is_committed)
//! and the call counters.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::VirtualMemory;
use crate::error::VmError;

/// Default simulated page size.
pub const DEFAULT_SIM_PAGE_SIZE: usize = 4096;

const NEVER_FAIL: u64 = u64::MAX;

/// Deterministic in-process [`VirtualMemory`] backend.
///
/// Cloning yields another handle to the same backend, so a test can keep
/// one clone for inspection while the arena owns the other.
#[derive(Clone, Debug)]
pub struct SimulatedVm {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    page_size: usize,
    commit_calls: AtomicU64,
    commit_bytes: AtomicU64,
    /// Successful commits remaining before commits start failing.
    commits_until_failure: AtomicU64,
    fail_reserve: AtomicBool,
    regions: Mutex<Vec<Region>>,
}

#[derive(Debug)]
struct Region {
    base: usize,
    layout: Layout,
    /// One flag per page.
    committed: Vec<bool>,
}

// Compile-time assertion: SimulatedVm must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SimulatedVm>();
};

impl SimulatedVm {
    /// Create a backend with [`DEFAULT_SIM_PAGE_SIZE`] pages.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_SIM_PAGE_SIZE)
    }

    /// Create a backend with the given page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    pub fn with_page_size(page_size: usize) -> Self {
        assert!(
            page_size.is_power_of_two(),
            "page size {page_size} is not a power of two"
        );
        Self {
            inner: Arc::new(Inner {
                page_size,
                commit_calls: AtomicU64::new(0),
                commit_bytes: AtomicU64::new(0),
                commits_until_failure: AtomicU64::new(NEVER_FAIL),
                fail_reserve: AtomicBool::new(false),
                regions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make every subsequent `reserve` fail.
    pub fn fail_reserve(&self) {
        self.inner.fail_reserve.store(true, Ordering::Release);
    }

    /// Let `n` more commits succeed, then fail every commit after that.
    pub fn fail_commits_after(&self, n: u64) {
        self.inner.commits_until_failure.store(n, Ordering::Release);
    }

    /// Number of `commit` calls issued so far, successful or not.
    pub fn commit_calls(&self) -> u64 {
        self.inner.commit_calls.load(Ordering::Acquire)
    }

    /// Total bytes passed to `commit` so far, including redundant commits.
    pub fn commit_bytes(&self) -> u64 {
        self.inner.commit_bytes.load(Ordering::Acquire)
    }

    /// Number of reservations not yet released.
    pub fn live_reservations(&self) -> usize {
        self.regions().len()
    }

    /// Whether every page touching `[offset, offset+len)` of the
    /// reservation starting at `base` is committed.
    ///
    /// An empty range is trivially committed. Returns false if `base` is
    /// not a live reservation or the range runs past its end.
    pub fn is_committed(&self, base: NonNull<u8>, offset: usize, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        let regions = self.regions();
        let Some(region) = regions.iter().find(|r| r.base == base.as_ptr() as usize) else {
            return false;
        };
        let Some(end) = offset.checked_add(len) else {
            return false;
        };
        if end > region.layout.size() {
            return false;
        }
        let first = offset / self.inner.page_size;
        let last = (end - 1) / self.inner.page_size;
        region.committed[first..=last].iter().all(|&c| c)
    }

    /// Number of committed pages in the reservation starting at `base`.
    pub fn committed_pages(&self, base: NonNull<u8>) -> usize {
        self.regions()
            .iter()
            .find(|r| r.base == base.as_ptr() as usize)
            .map_or(0, |r| r.committed.iter().filter(|&&c| c).count())
    }

    fn regions(&self) -> MutexGuard<'_, Vec<Region>> {
        self.inner
            .regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume one unit of the failure budget; true if this commit must fail.
    fn should_fail_commit(&self) -> bool {
        self.inner
            .commits_until_failure
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                NEVER_FAIL | 0 => None,
                n => Some(n - 1),
            })
            .is_err_and(|n| n == 0)
    }
}

impl Default for SimulatedVm {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: each reservation is a distinct zeroed heap block owned by the
// caller until release; commit only flips bookkeeping flags, so page
// contents survive repeated commits and fresh pages read as zero.
unsafe impl VirtualMemory for SimulatedVm {
    fn page_size(&self) -> usize {
        self.inner.page_size
    }

    fn reserve(&self, len: usize) -> Result<NonNull<u8>, VmError> {
        if self.inner.fail_reserve.load(Ordering::Acquire) {
            return Err(VmError::Reserve { len, os_code: None });
        }
        let layout = Layout::from_size_align(len, self.inner.page_size)
            .map_err(|_| VmError::Reserve { len, os_code: None })?;
        if layout.size() == 0 {
            return Err(VmError::Reserve { len, os_code: None });
        }
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(VmError::Reserve { len, os_code: None })?;
        self.regions().push(Region {
            base: ptr as usize,
            layout,
            committed: vec![false; len.div_ceil(self.inner.page_size)],
        });
        Ok(base)
    }

    unsafe fn commit(&self, addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
        self.inner.commit_calls.fetch_add(1, Ordering::AcqRel);
        self.inner
            .commit_bytes
            .fetch_add(len as u64, Ordering::AcqRel);
        if self.should_fail_commit() {
            return Err(VmError::Commit { len, os_code: None });
        }
        if len == 0 {
            return Ok(());
        }
        let page_size = self.inner.page_size;
        let addr = addr.as_ptr() as usize;
        debug_assert_eq!(addr % page_size, 0, "commit address must be page-aligned");
        let mut regions = self.regions();
        let region = regions
            .iter_mut()
            .find(|r| addr >= r.base && addr + len <= r.base + r.layout.size());
        let Some(region) = region else {
            panic!("commit of {len} bytes at {addr:#x} is outside every live reservation");
        };
        let first = (addr - region.base) / page_size;
        let last = (addr - region.base + len - 1) / page_size;
        region.committed[first..=last].fill(true);
        Ok(())
    }

    unsafe fn release(&self, addr: NonNull<u8>, len: usize) {
        let mut regions = self.regions();
        let idx = regions
            .iter()
            .position(|r| r.base == addr.as_ptr() as usize);
        let Some(idx) = idx else {
            panic!("release of unknown reservation at {addr:?}");
        };
        let region = regions.swap_remove(idx);
        debug_assert_eq!(region.layout.size(), len);
        // SAFETY: region.base was returned by alloc_zeroed with region.layout.
        unsafe { alloc::dealloc(region.base as *mut u8, region.layout) };
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let regions = self
            .regions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for region in regions.drain(..) {
            // SAFETY: unreleased blocks are still owned by the backend.
            unsafe { alloc::dealloc(region.base as *mut u8, region.layout) };
        }
    }
}
