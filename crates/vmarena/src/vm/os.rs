//! The operating system's virtual-memory subsystem.
//!
//! This is the only module that calls into the OS. Every `unsafe` block
//! carries a `// SAFETY:` comment.

use std::ptr::NonNull;
use std::sync::OnceLock;

use super::VirtualMemory;
use crate::error::VmError;

/// Reserve/commit/release through the host OS.
///
/// Stateless; the page size is queried once per process and cached.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemVm;

impl SystemVm {
    /// The host page size in bytes.
    pub fn host_page_size() -> usize {
        static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
        *PAGE_SIZE.get_or_init(imp::page_size)
    }
}

// SAFETY: mmap/VirtualAlloc reservations are exclusively owned by the
// caller, commit maps zero-filled pages and is idempotent on pages that
// are already readable/writable, and release unmaps the whole range.
unsafe impl VirtualMemory for SystemVm {
    fn page_size(&self) -> usize {
        Self::host_page_size()
    }

    fn reserve(&self, len: usize) -> Result<NonNull<u8>, VmError> {
        imp::reserve(len)
    }

    unsafe fn commit(&self, addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
        // SAFETY: forwarded caller contract.
        unsafe { imp::commit(addr, len) }
    }

    unsafe fn release(&self, addr: NonNull<u8>, len: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { imp::release(addr, len) }
    }
}

#[cfg(unix)]
mod imp {
    use std::ptr::{self, NonNull};

    use crate::error::VmError;

    pub(super) fn page_size() -> usize {
        // SAFETY: sysconf has no memory-safety preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size < 1 {
            tracing::warn!(size, "sysconf(_SC_PAGESIZE) failed, assuming 4096");
            return 4096;
        }
        size as usize
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    const RESERVE_FLAGS: libc::c_int =
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    pub(super) fn reserve(len: usize) -> Result<NonNull<u8>, VmError> {
        // SAFETY: anonymous PROT_NONE mapping at a kernel-chosen address;
        // touches no existing memory.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_NONE,
                RESERVE_FLAGS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(VmError::last_os_reserve(len));
        }
        NonNull::new(addr.cast::<u8>()).ok_or(VmError::Reserve { len, os_code: None })
    }

    pub(super) unsafe fn commit(addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
        // SAFETY: addr is page-aligned and [addr, addr+len) lies inside a
        // live mapping we created (caller contract).
        let rc = unsafe {
            libc::mprotect(
                addr.as_ptr().cast::<libc::c_void>(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            return Err(VmError::last_os_commit(len));
        }
        Ok(())
    }

    pub(super) unsafe fn release(addr: NonNull<u8>, len: usize) {
        // SAFETY: addr/len describe exactly one mapping from reserve().
        let rc = unsafe { libc::munmap(addr.as_ptr().cast::<libc::c_void>(), len) };
        if rc != 0 {
            tracing::error!(
                len,
                error = %std::io::Error::last_os_error(),
                "munmap failed; address range leaked"
            );
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::ptr::{self, NonNull};

    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    use crate::error::VmError;

    pub(super) fn page_size() -> usize {
        // SAFETY: SYSTEM_INFO is plain data; GetSystemInfo fills it in.
        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        // SAFETY: info is a valid, writable SYSTEM_INFO.
        unsafe { GetSystemInfo(&mut info) };
        info.dwPageSize as usize
    }

    pub(super) fn reserve(len: usize) -> Result<NonNull<u8>, VmError> {
        // SAFETY: MEM_RESERVE at a system-chosen address touches no existing memory.
        let addr = unsafe { VirtualAlloc(ptr::null(), len, MEM_RESERVE, PAGE_READWRITE) };
        NonNull::new(addr.cast::<u8>()).ok_or_else(|| VmError::last_os_reserve(len))
    }

    pub(super) unsafe fn commit(addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
        // SAFETY: [addr, addr+len) lies inside a live MEM_RESERVE region
        // (caller contract). MEM_COMMIT on committed pages is a no-op.
        let p = unsafe {
            VirtualAlloc(
                addr.as_ptr().cast::<c_void>().cast_const(),
                len,
                MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        if p.is_null() {
            return Err(VmError::last_os_commit(len));
        }
        Ok(())
    }

    pub(super) unsafe fn release(addr: NonNull<u8>, len: usize) {
        // SAFETY: addr is the base of a region from reserve(). MEM_RELEASE
        // requires a size of zero and frees the whole region.
        let ok = unsafe { VirtualFree(addr.as_ptr().cast::<c_void>(), 0, MEM_RELEASE) };
        if ok == 0 {
            tracing::error!(
                len,
                error = %std::io::Error::last_os_error(),
                "VirtualFree failed; address range leaked"
            );
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    use std::ptr::NonNull;

    use crate::error::VmError;

    pub(super) fn page_size() -> usize {
        4096
    }

    pub(super) fn reserve(len: usize) -> Result<NonNull<u8>, VmError> {
        Err(VmError::Reserve { len, os_code: None })
    }

    pub(super) unsafe fn commit(_addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
        Err(VmError::Commit { len, os_code: None })
    }

    pub(super) unsafe fn release(_addr: NonNull<u8>, _len: usize) {}
}
