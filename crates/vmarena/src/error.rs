//! Arena error types.
//!
//! Split by lifetime stage: [`InitError`] can only happen while building
//! an arena, [`ArenaError`] is what `allocate` returns, and [`VmError`]
//! is the raw failure reported by a [`VirtualMemory`](crate::vm::VirtualMemory)
//! backend.

use std::error::Error;
use std::fmt;

use crate::config::ConfigError;

/// Failure of a virtual-memory primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VmError {
    /// The backend could not reserve address space.
    Reserve {
        /// Number of bytes requested.
        len: usize,
        /// OS error code, if the failure came from the OS.
        os_code: Option<i32>,
    },
    /// The backend could not commit a reserved range.
    Commit {
        /// Number of bytes requested.
        len: usize,
        /// OS error code, if the failure came from the OS.
        os_code: Option<i32>,
    },
}

impl VmError {
    /// Capture a reserve failure together with the calling thread's last OS error.
    pub fn last_os_reserve(len: usize) -> Self {
        Self::Reserve {
            len,
            os_code: std::io::Error::last_os_error().raw_os_error(),
        }
    }

    /// Capture a commit failure together with the calling thread's last OS error.
    pub fn last_os_commit(len: usize) -> Self {
        Self::Commit {
            len,
            os_code: std::io::Error::last_os_error().raw_os_error(),
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (op, len, os_code) = match self {
            Self::Reserve { len, os_code } => ("reserve", len, os_code),
            Self::Commit { len, os_code } => ("commit", len, os_code),
        };
        match os_code {
            Some(code) => write!(f, "failed to {op} {len} bytes (os error {code})"),
            None => write!(f, "failed to {op} {len} bytes"),
        }
    }
}

impl Error for VmError {}

/// Errors that can occur while constructing an [`Arena`](crate::Arena).
///
/// Both variants are fatal: address-space exhaustion is not locally
/// recoverable, so there is no retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitError {
    /// The [`ArenaConfig`](crate::ArenaConfig) failed validation.
    InvalidConfig(ConfigError),
    /// The backend refused to reserve the address range.
    ReservationFailed {
        /// Requested arena capacity in bytes.
        capacity: usize,
        /// The underlying backend failure.
        source: VmError,
    },
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(e) => write!(f, "invalid arena config: {e}"),
            Self::ReservationFailed { capacity, source } => {
                write!(f, "failed to reserve {capacity} byte arena: {source}")
            }
        }
    }
}

impl Error for InitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidConfig(e) => Some(e),
            Self::ReservationFailed { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for InitError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig(e)
    }
}

/// Errors returned by [`Arena::allocate`](crate::Arena::allocate).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The request does not fit in the remaining capacity.
    ///
    /// Recoverable: the allocation cursor has been restored exactly and
    /// smaller requests may still succeed.
    CapacityExhausted {
        /// Number of bytes requested.
        requested: usize,
        /// Total arena capacity in bytes.
        capacity: usize,
    },
    /// The backend failed to commit memory for an in-range request.
    ///
    /// Fatal: a pointer into uncommitted memory must never be handed out,
    /// so the allocation is abandoned. The reserved byte range is leaked
    /// rather than rolled back, since later grants may already sit above it.
    CommitFailed {
        /// Start of the range that could not be committed, relative to the arena base.
        offset: usize,
        /// Length of the range that could not be committed.
        len: usize,
        /// The underlying backend failure.
        source: VmError,
    },
}

impl ArenaError {
    /// Whether this error signals a broken invariant rather than a full arena.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CommitFailed { .. })
    }
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExhausted {
                requested,
                capacity,
            } => {
                write!(
                    f,
                    "arena capacity exhausted: requested {requested} bytes, capacity {capacity} bytes"
                )
            }
            Self::CommitFailed {
                offset,
                len,
                source,
            } => {
                write!(
                    f,
                    "failed to commit {len} bytes at arena offset {offset}: {source}"
                )
            }
        }
    }
}

impl Error for ArenaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CommitFailed { source, .. } => Some(source),
            Self::CapacityExhausted { .. } => None,
        }
    }
}
