//! Arena configuration parameters.

use std::error::Error;
use std::fmt;

/// Alignment used by [`Arena::alloc`](crate::Arena::alloc) and the default
/// allocation granule: one machine pointer.
pub const DEFAULT_ALIGN: usize = std::mem::size_of::<usize>();

/// Configuration for an [`Arena`](crate::Arena).
///
/// Validated against the backend's page size at construction; all values
/// are immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Size of the address reservation in bytes.
    ///
    /// Allocations never exceed this. The reservation itself is rounded
    /// up to whole pages, but the extra tail is never handed out.
    pub capacity: usize,

    /// Bytes committed per commit step.
    ///
    /// `None` uses the backend page size. Larger values trade resident
    /// memory for fewer commit calls and fewer redundant commits when
    /// threads race on the commit frontier. Must be a power of two and
    /// at least the page size.
    pub commit_granularity: Option<usize>,

    /// Granule every allocation size is rounded up to.
    ///
    /// Requests aligned to at most `min_align` take the wait-free path;
    /// larger alignments claim padding up to the next aligned address
    /// with a compare-and-swap loop. Must be a power of two no larger
    /// than the page size.
    ///
    /// Default: [`DEFAULT_ALIGN`].
    pub min_align: usize,
}

impl ArenaConfig {
    /// Create a config for an arena of `capacity` bytes with default settings.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            commit_granularity: None,
            min_align: DEFAULT_ALIGN,
        }
    }

    /// Commit in steps of `granularity` bytes instead of single pages.
    pub fn with_commit_granularity(mut self, granularity: usize) -> Self {
        self.commit_granularity = Some(granularity);
        self
    }

    /// Round allocation sizes to `min_align` instead of [`DEFAULT_ALIGN`].
    pub fn with_min_align(mut self, min_align: usize) -> Self {
        self.min_align = min_align;
        self
    }

    /// Check structural invariants against the backend page size.
    pub fn validate(&self, page_size: usize) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if let Some(granularity) = self.commit_granularity {
            if !granularity.is_power_of_two() || granularity < page_size {
                return Err(ConfigError::InvalidCommitGranularity {
                    granularity,
                    page_size,
                });
            }
        }
        if !self.min_align.is_power_of_two() || self.min_align > page_size {
            return Err(ConfigError::InvalidMinAlign {
                min_align: self.min_align,
                page_size,
            });
        }
        Ok(())
    }

    /// The commit step actually used for a backend with `page_size`.
    pub fn resolved_commit_granularity(&self, page_size: usize) -> usize {
        self.commit_granularity.unwrap_or(page_size)
    }
}

/// Errors detected by [`ArenaConfig::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Capacity is zero.
    ZeroCapacity,
    /// Commit granularity is not a power of two or is smaller than a page.
    InvalidCommitGranularity {
        /// The configured granularity.
        granularity: usize,
        /// The backend page size.
        page_size: usize,
    },
    /// Minimum alignment is not a power of two or exceeds a page.
    InvalidMinAlign {
        /// The configured minimum alignment.
        min_align: usize,
        /// The backend page size.
        page_size: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "capacity must be non-zero"),
            Self::InvalidCommitGranularity {
                granularity,
                page_size,
            } => write!(
                f,
                "commit granularity {granularity} must be a power of two >= page size {page_size}"
            ),
            Self::InvalidMinAlign {
                min_align,
                page_size,
            } => write!(
                f,
                "min_align {min_align} must be a power of two <= page size {page_size}"
            ),
        }
    }
}

impl Error for ConfigError {}
