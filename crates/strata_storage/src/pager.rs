//! Page storage trait definition.

use crate::error::{StorageError, StorageResult};
use std::fmt;

/// Identifies a fixed-size page in a pager.
///
/// Page `n` lives at byte offset `n * page_size` of the underlying storage.
/// Page 0 is reserved by the engine for its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PageNumber(pub u64);

impl PageNumber {
    /// The header page.
    pub const HEADER: Self = Self(0);

    /// Creates a page number.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the page `count` pages after this one.
    #[must_use]
    pub const fn offset(self, count: u64) -> Self {
        Self(self.0 + count)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Growth parameters shared by pager implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerOptions {
    /// Size of a page in bytes.
    pub page_size: usize,
    /// Pages reserved when the storage is created.
    pub initial_pages: u64,
    /// Pages added per growth step.
    pub growth_pages: u64,
    /// Upper bound on the number of pages, if any.
    pub max_pages: Option<u64>,
}

impl PagerOptions {
    /// Creates options for the given page size with a single initial page
    /// and no growth limit.
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        Self {
            page_size,
            initial_pages: 1,
            growth_pages: 1,
            max_pages: None,
        }
    }

    /// Rounds a page requirement up to the next growth step, capped at the
    /// maximum. Fails if even the exact requirement exceeds the maximum.
    pub(crate) fn grown_capacity(&self, current: u64, required: u64) -> StorageResult<u64> {
        if let Some(limit) = self.max_pages {
            if required > limit {
                return Err(StorageError::OutOfSpace {
                    requested: required,
                    limit,
                });
            }
        }
        let step = self.growth_pages.max(1);
        let missing = required.saturating_sub(current);
        let steps = missing.div_ceil(step);
        let mut target = current.saturating_add(steps.saturating_mul(step));
        if let Some(limit) = self.max_pages {
            target = target.min(limit);
        }
        Ok(target.max(required))
    }
}

/// A random-access store of fixed-size pages.
///
/// Pagers know nothing about page contents. The engine owns the page format,
/// allocation policy and ordering of writes; a pager only moves bytes and
/// reserves room for them.
///
/// Pagers track two numbers:
///
/// - **capacity**: how many pages the backing storage currently holds
/// - **next page**: the high-water mark, i.e. the first page never handed out
///   by [`Pager::allocate`]
///
/// # Invariants
///
/// - `next_page() <= capacity()` at all times
/// - Growth is all-or-nothing: a failed `ensure` or `allocate` leaves both
///   numbers unchanged
/// - `read` returns the bytes of the last `write` to that page, or zeros
/// - Pagers must be `Send + Sync`; concurrent `read`s from many threads
///   and a single writer are supported
///
/// # Implementors
///
/// - [`crate::MemoryPager`] for tests and ephemeral environments
/// - [`crate::MmapPager`] for persistent storage
pub trait Pager: Send + Sync {
    /// Returns the page size in bytes.
    fn page_size(&self) -> usize;

    /// Returns the number of pages the backing storage holds.
    fn capacity(&self) -> u64;

    /// Returns the high-water mark.
    fn next_page(&self) -> PageNumber;

    /// Resets the high-water mark.
    ///
    /// Used when a header is loaded and when a transaction that extended the
    /// high-water mark rolls back.
    ///
    /// # Errors
    ///
    /// Returns an error if `next` is beyond the current capacity.
    fn set_next_page(&self, next: PageNumber) -> StorageResult<()>;

    /// Grows the storage so that it holds at least `min_pages` pages.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfSpace`] if the configured maximum would be
    /// exceeded, or an I/O error if the storage cannot be extended.
    fn ensure(&self, min_pages: u64) -> StorageResult<()>;

    /// Reads one page.
    ///
    /// # Errors
    ///
    /// Returns an error if the page is beyond the capacity.
    fn read(&self, page: PageNumber) -> StorageResult<Vec<u8>>;

    /// Writes one page. `data` must be exactly one page long.
    ///
    /// # Errors
    ///
    /// Returns an error if the page is beyond the capacity or the buffer has
    /// the wrong length.
    fn write(&self, page: PageNumber, data: &[u8]) -> StorageResult<()>;

    /// Makes all written pages durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying flush fails.
    fn sync(&self) -> StorageResult<()>;

    /// Reads `count` consecutive pages starting at `first`.
    ///
    /// # Errors
    ///
    /// Returns an error if any page of the run is beyond the capacity.
    fn read_run(&self, first: PageNumber, count: u64) -> StorageResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.page_size() * count as usize);
        for i in 0..count {
            out.extend_from_slice(&self.read(first.offset(i))?);
        }
        Ok(out)
    }

    /// Reserves `count` contiguous pages past the high-water mark and returns
    /// the first of them.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfSpace`] if the storage cannot grow enough.
    fn allocate(&self, count: u64) -> StorageResult<PageNumber> {
        let first = self.next_page();
        let end = first.as_u64() + count;
        self.ensure(end)?;
        self.set_next_page(PageNumber(end))?;
        Ok(first)
    }
}

/// Checks a page write against the pager's geometry.
pub(crate) fn check_page(
    page: PageNumber,
    len: usize,
    page_size: usize,
    capacity: u64,
) -> StorageResult<()> {
    if len != page_size {
        return Err(StorageError::PageSizeMismatch {
            expected: page_size,
            actual: len,
        });
    }
    if page.as_u64() >= capacity {
        return Err(StorageError::PageOutOfBounds {
            page: page.as_u64(),
            capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_display() {
        assert_eq!(PageNumber::new(7).to_string(), "page:7");
        assert_eq!(PageNumber::new(7).offset(3), PageNumber(10));
    }

    #[test]
    fn growth_rounds_up_to_step() {
        let opts = PagerOptions {
            page_size: 4096,
            initial_pages: 4,
            growth_pages: 8,
            max_pages: None,
        };
        assert_eq!(opts.grown_capacity(4, 5).unwrap(), 12);
        assert_eq!(opts.grown_capacity(4, 12).unwrap(), 12);
        assert_eq!(opts.grown_capacity(4, 13).unwrap(), 20);
    }

    #[test]
    fn growth_is_capped_by_limit() {
        let opts = PagerOptions {
            page_size: 4096,
            initial_pages: 4,
            growth_pages: 8,
            max_pages: Some(10),
        };
        assert_eq!(opts.grown_capacity(4, 5).unwrap(), 10);
        let err = opts.grown_capacity(4, 11).unwrap_err();
        assert!(err.is_out_of_space());
    }
}
