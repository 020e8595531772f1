//! Free page runs.
//!
//! Freed pages are kept as runs of contiguous pages, coalesced with their
//! neighbours on release. Allocation is best fit: the smallest run that can
//! hold the request, lowest start page on ties, split from the front.

use crate::error::{CoreError, CoreResult};
use crate::tree::{Cursor, PageSource, TreeState};
use crate::types::{lexicographic, Slice};
use std::collections::BTreeMap;
use strata_storage::PageNumber;

/// A run of contiguous pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageRun {
    /// First page of the run.
    pub start: PageNumber,
    /// Number of pages.
    pub len: u64,
}

impl PageRun {
    /// Creates a run.
    #[must_use]
    pub const fn new(start: PageNumber, len: u64) -> Self {
        Self { start, len }
    }

    /// A run of one page.
    #[must_use]
    pub const fn single(page: PageNumber) -> Self {
        Self { start: page, len: 1 }
    }

    /// One past the last page of the run.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.0 + self.len
    }

    /// Iterates over the pages of the run.
    pub fn pages(&self) -> impl Iterator<Item = PageNumber> {
        let start = self.start.0;
        (start..start + self.len).map(PageNumber)
    }
}

/// Set of free pages, stored as coalesced runs keyed by start page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeSpace {
    runs: BTreeMap<u64, u64>,
    total: u64,
}

impl FreeSpace {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of free pages.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.total
    }

    /// Number of runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no page is free.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Iterates over runs in page order.
    pub fn runs(&self) -> impl Iterator<Item = PageRun> + '_ {
        self.runs
            .iter()
            .map(|(&start, &len)| PageRun::new(PageNumber(start), len))
    }

    /// Returns true if `page` is inside a free run.
    #[must_use]
    pub fn contains(&self, page: PageNumber) -> bool {
        self.runs
            .range(..=page.0)
            .next_back()
            .is_some_and(|(&start, &len)| page.0 < start + len)
    }

    /// Counts the pages of `run` that are free.
    #[must_use]
    pub fn overlap(&self, run: PageRun) -> u64 {
        run.pages().filter(|&page| self.contains(page)).count() as u64
    }

    /// Takes `count` contiguous pages, or returns `None` if no run is long
    /// enough.
    pub fn allocate(&mut self, count: u64) -> Option<PageNumber> {
        if count == 0 {
            return None;
        }
        let (start, len) = self
            .runs
            .iter()
            .filter(|&(_, &len)| len >= count)
            .min_by_key(|&(&start, &len)| (len, start))
            .map(|(&start, &len)| (start, len))?;

        self.runs.remove(&start);
        if len > count {
            self.runs.insert(start + count, len - count);
        }
        self.total -= count;
        Some(PageNumber(start))
    }

    /// Returns a run to the set, merging it with adjacent runs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if any page of the run is
    /// already free.
    pub fn release(&mut self, run: PageRun) -> CoreResult<()> {
        if run.len == 0 {
            return Ok(());
        }
        let prev = self
            .runs
            .range(..=run.start.0)
            .next_back()
            .map(|(&start, &len)| (start, len));
        let next = self
            .runs
            .range(run.start.0 + 1..)
            .next()
            .map(|(&start, &len)| (start, len));

        let overlaps_prev = prev.is_some_and(|(start, len)| start + len > run.start.0);
        let overlaps_next = next.is_some_and(|(start, _)| start < run.end());
        if overlaps_prev || overlaps_next {
            return Err(CoreError::invariant(format!(
                "double free of pages {}..{}",
                run.start.0,
                run.end()
            )));
        }

        let mut start = run.start.0;
        let mut len = run.len;
        if let Some((prev_start, prev_len)) = prev {
            if prev_start + prev_len == start {
                self.runs.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }
        if let Some((next_start, next_len)) = next {
            if next_start == run.end() {
                self.runs.remove(&next_start);
                len += next_len;
            }
        }

        self.runs.insert(start, len);
        self.total += run.len;
        Ok(())
    }

    /// Releases every run from another set.
    ///
    /// # Errors
    ///
    /// Fails on the first overlapping run.
    pub fn extend<I: IntoIterator<Item = PageRun>>(&mut self, runs: I) -> CoreResult<()> {
        for run in runs {
            self.release(run)?;
        }
        Ok(())
    }
}

/// Free-space tree key for a run: the start page, big-endian so that byte
/// order is page order.
pub(crate) fn run_key(start: u64) -> [u8; 8] {
    start.to_be_bytes()
}

/// Free-space tree value for a run: its length.
pub(crate) fn run_value(len: u64) -> [u8; 8] {
    len.to_le_bytes()
}

fn decode_run(key: &[u8], value: &[u8]) -> CoreResult<PageRun> {
    let start: [u8; 8] = key
        .try_into()
        .map_err(|_| CoreError::invariant("free-space key is not 8 bytes"))?;
    let len: [u8; 8] = value
        .try_into()
        .map_err(|_| CoreError::invariant("free-space value is not 8 bytes"))?;
    Ok(PageRun::new(
        PageNumber(u64::from_be_bytes(start)),
        u64::from_le_bytes(len),
    ))
}

/// Reads every run recorded in a free-space tree, keyed by start page.
pub(crate) fn read_runs(source: &dyn PageSource, state: &TreeState) -> CoreResult<BTreeMap<u64, u64>> {
    let mut cursor = Cursor::new(source, state.root, lexicographic, Slice::AfterAllKeys);
    cursor.seek_first()?;
    let mut runs = BTreeMap::new();
    for entry in cursor {
        let (key, value) = entry?;
        let run = decode_run(&key, &value)?;
        runs.insert(run.start.0, run.len);
    }
    Ok(runs)
}

/// Loads a free-space tree into a [`FreeSpace`].
pub(crate) fn load(source: &dyn PageSource, state: &TreeState) -> CoreResult<FreeSpace> {
    let mut free = FreeSpace::new();
    free.extend(
        read_runs(source, state)?
            .into_iter()
            .map(|(start, len)| PageRun::new(PageNumber(start), len)),
    )?;
    Ok(free)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(start: u64, len: u64) -> PageRun {
        PageRun::new(PageNumber(start), len)
    }

    #[test]
    fn release_coalesces_neighbours() {
        let mut free = FreeSpace::new();
        free.release(run(10, 2)).unwrap();
        free.release(run(14, 1)).unwrap();
        free.release(run(12, 2)).unwrap();

        assert_eq!(free.runs().collect::<Vec<_>>(), vec![run(10, 5)]);
        assert_eq!(free.total_pages(), 5);
    }

    #[test]
    fn allocate_prefers_best_fit() {
        let mut free = FreeSpace::new();
        free.release(run(2, 5)).unwrap();
        free.release(run(20, 2)).unwrap();
        free.release(run(30, 3)).unwrap();

        assert_eq!(free.allocate(2), Some(PageNumber(20)));
        assert_eq!(free.allocate(3), Some(PageNumber(30)));
        assert_eq!(free.allocate(2), Some(PageNumber(2)));
        assert_eq!(free.runs().collect::<Vec<_>>(), vec![run(4, 3)]);
        assert_eq!(free.allocate(4), None);
        assert_eq!(free.total_pages(), 3);
    }

    #[test]
    fn ties_go_to_lowest_page() {
        let mut free = FreeSpace::new();
        free.release(run(50, 1)).unwrap();
        free.release(run(5, 1)).unwrap();
        assert_eq!(free.allocate(1), Some(PageNumber(5)));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut free = FreeSpace::new();
        free.release(run(10, 4)).unwrap();
        assert!(free.release(run(12, 1)).is_err());
        assert!(free.release(run(8, 3)).is_err());
        assert!(free.release(run(13, 5)).is_err());
        assert_eq!(free.total_pages(), 4);
    }

    #[test]
    fn contains_checks_run_bounds() {
        let mut free = FreeSpace::new();
        free.release(run(10, 3)).unwrap();
        assert!(!free.contains(PageNumber(9)));
        assert!(free.contains(PageNumber(10)));
        assert!(free.contains(PageNumber(12)));
        assert!(!free.contains(PageNumber(13)));
    }

    #[test]
    fn zero_requests_are_ignored() {
        let mut free = FreeSpace::new();
        free.release(run(1, 0)).unwrap();
        assert!(free.is_empty());
        assert_eq!(free.allocate(0), None);
    }
}
