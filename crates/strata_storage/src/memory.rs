//! In-memory pager and logs.
//!
//! Nothing here survives the process, but state does survive dropping and
//! reopening an environment as long as the same pager and log directory are
//! handed back in. Crash tests rely on that.

use crate::error::{StorageError, StorageResult};
use crate::log::{LogDirectory, LogStorage};
use crate::pager::{check_page, PageNumber, Pager, PagerOptions};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A pager that keeps every page in a heap buffer.
///
/// # Example
///
/// ```rust
/// use strata_storage::{MemoryPager, PageNumber, Pager};
///
/// let pager = MemoryPager::new(1024);
/// let first = pager.allocate(2).unwrap();
/// pager.write(first, &[7u8; 1024]).unwrap();
/// assert_eq!(pager.read(first).unwrap()[0], 7);
/// assert_eq!(pager.next_page(), PageNumber::new(2));
/// ```
#[derive(Debug)]
pub struct MemoryPager {
    options: PagerOptions,
    inner: RwLock<MemoryPages>,
}

#[derive(Debug, Default)]
struct MemoryPages {
    data: Vec<u8>,
    next_page: u64,
}

impl MemoryPager {
    /// Creates an empty pager with the given page size and no size limit.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self::with_options(PagerOptions::new(page_size))
    }

    /// Creates a pager with explicit growth options.
    ///
    /// `initial_pages` are reserved immediately.
    #[must_use]
    pub fn with_options(options: PagerOptions) -> Self {
        let initial = options.initial_pages as usize * options.page_size;
        Self {
            options,
            inner: RwLock::new(MemoryPages {
                data: vec![0; initial],
                next_page: 0,
            }),
        }
    }

    /// Returns the growth options.
    #[must_use]
    pub fn options(&self) -> PagerOptions {
        self.options
    }

    fn capacity_of(&self, pages: &MemoryPages) -> u64 {
        (pages.data.len() / self.options.page_size) as u64
    }
}

impl Pager for MemoryPager {
    fn page_size(&self) -> usize {
        self.options.page_size
    }

    fn capacity(&self) -> u64 {
        self.capacity_of(&self.inner.read())
    }

    fn next_page(&self) -> PageNumber {
        PageNumber(self.inner.read().next_page)
    }

    fn set_next_page(&self, next: PageNumber) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let capacity = self.capacity_of(&inner);
        if next.as_u64() > capacity {
            return Err(StorageError::PageOutOfBounds {
                page: next.as_u64(),
                capacity,
            });
        }
        inner.next_page = next.as_u64();
        Ok(())
    }

    fn ensure(&self, min_pages: u64) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let current = self.capacity_of(&inner);
        if min_pages <= current {
            return Ok(());
        }
        let target = self.options.grown_capacity(current, min_pages)?;
        let new_len = target as usize * self.options.page_size;
        let extra = new_len - inner.data.len();
        inner
            .data
            .try_reserve_exact(extra)
            .map_err(|_| StorageError::OutOfSpace {
                requested: target,
                limit: current,
            })?;
        inner.data.resize(new_len, 0);
        Ok(())
    }

    fn read(&self, page: PageNumber) -> StorageResult<Vec<u8>> {
        let inner = self.inner.read();
        let page_size = self.options.page_size;
        check_page(page, page_size, page_size, self.capacity_of(&inner))?;
        let start = page.as_u64() as usize * page_size;
        Ok(inner.data[start..start + page_size].to_vec())
    }

    fn write(&self, page: PageNumber, data: &[u8]) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let page_size = self.options.page_size;
        check_page(page, data.len(), page_size, self.capacity_of(&inner))?;
        let start = page.as_u64() as usize * page_size;
        inner.data[start..start + page_size].copy_from_slice(data);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// An in-memory log.
///
/// Clones share the same buffer, which is how [`MemoryLogDirectory`] hands
/// out a log that outlives the journal that wrote it.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryLog {
    /// Creates a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log with pre-existing contents.
    ///
    /// Useful for feeding hand-crafted bytes to recovery.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the log contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Replaces the log contents.
    pub fn set_data(&self, data: Vec<u8>) {
        *self.data.write() = data;
    }
}

impl LogStorage for MemoryLog {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current = data.len() as u64;
        if new_size > current {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate log of {current} bytes to {new_size} bytes"),
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

/// An in-memory set of numbered logs.
///
/// Clones share the same logs.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogDirectory {
    logs: Arc<RwLock<BTreeMap<u64, MemoryLog>>>,
}

impl MemoryLogDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to log `number`, if it exists.
    #[must_use]
    pub fn log(&self, number: u64) -> Option<MemoryLog> {
        self.logs.read().get(&number).cloned()
    }

    /// Inserts or replaces log `number`.
    pub fn insert(&self, number: u64, log: MemoryLog) {
        self.logs.write().insert(number, log);
    }
}

impl LogDirectory for MemoryLogDirectory {
    fn list(&self) -> StorageResult<Vec<u64>> {
        Ok(self.logs.read().keys().copied().collect())
    }

    fn open(&self, number: u64) -> StorageResult<Box<dyn LogStorage>> {
        let log = self.logs.write().entry(number).or_default().clone();
        Ok(Box::new(log))
    }

    fn remove(&self, number: u64) -> StorageResult<()> {
        self.logs.write().remove(&number);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}
