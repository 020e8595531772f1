//! Memory-mapped file pager.
//!
//! The data file is a plain sequence of pages. The whole file is mapped
//! read-write; page reads copy out of the map and page writes copy into it,
//! so no reference into the mapping ever escapes the lock that guards it.
//! That is what makes remapping on growth sound: growth takes the write
//! lock, so no reader can be looking at the old mapping while it is
//! replaced.

#![allow(unsafe_code)]

use crate::error::{StorageError, StorageResult};
use crate::pager::{check_page, PageNumber, Pager, PagerOptions};
use memmap2::MmapMut;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// A pager backed by a memory-mapped data file.
///
/// # Durability
///
/// Writes land in the OS page cache. `sync()` flushes the mapping and then
/// the file, after which every written page is on disk.
#[derive(Debug)]
pub struct MmapPager {
    path: PathBuf,
    options: PagerOptions,
    file: File,
    map: RwLock<MmapMut>,
    next_page: AtomicU64,
}

impl MmapPager {
    /// Opens or creates a data file.
    ///
    /// A new or short file is extended to `initial_pages` pages. An existing
    /// file whose length is not a whole number of pages is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, extended or mapped.
    pub fn open(path: &Path, options: PagerOptions) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let page_size = options.page_size as u64;
        let len = file.metadata()?.len();
        if len % page_size != 0 {
            return Err(StorageError::Corrupted(format!(
                "data file '{}' size {} is not a multiple of page size {}",
                path.display(),
                len,
                page_size
            )));
        }

        let wanted = options.initial_pages.max(1) * page_size;
        if len < wanted {
            file.set_len(wanted)?;
        }

        // SAFETY: MmapMut::map_mut is unsafe because the file could be
        // modified behind our back. This is sound here because:
        // 1. The engine holds an exclusive lock on the environment directory,
        //    so no other cooperating process writes the file
        // 2. The file length is a non-zero multiple of the page size
        // 3. The mapping is owned by this pager and every access is
        //    bounds-checked against its length under the map lock
        let map = unsafe { MmapMut::map_mut(&file)? };

        tracing::debug!(
            path = %path.display(),
            pages = map.len() as u64 / page_size,
            "mapped data file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            options,
            file,
            map: RwLock::new(map),
            next_page: AtomicU64::new(0),
        })
    }

    /// Returns the path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the growth options.
    #[must_use]
    pub fn options(&self) -> PagerOptions {
        self.options
    }

    fn capacity_of(&self, map: &MmapMut) -> u64 {
        (map.len() / self.options.page_size) as u64
    }
}

impl Pager for MmapPager {
    fn page_size(&self) -> usize {
        self.options.page_size
    }

    fn capacity(&self) -> u64 {
        self.capacity_of(&self.map.read())
    }

    fn next_page(&self) -> PageNumber {
        PageNumber(self.next_page.load(Ordering::Acquire))
    }

    fn set_next_page(&self, next: PageNumber) -> StorageResult<()> {
        let capacity = self.capacity();
        if next.as_u64() > capacity {
            return Err(StorageError::PageOutOfBounds {
                page: next.as_u64(),
                capacity,
            });
        }
        self.next_page.store(next.as_u64(), Ordering::Release);
        Ok(())
    }

    fn ensure(&self, min_pages: u64) -> StorageResult<()> {
        let mut map = self.map.write();
        let current = self.capacity_of(&map);
        if min_pages <= current {
            return Ok(());
        }

        let target = self.options.grown_capacity(current, min_pages)?;
        let old_len = map.len() as u64;
        let new_len = target * self.options.page_size as u64;

        map.flush()?;
        if let Err(err) = self.file.set_len(new_len) {
            let _ = self.file.set_len(old_len);
            return Err(StorageError::Io(err));
        }

        // SAFETY: remapping invalidates the old mapping. This is sound because:
        // 1. We hold the map write lock, so no read or write is in progress
        //    and no slice of the old mapping is alive
        // 2. The old mapping was flushed above
        // 3. The file was extended to new_len before mapping it again
        let remapped = unsafe { MmapMut::map_mut(&self.file) };
        match remapped {
            Ok(new_map) => {
                *map = new_map;
            }
            Err(err) => {
                let _ = self.file.set_len(old_len);
                return Err(StorageError::Io(err));
            }
        }

        tracing::debug!(from = current, to = target, "grew data file");
        Ok(())
    }

    fn read(&self, page: PageNumber) -> StorageResult<Vec<u8>> {
        let map = self.map.read();
        let page_size = self.options.page_size;
        check_page(page, page_size, page_size, self.capacity_of(&map))?;
        let start = page.as_u64() as usize * page_size;
        Ok(map[start..start + page_size].to_vec())
    }

    fn read_run(&self, first: PageNumber, count: u64) -> StorageResult<Vec<u8>> {
        let map = self.map.read();
        let page_size = self.options.page_size;
        let capacity = self.capacity_of(&map);
        if count == 0 {
            return Ok(Vec::new());
        }
        check_page(first.offset(count - 1), page_size, page_size, capacity)?;
        let start = first.as_u64() as usize * page_size;
        Ok(map[start..start + count as usize * page_size].to_vec())
    }

    fn write(&self, page: PageNumber, data: &[u8]) -> StorageResult<()> {
        let mut map = self.map.write();
        let page_size = self.options.page_size;
        check_page(page, data.len(), page_size, self.capacity_of(&map))?;
        let start = page.as_u64() as usize * page_size;
        map[start..start + page_size].copy_from_slice(data);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.map.read().flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
