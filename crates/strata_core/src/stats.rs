//! Environment statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strata_core::StorageEnvironment;
//!
//! let env = StorageEnvironment::open_in_memory()?;
//! let stats = env.stats()?;
//! println!("generation: {}", stats.generation);
//! println!("free pages: {}", stats.free_pages);
//! println!("journal bytes: {}", stats.journal_bytes);
//! ```

use crate::error::CoreResult;
use crate::transaction::TransactionManager;
use crate::types::{Generation, TransactionId};

/// A point-in-time summary of an environment.
///
/// Values are gathered one after another without stopping the writer, so a
/// commit landing during collection can make them disagree slightly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentStats {
    /// Latest committed generation.
    pub generation: Generation,
    /// Transaction that produced it.
    pub last_txid: TransactionId,
    /// Newest transaction flushed to the data file by a checkpoint.
    pub checkpoint_txid: TransactionId,
    /// Page size in bytes.
    pub page_size: usize,
    /// High-water mark: pages ever handed out, header page included.
    pub allocated_pages: u64,
    /// Pages the backing storage currently holds.
    pub capacity_pages: u64,
    /// Free pages ready for reuse.
    pub free_pages: u64,
    /// Freed pages still visible to an open reader.
    pub pending_pages: u64,
    /// Open read transactions and snapshots.
    pub active_readers: usize,
    /// Generation pinned by the oldest open reader.
    pub oldest_reader: Option<Generation>,
    /// Journal bytes written since the last checkpoint.
    pub journal_bytes: u64,
    /// Journal files on disk.
    pub journal_files: usize,
    /// Named trees.
    pub trees: usize,
}

impl EnvironmentStats {
    pub(crate) fn collect(manager: &TransactionManager) -> CoreResult<Self> {
        // Sampled before our own reader registers.
        let (active_readers, oldest_reader) = manager.readers();
        let txn = manager.begin_read();
        let header = txn.header();
        let (free_pages, pending_pages) = manager.space_totals();
        let journal = manager.journal();

        Ok(Self {
            generation: header.generation,
            last_txid: header.last_txid,
            checkpoint_txid: header.checkpoint_txid,
            page_size: manager.geometry().page_size(),
            allocated_pages: header.next_page.as_u64(),
            capacity_pages: manager.pager().capacity(),
            free_pages,
            pending_pages,
            active_readers,
            oldest_reader,
            journal_bytes: journal.bytes_since_checkpoint(),
            journal_files: journal.file_count()?,
            trees: txn.trees()?.len(),
        })
    }

    /// Pages in use by trees and the header.
    #[must_use]
    pub fn used_pages(&self) -> u64 {
        self.allocated_pages
            .saturating_sub(self.free_pages + self.pending_pages)
    }

    /// Bytes of the data file covered by the high-water mark.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_pages * self.page_size as u64
    }
}
