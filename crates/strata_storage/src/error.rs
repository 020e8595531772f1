//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a log.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A page outside the mapped capacity was accessed.
    #[error("page {page} out of bounds (capacity {capacity} pages)")]
    PageOutOfBounds {
        /// The requested page number.
        page: u64,
        /// The current capacity in pages.
        capacity: u64,
    },

    /// A page buffer had the wrong length.
    #[error("page buffer has {actual} bytes, expected {expected}")]
    PageSizeMismatch {
        /// The configured page size.
        expected: usize,
        /// The length of the buffer that was passed in.
        actual: usize,
    },

    /// Growing the storage would exceed its configured maximum, or the
    /// platform refused to provide more space.
    #[error("out of space: requested {requested} pages, limit {limit} pages")]
    OutOfSpace {
        /// The number of pages the storage would need to hold.
        requested: u64,
        /// The maximum number of pages the storage may hold.
        limit: u64,
    },

    /// The storage file is corrupted or has an impossible shape.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Returns true if this error reports exhausted space.
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, Self::OutOfSpace { .. })
    }
}
