//! Append-only log storage traits.

use crate::error::StorageResult;

/// An append-only byte log.
///
/// Logs are **opaque byte stores**. The engine writes journal records into
/// them and reads them back during recovery; a log does not know what a
/// record is.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync` makes every appended byte durable
/// - `truncate` only shrinks
pub trait LogStorage: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs. The log may then hold a
    /// partial tail, which the caller should truncate away.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Forces appended data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the log to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}

/// A directory of numbered logs.
///
/// The journal is a sequence of log files numbered in creation order. A
/// directory lists, opens and removes them.
pub trait LogDirectory: Send + Sync {
    /// Lists the numbers of existing logs in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn list(&self) -> StorageResult<Vec<u64>>;

    /// Opens log `number`, creating it empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or created.
    fn open(&self, number: u64) -> StorageResult<Box<dyn LogStorage>>;

    /// Removes log `number`. Removing a missing log is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be removed.
    fn remove(&self, number: u64) -> StorageResult<()>;

    /// Makes creations and removals durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be synced.
    fn sync(&self) -> StorageResult<()>;
}
