//! # Strata Storage
//!
//! The lowest layer of the Strata storage engine: fixed-size page storage
//! and append-only logs.
//!
//! Nothing in this crate interprets the bytes it stores. The engine in
//! `strata_core` owns the page format, the journal record format and the
//! order in which writes happen.
//!
//! ## Pagers
//!
//! - [`MmapPager`] maps a data file into memory and grows it in steps
//! - [`MemoryPager`] keeps pages on the heap, for tests and scratch use
//!
//! ## Logs
//!
//! - [`FileLog`] / [`FileLogDirectory`] hold journal files on disk
//! - [`MemoryLog`] / [`MemoryLogDirectory`] are their in-memory twins
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{LogDirectory, LogStorage, MemoryLogDirectory};
//!
//! let dir = MemoryLogDirectory::new();
//! let mut log = dir.open(1).unwrap();
//! let offset = log.append(b"hello world").unwrap();
//! assert_eq!(log.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod log;
mod memory;
mod mmap;
mod pager;

pub use error::{StorageError, StorageResult};
pub use file::{sync_directory, FileLog, FileLogDirectory, LOG_EXTENSION};
pub use log::{LogDirectory, LogStorage};
pub use memory::{MemoryLog, MemoryLogDirectory, MemoryPager};
pub use mmap::MmapPager;
pub use pager::{PageNumber, Pager, PagerOptions};
