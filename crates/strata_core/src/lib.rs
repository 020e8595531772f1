//! # Strata Core
//!
//! Embedded transactional key-value storage engine.
//!
//! This crate provides:
//! - Copy-on-write B+Trees over ordered byte-string keys
//! - A single writer alongside any number of snapshot readers (MVCC)
//! - A write-ahead journal replayed on open for crash recovery
//! - Page reuse gated by the oldest open reader
//! - Named trees registered in a catalog
//!
//! ## Quick start
//!
//! ```rust
//! use strata_core::{Slice, StorageEnvironment};
//!
//! let env = StorageEnvironment::open_in_memory().unwrap();
//!
//! env.write(|txn| {
//!     let mut tree = txn.create_tree("T")?;
//!     tree.add(b"a", b"1")?;
//!     tree.add(b"b", b"2")?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! let txn = env.begin_read().unwrap();
//! let tree = txn.open_tree("T").unwrap().unwrap();
//! let keys: Vec<Vec<u8>> = tree
//!     .iterate(Slice::BeforeAllKeys, Slice::AfterAllKeys)
//!     .unwrap()
//!     .map(|entry| entry.unwrap().0)
//!     .collect();
//! assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
//! ```
//!
//! ## Layers
//!
//! - [`strata_storage`] pages and logs, with no knowledge of their contents
//! - [`journal`] commit records and recovery
//! - [`FreeSpace`] runs of reusable pages
//! - [`Tree`] / [`TreeMut`] / [`Cursor`] the B+Tree surface
//! - [`ReadTransaction`] / [`WriteTransaction`] isolation and commit
//! - [`StorageEnvironment`] the entry point

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod dir;
mod environment;
mod error;
mod freespace;
pub mod journal;
mod page;
mod snapshot;
mod stats;
mod transaction;
mod tree;
mod types;
mod verify;

pub use catalog::RESERVED_PREFIX;
pub use config::{Config, PagerKind, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
pub use dir::EnvironmentDir;
pub use environment::StorageEnvironment;
pub use error::{CoreError, CoreResult};
pub use freespace::{FreeSpace, PageRun};
pub use page::meta::{EnvironmentHeader, FORMAT_VERSION, HEADER_MAGIC};
pub use page::{Geometry, PageKind, PAGE_HEADER_SIZE};
pub use snapshot::Snapshot;
pub use stats::EnvironmentStats;
pub use transaction::{
    ReadTransaction, Transaction, TransactionFlags, TransactionState, WriteTransaction,
};
pub use tree::{Cursor, Tree, TreeMut, TreeState, ValueReader};
pub use types::{lexicographic, Comparer, Generation, Slice, TransactionId};
pub use verify::VerifyReport;

pub use strata_storage::PageNumber;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
