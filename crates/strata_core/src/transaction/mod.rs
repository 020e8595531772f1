//! Transactions with ACID guarantees.
//!
//! Strata provides:
//! - **Atomicity**: a commit publishes all of a transaction's pages or none
//! - **Consistency**: trees, catalog and free-space records change together
//! - **Isolation**: readers pin a published generation and never see
//!   uncommitted pages
//! - **Durability**: a commit returns once its journal record is synced
//!
//! One write transaction runs at a time; any number of read transactions
//! run beside it.

mod manager;
mod read;
mod state;
mod write;
mod write_set;

pub(crate) use manager::TransactionManager;
pub use read::ReadTransaction;
pub use state::{TransactionFlags, TransactionState};
pub use write::WriteTransaction;
pub(crate) use write_set::{PagerView, WriteSet};

use crate::error::CoreResult;
use crate::tree::Tree;

/// A transaction of either kind, as returned by
/// [`StorageEnvironment::new_transaction`](crate::StorageEnvironment::new_transaction).
#[derive(Debug)]
pub enum Transaction<'env> {
    /// A snapshot reader.
    Read(ReadTransaction<'env>),
    /// The single writer.
    Write(WriteTransaction<'env>),
}

impl<'env> Transaction<'env> {
    /// Returns the state of the underlying transaction.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        match self {
            Self::Read(txn) => txn.state(),
            Self::Write(txn) => txn.state(),
        }
    }

    /// Opens a tree. Returns `None` if no tree has that name.
    ///
    /// # Errors
    ///
    /// Fails if the catalog cannot be read.
    pub fn open_tree(&self, name: &str) -> CoreResult<Option<Tree<'_>>> {
        match self {
            Self::Read(txn) => txn.open_tree(name),
            Self::Write(txn) => txn.open_tree(name),
        }
    }

    pub(crate) fn manager(&self) -> &'env TransactionManager {
        match self {
            Self::Read(txn) => txn.manager(),
            Self::Write(txn) => txn.manager(),
        }
    }

    /// Returns the write transaction, if this is one.
    pub fn as_write(&mut self) -> Option<&mut WriteTransaction<'env>> {
        match self {
            Self::Write(txn) => Some(txn),
            Self::Read(_) => None,
        }
    }
}
