//! Transaction states and flags.

use crate::error::{CoreError, CoreResult};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction was rolled back, explicitly, by dropping it, or because
    /// commit failed.
    RolledBack,
}

impl TransactionState {
    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(self) -> CoreResult<()> {
        match self {
            Self::Active => Ok(()),
            Self::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            Self::RolledBack => Err(CoreError::invalid_operation(
                "transaction already rolled back",
            )),
        }
    }
}

/// Kind of transaction to start with
/// [`StorageEnvironment::new_transaction`](crate::StorageEnvironment::new_transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionFlags {
    /// A snapshot read; never blocks.
    ReadOnly,
    /// The single writer; blocks while another writer is active.
    ReadWrite,
}
