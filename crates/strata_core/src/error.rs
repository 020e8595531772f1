//! Error types for the Strata engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Pager or log storage error.
    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal holds bytes that cannot be a valid record.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A page failed validation when it was read.
    #[error("page corruption at page {page}: {message}")]
    PageCorruption {
        /// The page that failed validation.
        page: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid environment format or version.
    #[error("invalid environment format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Rejected configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        message: String,
    },

    /// A key exceeded the maximum key size for the page size.
    #[error("key of {size} bytes exceeds maximum of {max} bytes")]
    KeyTooLarge {
        /// The key length.
        size: usize,
        /// The maximum allowed length.
        max: usize,
    },

    /// The pager cannot grow far enough to hold the transaction's pages.
    #[error("out of space: {0}")]
    OutOfSpace(strata_storage::StorageError),

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Named tree does not exist.
    #[error("tree not found: {name}")]
    TreeNotFound {
        /// Name of the tree.
        name: String,
    },

    /// Named tree already exists.
    #[error("tree already exists: {name}")]
    TreeExists {
        /// Name of the tree.
        name: String,
    },

    /// Environment directory is already open in another process.
    #[error("environment locked: another process has exclusive access")]
    EnvironmentLocked,

    /// A previous failure left the environment unable to accept writes.
    #[error("environment poisoned: {reason}; reopen to recover")]
    EnvironmentPoisoned {
        /// The failure that poisoned the environment.
        reason: String,
    },

    /// Environment is closed.
    #[error("environment is closed")]
    EnvironmentClosed,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// An internal structural invariant does not hold.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// The invariant that failed.
        message: String,
    },
}

impl CoreError {
    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates a page corruption error.
    pub fn page_corruption(page: u64, message: impl Into<String>) -> Self {
        Self::PageCorruption {
            page,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates a tree not found error.
    pub fn tree_not_found(name: impl Into<String>) -> Self {
        Self::TreeNotFound { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns true if the pager ran out of space.
    #[must_use]
    pub fn is_out_of_space(&self) -> bool {
        match self {
            Self::OutOfSpace(_) => true,
            Self::Storage(err) => err.is_out_of_space(),
            _ => false,
        }
    }

    /// Returns true if this error means stored bytes are damaged.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. }
                | Self::PageCorruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::InvariantViolation { .. }
        )
    }

    /// Lifts a storage error, classifying space exhaustion separately.
    pub(crate) fn from_storage(err: strata_storage::StorageError) -> Self {
        if err.is_out_of_space() {
            Self::OutOfSpace(err)
        } else {
            Self::Storage(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::StorageError;

    #[test]
    fn out_of_space_is_classified() {
        let err = CoreError::from_storage(StorageError::OutOfSpace {
            requested: 10,
            limit: 8,
        });
        assert!(err.is_out_of_space());
        assert!(!err.is_corruption());
        assert!(err.to_string().contains("requested 10 pages"));
    }

    #[test]
    fn corruption_kinds() {
        assert!(CoreError::page_corruption(3, "bad kind").is_corruption());
        assert!(CoreError::journal_corruption("bad magic").is_corruption());
        assert!(!CoreError::EnvironmentClosed.is_corruption());
    }
}
