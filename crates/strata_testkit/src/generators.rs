//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, values, tree names and
//! operation sequences that respect the engine's limits.

use proptest::prelude::*;

/// Largest key the strategies produce. Fits any page size of 1 KiB or
/// more.
pub const MAX_TEST_KEY: usize = 64;

/// Strategy for generating keys of arbitrary bytes.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..MAX_TEST_KEY)
}

/// Strategy for generating keys from a small alphabet, so sequences of
/// operations revisit the same keys.
pub fn dense_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..8, 1..6)
}

/// Strategy for generating valid tree names.
pub fn tree_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for generating values, mostly small and sometimes large
/// enough to need overflow pages.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        8 => prop::collection::vec(any::<u8>(), 0..128),
        1 => prop::collection::vec(any::<u8>(), 1024..8192),
    ]
}

/// A single operation against one tree.
#[derive(Debug, Clone)]
pub enum TreeOperation {
    /// Add or replace an entry
    Add {
        /// Entry key
        key: Vec<u8>,
        /// Entry value
        value: Vec<u8>,
    },
    /// Delete an entry
    Delete {
        /// Entry key
        key: Vec<u8>,
    },
    /// Read an entry
    Read {
        /// Entry key
        key: Vec<u8>,
    },
}

/// Strategy for generating tree operations.
pub fn tree_operation_strategy() -> impl Strategy<Value = TreeOperation> {
    prop_oneof![
        3 => (dense_key_strategy(), value_strategy())
            .prop_map(|(key, value)| TreeOperation::Add { key, value }),
        1 => dense_key_strategy().prop_map(|key| TreeOperation::Delete { key }),
        2 => dense_key_strategy().prop_map(|key| TreeOperation::Read { key }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<TreeOperation>> {
    prop::collection::vec(tree_operation_strategy(), min_ops..max_ops)
}

/// A batch of operations run in one write transaction.
#[derive(Debug, Clone)]
pub struct TransactionBatch {
    /// Operations in order.
    pub operations: Vec<TreeOperation>,
    /// Whether the batch commits or rolls back.
    pub commit: bool,
}

/// Strategy for generating transaction batches; four in five commit.
pub fn transaction_batch_strategy(max_ops: usize) -> impl Strategy<Value = TransactionBatch> {
    (
        operation_sequence_strategy(1, max_ops.max(2)),
        prop::bool::weighted(0.8),
    )
        .prop_map(|(operations, commit)| TransactionBatch { operations, commit })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_fit_small_pages(key in key_strategy()) {
            prop_assert!(!key.is_empty());
            prop_assert!(key.len() < MAX_TEST_KEY);
        }

        #[test]
        fn tree_name_is_valid(name in tree_name_strategy()) {
            let first = name.chars().next();
            prop_assert!(first.map_or(false, |c| c.is_ascii_alphabetic()));
            prop_assert!(!name.starts_with(strata_core::RESERVED_PREFIX));
        }

        #[test]
        fn batches_are_never_empty(batch in transaction_batch_strategy(10)) {
            prop_assert!(!batch.operations.is_empty());
            prop_assert!(batch.operations.len() < 10);
        }
    }
}
