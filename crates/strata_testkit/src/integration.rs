//! Cross-crate integration test helpers.
//!
//! Provides a harness that mirrors every change in a plain ordered map and
//! checks the environment against it.

use crate::fixtures::TestEnvironment;
use crate::generators::{TransactionBatch, TreeOperation};
use std::collections::BTreeMap;
use strata_core::{CoreResult, StorageEnvironment};

/// Tree the harness writes to.
pub const MODEL_TREE: &str = "model";

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The environment under test.
    pub test_env: TestEnvironment,
    /// Committed entries, for verification.
    model: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl IntegrationHarness {
    /// Creates a new integration harness with an in-memory environment.
    pub fn new() -> Self {
        Self::with_environment(TestEnvironment::memory())
    }

    /// Creates a harness over an existing, empty test environment.
    pub fn with_environment(test_env: TestEnvironment) -> Self {
        Self {
            test_env,
            model: BTreeMap::new(),
        }
    }

    /// The environment under test.
    pub fn env(&self) -> &StorageEnvironment {
        &self.test_env
    }

    /// Adds an entry and tracks it for later verification.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        self.env()
            .write(|txn| txn.create_tree(MODEL_TREE)?.add(key, value))
            .expect("Failed to add entry");
        self.model.insert(key.to_vec(), value.to_vec());
    }

    /// Deletes an entry and updates tracking.
    pub fn delete(&mut self, key: &[u8]) {
        let removed = self
            .env()
            .write(|txn| txn.create_tree(MODEL_TREE)?.delete(key))
            .expect("Failed to delete entry");
        assert_eq!(
            removed,
            self.model.remove(key).is_some(),
            "Delete result mismatch for {key:?}"
        );
    }

    /// Reads an entry and verifies it matches the tracked value.
    pub fn read_and_verify(&self, key: &[u8]) -> Option<Vec<u8>> {
        let actual = read(self.env(), key).expect("Failed to read entry");
        assert_eq!(
            actual.as_ref(),
            self.model.get(key),
            "Entry mismatch for {key:?}"
        );
        actual
    }

    /// Runs a batch in one write transaction, committing or rolling back
    /// as the batch says. Reads inside the batch see the batch's own
    /// changes.
    pub fn apply(&mut self, batch: &TransactionBatch) {
        let mut pending = self.model.clone();
        let mut txn = self.test_env.begin_write().expect("Failed to begin write");
        {
            let mut tree = txn.create_tree(MODEL_TREE).expect("Failed to open tree");
            for operation in &batch.operations {
                match operation {
                    TreeOperation::Add { key, value } => {
                        tree.add(key, value).expect("Failed to add entry");
                        pending.insert(key.clone(), value.clone());
                    }
                    TreeOperation::Delete { key } => {
                        let removed = tree.delete(key).expect("Failed to delete entry");
                        assert_eq!(removed, pending.remove(key).is_some());
                    }
                    TreeOperation::Read { key } => {
                        let actual = tree.read(key).expect("Failed to read entry");
                        assert_eq!(actual.as_ref(), pending.get(key));
                    }
                }
            }
        }
        if batch.commit {
            txn.commit().expect("Failed to commit");
            self.model = pending;
        } else {
            txn.rollback().expect("Failed to roll back");
        }
    }

    /// Verifies the tree holds exactly the tracked entries, in order, and
    /// that the environment is consistent.
    pub fn verify_all(&self) {
        let entries = self
            .env()
            .read(|txn| match txn.open_tree(MODEL_TREE)? {
                Some(tree) => tree.iter()?.collect::<CoreResult<Vec<_>>>(),
                None => Ok(Vec::new()),
            })
            .expect("Failed to scan tree");
        let expected: Vec<_> = self
            .model
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        assert_eq!(entries, expected, "Tree contents differ from the model");

        let report = self.env().verify().expect("Failed to verify");
        assert!(report.is_ok(), "Consistency check failed: {:?}", report.issues);
    }

    /// Simulates a restart and checks nothing committed was lost.
    pub fn reopen_and_verify(self) -> Self {
        let Self { test_env, model } = self;
        let harness = Self {
            test_env: test_env.reopen(),
            model,
        };
        harness.verify_all();
        harness
    }

    /// Returns the count of tracked entries.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn read(env: &StorageEnvironment, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
    env.read(|txn| match txn.open_tree(MODEL_TREE)? {
        Some(tree) => tree.read(key),
        None => Ok(None),
    })
}
