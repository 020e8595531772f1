//! Consistent multi-tree snapshots.

use crate::error::CoreResult;
use crate::transaction::ReadTransaction;
use crate::tree::TreeState;
use std::ops::Deref;

/// A long-lived, read-only view of one generation.
///
/// A snapshot is a read transaction meant to be held across many trees and
/// many scans: every tree opened through it sees the same committed state,
/// however many writers commit in the meantime. It dereferences to
/// [`ReadTransaction`], so trees are opened the same way.
///
/// ```rust,ignore
/// let snapshot = env.create_snapshot()?;
/// for (name, state) in snapshot.trees()? {
///     let tree = snapshot.open_tree(&name)?.expect("listed by the snapshot");
///     assert_eq!(tree.len(), state.entries);
/// }
/// ```
///
/// Pages the snapshot can reach are not reused until it is dropped.
#[derive(Debug)]
pub struct Snapshot<'env> {
    txn: ReadTransaction<'env>,
}

impl<'env> Snapshot<'env> {
    pub(crate) fn new(txn: ReadTransaction<'env>) -> Self {
        Self { txn }
    }

    /// Every tree with its state, in name order.
    pub fn trees(&self) -> CoreResult<Vec<(String, TreeState)>> {
        self.txn.trees()
    }

    /// Releases the snapshot. Equivalent to dropping it.
    pub fn close(self) {}
}

impl<'env> Deref for Snapshot<'env> {
    type Target = ReadTransaction<'env>;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}
