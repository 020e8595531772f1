//! Read transactions.

use super::manager::TransactionManager;
use super::state::TransactionState;
use super::write_set::PagerView;
use crate::catalog;
use crate::error::CoreResult;
use crate::page::meta::EnvironmentHeader;
use crate::tree::{Tree, TreeState};
use crate::types::{Generation, TransactionId};
use std::sync::Arc;

/// A read-only view of one published generation.
///
/// Any number of read transactions run alongside each other and alongside
/// the writer. None of them ever blocks or sees uncommitted pages. Pages the
/// generation references are not reused until the transaction is dropped.
pub struct ReadTransaction<'env> {
    manager: &'env TransactionManager,
    header: Arc<EnvironmentHeader>,
    view: PagerView,
}

impl<'env> ReadTransaction<'env> {
    pub(crate) fn new(
        manager: &'env TransactionManager,
        header: Arc<EnvironmentHeader>,
        view: PagerView,
    ) -> Self {
        Self {
            manager,
            header,
            view,
        }
    }

    /// Returns the generation this transaction reads.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.header.generation
    }

    /// Returns the last transaction included in this generation.
    #[must_use]
    pub fn last_txid(&self) -> TransactionId {
        self.header.last_txid
    }

    /// Always [`TransactionState::Active`]; a read transaction ends when it
    /// is dropped.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        TransactionState::Active
    }

    /// Opens a tree. Returns `None` if no tree has that name.
    pub fn open_tree(&self, name: &str) -> CoreResult<Option<Tree<'_>>> {
        let comparer = self.manager.comparer();
        Ok(catalog::lookup(&self.view, &self.header.catalog, name)?
            .map(|state| Tree::new(&self.view, name, state, comparer)))
    }

    /// Names of all trees, in byte order.
    pub fn tree_names(&self) -> CoreResult<Vec<String>> {
        Ok(self.trees()?.into_iter().map(|(name, _)| name).collect())
    }

    pub(crate) fn trees(&self) -> CoreResult<Vec<(String, TreeState)>> {
        catalog::entries(&self.view, &self.header.catalog)
    }

    pub(crate) fn header(&self) -> &EnvironmentHeader {
        &self.header
    }

    pub(crate) fn view(&self) -> &PagerView {
        &self.view
    }

    pub(crate) fn manager(&self) -> &'env TransactionManager {
        self.manager
    }

    /// Ends the transaction. Equivalent to dropping it.
    pub fn close(self) {}
}

impl Drop for ReadTransaction<'_> {
    fn drop(&mut self) {
        self.manager.release_reader(self.header.generation);
    }
}

impl std::fmt::Debug for ReadTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTransaction")
            .field("generation", &self.header.generation)
            .field("last_txid", &self.header.last_txid)
            .finish_non_exhaustive()
    }
}
