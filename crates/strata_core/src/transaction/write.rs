//! The write transaction.

use super::manager::{CommitBatch, TransactionManager};
use super::state::TransactionState;
use super::write_set::{PagerView, WriteSet};
use crate::catalog;
use crate::error::{CoreError, CoreResult};
use crate::freespace::{self, FreeSpace};
use crate::page::meta::EnvironmentHeader;
use crate::tree::{ops, Tree, TreeMut, TreeState};
use crate::types::{lexicographic, Generation, TransactionId};
use parking_lot::MutexGuard;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strata_storage::PageNumber;
use tracing::{debug, warn};

/// Rounds of free-space tree rewriting before giving up. Each round only
/// records the pages the previous round freed, so a handful suffice.
const MAX_FREE_SPACE_ROUNDS: usize = 32;

#[derive(Debug, Clone, Copy)]
struct OpenTree {
    state: TreeState,
    /// Must be written to the catalog at commit.
    dirty: bool,
}

/// The single active write transaction.
///
/// Holds the environment's write lock until it commits, rolls back, or is
/// dropped. Dropping an active transaction rolls it back.
///
/// # Failure
///
/// If a mutation fails part way (out of space, a damaged page), the
/// transaction's private pages may be half updated. Every later operation,
/// including commit, then fails with [`CoreError::TransactionAborted`]; the
/// only way forward is to roll back. Nothing reaches the journal or the
/// data file.
pub struct WriteTransaction<'env> {
    manager: &'env TransactionManager,
    /// Released on commit or rollback.
    guard: Option<MutexGuard<'env, ()>>,
    id: TransactionId,
    base: Arc<EnvironmentHeader>,
    ws: WriteSet,
    catalog: TreeState,
    free_space: TreeState,
    trees: BTreeMap<String, OpenTree>,
    /// Names to remove from the catalog at commit.
    deleted: BTreeSet<String>,
    /// Pager high-water mark when the transaction began.
    high_water: PageNumber,
    state: TransactionState,
    failure: Option<String>,
}

impl<'env> WriteTransaction<'env> {
    pub(crate) fn new(
        manager: &'env TransactionManager,
        guard: MutexGuard<'env, ()>,
        id: TransactionId,
        base: Arc<EnvironmentHeader>,
        available: FreeSpace,
    ) -> Self {
        let pager = manager.pager();
        Self {
            manager,
            guard: Some(guard),
            id,
            ws: WriteSet::new(PagerView::new(Arc::clone(pager)), available),
            catalog: base.catalog,
            free_space: base.free_space,
            base,
            trees: BTreeMap::new(),
            deleted: BTreeSet::new(),
            high_water: pager.next_page(),
            state: TransactionState::Active,
            failure: None,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the generation this transaction started from.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.base.generation
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub(crate) fn manager(&self) -> &'env TransactionManager {
        self.manager
    }

    fn ensure_usable(&self) -> CoreResult<()> {
        self.state.ensure_active()?;
        match &self.failure {
            Some(reason) => Err(CoreError::transaction_aborted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Marks the transaction failed after a mutation error.
    fn fail(&mut self, err: CoreError) -> CoreError {
        if err.is_corruption() {
            self.manager.poison(err.to_string());
        }
        self.failure = Some(err.to_string());
        err
    }

    /// Creates the internal trees of a new environment.
    pub(crate) fn initialize(&mut self) -> CoreResult<()> {
        self.ensure_usable()?;
        self.catalog = ops::create(&mut self.ws)?;
        self.free_space = ops::create(&mut self.ws)?;
        Ok(())
    }

    fn tree_state(&self, name: &str) -> CoreResult<Option<TreeState>> {
        if let Some(open) = self.trees.get(name) {
            return Ok(Some(open.state));
        }
        if self.deleted.contains(name) {
            return Ok(None);
        }
        catalog::lookup(&self.ws, &self.catalog, name)
    }

    fn load_tree(&self, name: &str) -> CoreResult<OpenTree> {
        if let Some(open) = self.trees.get(name) {
            return Ok(*open);
        }
        self.tree_state(name)?
            .map(|state| OpenTree {
                state,
                dirty: false,
            })
            .ok_or_else(|| CoreError::tree_not_found(name))
    }

    /// Opens the tree called `name`, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, reserved, or too long.
    pub fn create_tree(&mut self, name: &str) -> CoreResult<TreeMut<'_, 'env>> {
        self.ensure_usable()?;
        catalog::validate_name(name, self.ws.geometry())?;
        match self.tree_state(name)? {
            Some(state) => self.track(name, state),
            None => {
                let state = match ops::create(&mut self.ws) {
                    Ok(state) => state,
                    Err(err) => return Err(self.fail(err)),
                };
                self.trees
                    .insert(name.to_owned(), OpenTree { state, dirty: true });
                debug!(txid = %self.id, tree = name, "tree created");
            }
        }
        Ok(TreeMut::new(self, name))
    }

    /// Keeps an opened tree's state at hand for its handle.
    fn track(&mut self, name: &str, state: TreeState) {
        self.trees
            .entry(name.to_owned())
            .or_insert(OpenTree {
                state,
                dirty: false,
            });
    }

    /// Entry count of a tree opened in this transaction.
    pub(crate) fn tree_entries(&self, name: &str) -> u64 {
        self.trees.get(name).map_or(0, |open| open.state.entries)
    }

    /// Opens an existing tree for writing.
    pub fn tree_mut(&mut self, name: &str) -> CoreResult<Option<TreeMut<'_, 'env>>> {
        self.ensure_usable()?;
        let Some(state) = self.tree_state(name)? else {
            return Ok(None);
        };
        self.track(name, state);
        Ok(Some(TreeMut::new(self, name)))
    }

    /// Opens a tree for reading, including this transaction's changes.
    pub fn open_tree(&self, name: &str) -> CoreResult<Option<Tree<'_>>> {
        self.ensure_usable()?;
        Ok(self
            .tree_state(name)?
            .map(|state| Tree::new(&self.ws, name, state, self.manager.comparer())))
    }

    /// Deletes a tree and frees all its pages. Returns false if it did not
    /// exist.
    pub fn delete_tree(&mut self, name: &str) -> CoreResult<bool> {
        self.ensure_usable()?;
        let Some(state) = self.tree_state(name)? else {
            return Ok(false);
        };
        if let Err(err) = ops::release_all(&mut self.ws, &state) {
            return Err(self.fail(err));
        }
        self.trees.remove(name);
        self.deleted.insert(name.to_owned());
        debug!(txid = %self.id, tree = name, pages = state.page_count(), "tree deleted");
        Ok(true)
    }

    /// Renames a tree. Its pages are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TreeNotFound`] if `from` does not exist and
    /// [`CoreError::TreeExists`] if `to` does.
    pub fn rename_tree(&mut self, from: &str, to: &str) -> CoreResult<()> {
        self.ensure_usable()?;
        catalog::validate_name(to, self.ws.geometry())?;
        let state = self
            .tree_state(from)?
            .ok_or_else(|| CoreError::tree_not_found(from))?;
        if self.tree_state(to)?.is_some() {
            return Err(CoreError::TreeExists {
                name: to.to_owned(),
            });
        }
        self.trees.remove(from);
        self.deleted.insert(from.to_owned());
        self.trees
            .insert(to.to_owned(), OpenTree { state, dirty: true });
        Ok(())
    }

    /// Names of all trees, including this transaction's changes.
    pub fn tree_names(&self) -> CoreResult<Vec<String>> {
        self.ensure_usable()?;
        let mut names: BTreeSet<String> = catalog::entries(&self.ws, &self.catalog)?
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| !self.deleted.contains(name))
            .collect();
        names.extend(self.trees.keys().cloned());
        Ok(names.into_iter().collect())
    }

    pub(crate) fn tree_add(&mut self, name: &str, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.ensure_usable()?;
        ops::check_key(&self.ws, key)?;
        let mut open = self.load_tree(name)?;
        let comparer = self.manager.comparer();
        if let Err(err) = ops::insert(&mut self.ws, &mut open.state, comparer, key, value) {
            return Err(self.fail(err));
        }
        open.dirty = true;
        self.trees.insert(name.to_owned(), open);
        Ok(())
    }

    pub(crate) fn tree_delete(&mut self, name: &str, key: &[u8]) -> CoreResult<bool> {
        self.ensure_usable()?;
        let mut open = self.load_tree(name)?;
        let comparer = self.manager.comparer();
        let removed = match ops::remove(&mut self.ws, &mut open.state, comparer, key) {
            Ok(removed) => removed,
            Err(err) => return Err(self.fail(err)),
        };
        if removed {
            open.dirty = true;
            self.trees.insert(name.to_owned(), open);
        }
        Ok(removed)
    }

    /// Commits the transaction and returns the generation it published.
    ///
    /// After commit returns, the changes are durable (with
    /// `sync_on_commit`) and visible to new transactions. If commit fails,
    /// the transaction is rolled back.
    pub fn commit(&mut self) -> CoreResult<Generation> {
        self.state.ensure_active()?;
        if let Some(reason) = self.failure.clone() {
            self.finish_rollback();
            return Err(CoreError::transaction_aborted(reason));
        }
        match self.publish() {
            Ok(generation) => {
                self.state = TransactionState::Committed;
                self.guard = None;
                Ok(generation)
            }
            Err(err) => {
                if err.is_corruption() {
                    self.manager.poison(err.to_string());
                }
                self.finish_rollback();
                Err(err)
            }
        }
    }

    fn publish(&mut self) -> CoreResult<Generation> {
        for name in std::mem::take(&mut self.deleted) {
            ops::remove(&mut self.ws, &mut self.catalog, lexicographic, name.as_bytes())?;
        }
        for (name, open) in &self.trees {
            if open.dirty {
                ops::insert(
                    &mut self.ws,
                    &mut self.catalog,
                    lexicographic,
                    name.as_bytes(),
                    &open.state.encode(),
                )?;
            }
        }
        self.persist_free_space()?;

        let page_size = self.ws.geometry().page_size();
        let header = EnvironmentHeader {
            page_size: page_size as u32,
            generation: self.base.generation.next(),
            last_txid: self.id,
            checkpoint_txid: self.base.checkpoint_txid,
            next_page: self.manager.pager().next_page(),
            catalog: self.catalog,
            free_space: self.free_space,
        };
        let mut pages = vec![(PageNumber::HEADER, header.encode(page_size))];
        pages.extend(self.ws.page_images()?);

        let batch = CommitBatch {
            header,
            pages,
            available: self.ws.allocator().clone(),
            freed: self.ws.freed().to_vec(),
        };
        self.manager.commit(self.id, batch)
    }

    /// Rewrites the free-space tree so that it records every page that will
    /// be free once this commit is published.
    ///
    /// Rewriting the tree copies some of its pages, which frees their old
    /// copies, which must be recorded in turn. Allocations during this step
    /// come from the high-water mark only, so the loop settles once a round
    /// changes nothing.
    fn persist_free_space(&mut self) -> CoreResult<()> {
        let pending = self.manager.pending_runs();
        self.ws.set_fresh_only(true);
        let mut round = 0;
        loop {
            let mut free = self.ws.allocator().clone();
            free.extend(pending.iter().copied())?;
            free.extend(self.ws.freed().iter().copied())?;
            let desired: BTreeMap<u64, u64> =
                free.runs().map(|run| (run.start.as_u64(), run.len)).collect();
            let recorded = freespace::read_runs(&self.ws, &self.free_space)?;
            if desired == recorded {
                break;
            }

            round += 1;
            if round > MAX_FREE_SPACE_ROUNDS {
                return Err(CoreError::invariant(
                    "free-space tree did not settle while committing",
                ));
            }
            for (start, len) in &recorded {
                if desired.get(start) != Some(len) {
                    let key = freespace::run_key(*start);
                    ops::remove(&mut self.ws, &mut self.free_space, lexicographic, &key)?;
                }
            }
            for (start, len) in &desired {
                if recorded.get(start) != Some(len) {
                    let key = freespace::run_key(*start);
                    let value = freespace::run_value(*len);
                    ops::insert(&mut self.ws, &mut self.free_space, lexicographic, &key, &value)?;
                }
            }
        }
        self.ws.set_fresh_only(false);
        Ok(())
    }

    /// Discards every change. Other transactions never observed any of
    /// them.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.finish_rollback();
        Ok(())
    }

    fn finish_rollback(&mut self) {
        if let Err(err) = self.manager.pager().set_next_page(self.high_water) {
            warn!(txid = %self.id, error = %err, "failed to reset page high-water mark");
        }
        self.ws = WriteSet::new(
            PagerView::new(Arc::clone(self.manager.pager())),
            FreeSpace::new(),
        );
        self.trees.clear();
        self.deleted.clear();
        self.state = TransactionState::RolledBack;
        self.guard = None;
        debug!(txid = %self.id, "transaction rolled back");
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.finish_rollback();
        }
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("id", &self.id)
            .field("generation", &self.base.generation)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use strata_storage::{MemoryLogDirectory, MemoryPager, Pager};

    fn manager() -> TransactionManager {
        let pager: Arc<dyn Pager> = Arc::new(MemoryPager::new(1024));
        pager.set_next_page(PageNumber(1)).unwrap();
        let journal = Journal::open(Arc::new(MemoryLogDirectory::new()), 1 << 20, true).unwrap();
        let manager = TransactionManager::new(
            pager,
            journal,
            EnvironmentHeader::empty(1024),
            FreeSpace::new(),
            lexicographic,
            0,
        );
        {
            let mut txn = manager.begin_write().unwrap();
            txn.initialize().unwrap();
            txn.commit().unwrap();
        }
        manager
    }

    #[test]
    fn created_tree_is_visible_after_commit() {
        let manager = manager();
        let mut txn = manager.begin_write().unwrap();
        txn.create_tree("users").unwrap().add(b"ann", b"1").unwrap();
        assert_eq!(txn.tree_names().unwrap(), vec!["users".to_owned()]);
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);

        let reader = manager.begin_read();
        let tree = reader.open_tree("users").unwrap().unwrap();
        assert_eq!(tree.read(b"ann").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_discards_changes_and_pages() {
        let manager = manager();
        let before = manager.pager().next_page();
        let mut txn = manager.begin_write().unwrap();
        let mut tree = txn.create_tree("t").unwrap();
        for i in 0..200u32 {
            tree.add(&i.to_be_bytes(), &[7u8; 100]).unwrap();
        }
        txn.rollback().unwrap();
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert!(txn.commit().is_err());
        assert_eq!(manager.pager().next_page(), before);

        let reader = manager.begin_read();
        assert!(reader.open_tree("t").unwrap().is_none());
    }

    #[test]
    fn dropping_an_active_transaction_releases_the_lock() {
        let manager = manager();
        {
            let mut txn = manager.begin_write().unwrap();
            txn.create_tree("t").unwrap();
        }
        let txn = manager.begin_write().unwrap();
        assert!(txn.open_tree("t").unwrap().is_none());
    }

    #[test]
    fn rename_and_delete_update_the_catalog() {
        let manager = manager();
        let mut txn = manager.begin_write().unwrap();
        txn.create_tree("a").unwrap().add(b"k", b"v").unwrap();
        txn.create_tree("b").unwrap();
        txn.commit().unwrap();

        let mut txn = manager.begin_write().unwrap();
        assert!(matches!(
            txn.rename_tree("a", "b"),
            Err(CoreError::TreeExists { .. })
        ));
        assert!(matches!(
            txn.rename_tree("zzz", "c"),
            Err(CoreError::TreeNotFound { .. })
        ));
        txn.rename_tree("a", "c").unwrap();
        assert!(txn.delete_tree("b").unwrap());
        assert!(!txn.delete_tree("b").unwrap());
        txn.commit().unwrap();

        let reader = manager.begin_read();
        assert_eq!(reader.tree_names().unwrap(), vec!["c".to_owned()]);
        let tree = reader.open_tree("c").unwrap().unwrap();
        assert_eq!(tree.read(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn recreating_a_deleted_tree_starts_empty() {
        let manager = manager();
        let mut txn = manager.begin_write().unwrap();
        txn.create_tree("t").unwrap().add(b"k", b"v").unwrap();
        txn.commit().unwrap();

        let mut txn = manager.begin_write().unwrap();
        txn.delete_tree("t").unwrap();
        assert!(txn.create_tree("t").unwrap().read(b"k").unwrap().is_none());
        txn.commit().unwrap();

        let reader = manager.begin_read();
        let tree = reader.open_tree("t").unwrap().unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn key_too_large_does_not_abort() {
        let manager = manager();
        let mut txn = manager.begin_write().unwrap();
        let mut tree = txn.create_tree("t").unwrap();
        assert!(matches!(
            tree.add(&[0u8; 200], b"v"),
            Err(CoreError::KeyTooLarge { .. })
        ));
        tree.add(b"ok", b"v").unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn free_space_tree_matches_free_pages() {
        let manager = manager();
        for round in 0..5u8 {
            let mut txn = manager.begin_write().unwrap();
            let mut tree = txn.create_tree("t").unwrap();
            for i in 0..100u32 {
                tree.add(&i.to_be_bytes(), &[round; 300]).unwrap();
            }
            txn.commit().unwrap();
        }

        let header = manager.current();
        let view = PagerView::new(Arc::clone(manager.pager()));
        let recorded = freespace::load(&view, &header.free_space).unwrap();
        let (available, pending) = manager.space_totals();
        assert_eq!(recorded.total_pages(), available + pending);
    }

    #[test]
    fn names_are_checked() {
        let manager = manager();
        let mut txn = manager.begin_write().unwrap();
        assert!(txn.create_tree("").is_err());
        assert!(txn.create_tree("$catalog").is_err());
        assert!(txn.tree_mut("missing").unwrap().is_none());
    }
}
