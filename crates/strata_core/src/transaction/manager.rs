//! Transaction manager.

use super::read::ReadTransaction;
use super::write::WriteTransaction;
use super::write_set::PagerView;
use crate::error::{CoreError, CoreResult};
use crate::freespace::{FreeSpace, PageRun};
use crate::journal::{Journal, JournalRecord};
use crate::page::meta::EnvironmentHeader;
use crate::page::Geometry;
use crate::types::{Comparer, Generation, TransactionId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_storage::{PageNumber, Pager};
use tracing::{debug, error, info, warn};

/// The published generation and the readers pinned to it.
///
/// Registering a reader and publishing a new header happen under the same
/// lock, so a reader never pins a header whose pages are already being
/// reclaimed.
struct Published {
    header: Arc<EnvironmentHeader>,
    /// Open read transactions per generation.
    readers: BTreeMap<Generation, usize>,
}

struct SpaceState {
    /// Pages no reader can reach. Write transactions allocate from here.
    available: FreeSpace,
    /// Runs freed by the commit that published the generation, waiting for
    /// every reader of an older generation to finish.
    pending: VecDeque<(Generation, Vec<PageRun>)>,
}

/// Everything a write transaction hands over at commit.
pub(crate) struct CommitBatch {
    pub(crate) header: EnvironmentHeader,
    pub(crate) pages: Vec<(PageNumber, Vec<u8>)>,
    pub(crate) available: FreeSpace,
    pub(crate) freed: Vec<PageRun>,
}

/// Coordinates transactions over one environment.
///
/// The transaction manager provides:
/// - Single-writer concurrency control via `begin_write()`
/// - Snapshot isolation for readers, which pin a published generation
/// - Journal-then-apply commits
/// - Deferred page reclamation gated by the oldest open reader
///
/// ## Single-Writer Guarantee
///
/// Only one write transaction can be active at a time. `begin_write()`
/// acquires an exclusive lock that is held for the transaction's lifetime
/// and released when it commits, rolls back or is dropped.
pub(crate) struct TransactionManager {
    pager: Arc<dyn Pager>,
    journal: Journal,
    geometry: Geometry,
    comparer: Comparer,
    checkpoint_threshold: u64,
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Write lock - only one writer at a time.
    write_lock: Mutex<()>,
    published: Mutex<Published>,
    space: Mutex<SpaceState>,
    /// Set once the data file may no longer match the published state.
    poisoned: RwLock<Option<String>>,
}

impl TransactionManager {
    /// Creates a manager for a recovered environment.
    pub(crate) fn new(
        pager: Arc<dyn Pager>,
        journal: Journal,
        header: EnvironmentHeader,
        available: FreeSpace,
        comparer: Comparer,
        checkpoint_threshold: u64,
    ) -> Self {
        let geometry = Geometry::new(pager.page_size());
        Self {
            pager,
            journal,
            geometry,
            comparer,
            checkpoint_threshold,
            next_txid: AtomicU64::new(header.last_txid.as_u64() + 1),
            write_lock: Mutex::new(()),
            published: Mutex::new(Published {
                header: Arc::new(header),
                readers: BTreeMap::new(),
            }),
            space: Mutex::new(SpaceState {
                available,
                pending: VecDeque::new(),
            }),
            poisoned: RwLock::new(None),
        }
    }

    pub(crate) fn pager(&self) -> &Arc<dyn Pager> {
        &self.pager
    }

    pub(crate) fn journal(&self) -> &Journal {
        &self.journal
    }

    pub(crate) fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub(crate) fn comparer(&self) -> Comparer {
        self.comparer
    }

    /// The most recently published header.
    pub(crate) fn current(&self) -> Arc<EnvironmentHeader> {
        Arc::clone(&self.published.lock().header)
    }

    /// Begins a read transaction on the current generation. Never blocks on
    /// the writer.
    pub(crate) fn begin_read(&self) -> ReadTransaction<'_> {
        let header = {
            let mut published = self.published.lock();
            let header = Arc::clone(&published.header);
            *published.readers.entry(header.generation).or_insert(0) += 1;
            header
        };
        ReadTransaction::new(self, header, PagerView::new(Arc::clone(&self.pager)))
    }

    pub(crate) fn release_reader(&self, generation: Generation) {
        let mut published = self.published.lock();
        if let Some(count) = published.readers.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                published.readers.remove(&generation);
            }
        }
    }

    /// Number of open read transactions and the oldest generation any of
    /// them pins.
    pub(crate) fn readers(&self) -> (usize, Option<Generation>) {
        let published = self.published.lock();
        (
            published.readers.values().sum(),
            published.readers.keys().next().copied(),
        )
    }

    /// Begins the write transaction, blocking while another is active.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EnvironmentPoisoned`] if an earlier failure left
    /// the environment unable to accept writes.
    pub(crate) fn begin_write(&self) -> CoreResult<WriteTransaction<'_>> {
        // Acquire exclusive write lock - this blocks if another writer exists
        let guard = self.write_lock.lock();
        self.check_writable()?;

        let (base, watermark) = {
            let published = self.published.lock();
            (
                Arc::clone(&published.header),
                published.readers.keys().next().copied(),
            )
        };
        let available = {
            let mut space = self.space.lock();
            Self::reclaim(&mut space, watermark)?;
            space.available.clone()
        };

        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        Ok(WriteTransaction::new(self, guard, id, base, available))
    }

    /// Moves pending runs no reader can reach into the available set.
    ///
    /// Runs freed by the commit that published generation `g` were last
    /// reachable in `g - 1`, so they are safe once the oldest reader is at
    /// `g` or later.
    fn reclaim(space: &mut SpaceState, watermark: Option<Generation>) -> CoreResult<()> {
        while let Some((generation, _)) = space.pending.front() {
            if watermark.is_some_and(|oldest| oldest < *generation) {
                break;
            }
            if let Some((_, runs)) = space.pending.pop_front() {
                space.available.extend(runs)?;
            }
        }
        Ok(())
    }

    /// Every run waiting for readers to finish.
    pub(crate) fn pending_runs(&self) -> Vec<PageRun> {
        self.space
            .lock()
            .pending
            .iter()
            .flat_map(|(_, runs)| runs.iter().copied())
            .collect()
    }

    /// Available and pending page totals.
    pub(crate) fn space_totals(&self) -> (u64, u64) {
        let space = self.space.lock();
        let pending = space
            .pending
            .iter()
            .flat_map(|(_, runs)| runs.iter())
            .map(|run| run.len)
            .sum();
        (space.available.total_pages(), pending)
    }

    /// Runs the journal-then-apply commit protocol for a prepared batch.
    ///
    /// 1. Journal every page image and sync the journal
    /// 2. Write the images into the pager
    /// 3. Publish the new header and hand over the transaction's free space
    ///
    /// Failure in step 1 leaves no durable trace. Failure in step 2 poisons
    /// the environment; the journal still holds the commit and replays it
    /// on the next open.
    pub(crate) fn commit(&self, txid: TransactionId, batch: CommitBatch) -> CoreResult<Generation> {
        self.check_writable()?;
        let CommitBatch {
            header,
            pages,
            available,
            freed,
        } = batch;
        let generation = header.generation;
        let record = JournalRecord {
            txid,
            generation,
            page_size: self.geometry.page_size() as u32,
            pages,
        };

        let journal_bytes = self.journal.append(&record)?;

        for (page, image) in &record.pages {
            if let Err(err) = self.pager.write(*page, image) {
                let err = CoreError::from_storage(err);
                self.poison(format!("applying {txid} failed after it was journaled: {err}"));
                return Err(err);
            }
        }

        {
            let mut space = self.space.lock();
            space.available = available;
            if !freed.is_empty() {
                space.pending.push_back((generation, freed));
            }
        }
        self.published.lock().header = Arc::new(header);

        debug!(
            txid = %txid,
            generation = %generation,
            pages = record.pages.len(),
            journal_bytes,
            "transaction committed"
        );

        if self.checkpoint_threshold > 0
            && self.journal.bytes_since_checkpoint() >= self.checkpoint_threshold
        {
            // The commit is already durable in the journal.
            if let Err(err) = self.checkpoint_locked() {
                warn!(error = %err, "automatic checkpoint failed");
            }
        }
        Ok(generation)
    }

    /// Takes the write lock, waiting for an active writer to finish.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Checkpoints under the write lock.
    pub(crate) fn checkpoint(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.checkpoint_locked()
    }

    /// Syncs the data file, records the checkpoint in the header page and
    /// discards the journal. The caller holds the write lock.
    pub(crate) fn checkpoint_locked(&self) -> CoreResult<()> {
        self.check_writable()?;
        self.pager.sync().map_err(CoreError::from_storage)?;

        let current = self.current();
        if current.checkpoint_txid != current.last_txid {
            let mut header = (*current).clone();
            header.checkpoint_txid = header.last_txid;
            self.pager
                .write(PageNumber::HEADER, &header.encode(self.geometry.page_size()))
                .map_err(CoreError::from_storage)?;
            self.pager.sync().map_err(CoreError::from_storage)?;
            self.published.lock().header = Arc::new(header);
        }

        self.journal.reset()?;
        info!(
            txid = %current.last_txid,
            generation = %current.generation,
            "checkpoint complete"
        );
        Ok(())
    }

    /// Refuses further writes. The first reason sticks.
    pub(crate) fn poison(&self, reason: impl Into<String>) {
        let mut poisoned = self.poisoned.write();
        if poisoned.is_none() {
            let reason = reason.into();
            error!(reason = %reason, "environment poisoned, refusing further writes");
            *poisoned = Some(reason);
        }
    }

    pub(crate) fn poisoned(&self) -> Option<String> {
        self.poisoned.read().clone()
    }

    pub(crate) fn check_writable(&self) -> CoreResult<()> {
        match &*self.poisoned.read() {
            Some(reason) => Err(CoreError::EnvironmentPoisoned {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::lexicographic;
    use strata_storage::{MemoryLogDirectory, MemoryPager};

    const PAGE: usize = 1024;

    fn manager() -> TransactionManager {
        let pager: Arc<dyn Pager> = Arc::new(MemoryPager::new(PAGE));
        pager.set_next_page(PageNumber(1)).unwrap();
        let journal = Journal::open(Arc::new(MemoryLogDirectory::new()), 1 << 20, true).unwrap();
        let manager = TransactionManager::new(
            pager,
            journal,
            EnvironmentHeader::empty(PAGE),
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

    fn put(manager: &TransactionManager, key: &[u8], value: &[u8]) {
        let mut txn = manager.begin_write().unwrap();
        txn.create_tree("t").unwrap().add(key, value).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn commits_publish_new_generations() {
        let manager = manager();
        assert_eq!(manager.current().generation, Generation(1));
        put(&manager, b"a", b"1");
        put(&manager, b"b", b"2");
        let header = manager.current();
        assert_eq!(header.generation, Generation(3));
        assert_eq!(header.last_txid, TransactionId(3));
    }

    #[test]
    fn readers_pin_their_generation() {
        let manager = manager();
        put(&manager, b"k", b"old");
        let reader = manager.begin_read();
        put(&manager, b"k", b"new");

        let tree = reader.open_tree("t").unwrap().unwrap();
        assert_eq!(tree.read(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(manager.readers(), (1, Some(reader.generation())));
        drop(reader);
        assert_eq!(manager.readers(), (0, None));
    }

    #[test]
    fn freed_pages_wait_for_older_readers() {
        let manager = manager();
        put(&manager, b"k", b"v1");
        let reader = manager.begin_read();
        put(&manager, b"k", b"v2");
        put(&manager, b"k", b"v3");

        // Pages superseded while the reader is open stay pending.
        let (_, pending) = manager.space_totals();
        assert!(pending > 0);

        drop(reader);
        // The next writer reclaims them.
        drop(manager.begin_write().unwrap());
        let (_, pending_after) = manager.space_totals();
        assert_eq!(pending_after, 0);
    }

    #[test]
    fn poisoned_manager_refuses_writers() {
        let manager = manager();
        manager.poison("disk on fire");
        manager.poison("second reason is ignored");
        let err = manager.begin_write().unwrap_err();
        assert!(matches!(
            err,
            CoreError::EnvironmentPoisoned { ref reason } if reason == "disk on fire"
        ));
        // Readers still work.
        let reader = manager.begin_read();
        assert!(reader.open_tree("missing").unwrap().is_none());
    }

    #[test]
    fn checkpoint_empties_the_journal() {
        let manager = manager();
        put(&manager, b"a", b"1");
        assert!(manager.journal().bytes_since_checkpoint() > 0);
        manager.checkpoint().unwrap();
        assert_eq!(manager.journal().bytes_since_checkpoint(), 0);
        let header = manager.current();
        assert_eq!(header.checkpoint_txid, header.last_txid);

        let page0 = manager.pager().read(PageNumber::HEADER).unwrap();
        let on_disk = EnvironmentHeader::decode(&page0).unwrap().unwrap();
        assert_eq!(on_disk, *header);
    }
}
