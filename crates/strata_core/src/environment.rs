//! Storage environment facade and recovery.

use crate::config::{Config, PagerKind};
use crate::dir::EnvironmentDir;
use crate::error::{CoreError, CoreResult};
use crate::freespace::{self, FreeSpace};
use crate::journal::{Journal, RecoveryReport};
use crate::page::meta::EnvironmentHeader;
use crate::snapshot::Snapshot;
use crate::stats::EnvironmentStats;
use crate::transaction::{
    PagerView, ReadTransaction, Transaction, TransactionFlags, TransactionManager,
    WriteTransaction,
};
use crate::tree::{Tree, TreeMut};
use crate::types::{Generation, TransactionId};
use crate::verify::{self, VerifyReport};
use parking_lot::RwLock;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use strata_storage::{
    sync_directory, FileLogDirectory, LogDirectory, MemoryLogDirectory, MemoryPager, MmapPager,
    PageNumber, Pager, PagerOptions,
};
use tracing::{info, warn};

/// The handle to an open storage environment.
///
/// `StorageEnvironment` owns the pager, the journal and the transaction
/// manager. It is the only way to start transactions:
///
/// - [`begin_read`](Self::begin_read) for a snapshot reader (never blocks)
/// - [`begin_write`](Self::begin_write) for the single writer (blocks while
///   another writer is active)
///
/// # Opening an Environment
///
/// ```rust,ignore
/// use strata_core::{Slice, StorageEnvironment};
/// use std::path::Path;
///
/// let env = StorageEnvironment::open(Path::new("my_env"))?;
///
/// env.write(|txn| {
///     let mut tree = txn.create_tree("users")?;
///     tree.add(b"alice", b"1")?;
///     Ok(())
/// })?;
///
/// let txn = env.begin_read()?;
/// let users = txn.open_tree("users")?.expect("created above");
/// for entry in users.iterate(Slice::BeforeAllKeys, Slice::AfterAllKeys)? {
///     let (key, value) = entry?;
///     println!("{key:?} => {value:?}");
/// }
///
/// env.close()?;
/// ```
///
/// # Recovery
///
/// Opening replays every journal record newer than the last checkpoint into
/// the data file, then checkpoints. Dropping an environment without
/// [`close`](Self::close) is safe: committed transactions are in the journal
/// and are replayed on the next open.
pub struct StorageEnvironment {
    config: Config,
    /// Transaction manager. Owns the pager and the journal.
    manager: TransactionManager,
    /// Environment directory (holds the lock). None for in-memory
    /// environments. Dropped after the manager.
    dir: Option<EnvironmentDir>,
    /// What recovery did on open.
    recovery: RecoveryReport,
    /// Whether the environment is open.
    is_open: RwLock<bool>,
}

impl StorageEnvironment {
    /// Opens or creates a durable environment in a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another instance has the environment locked (`EnvironmentLocked`)
    /// - The data file or journal is damaged (`PageCorruption`,
    ///   `JournalCorruption`, `ChecksumMismatch`)
    /// - The data file uses a different page size (`InvalidFormat`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a durable environment with custom configuration.
    ///
    /// ```rust,ignore
    /// use strata_core::{Config, StorageEnvironment};
    ///
    /// let config = Config::default()
    ///     .page_size(8192)
    ///     .sync_on_commit(false);
    /// let env = StorageEnvironment::open_with_config(Path::new("my_env"), config)?;
    /// ```
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open), plus `InvalidConfig` for a configuration
    /// that fails [`Config::validate`] or selects the in-memory pager.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        if config.pager == PagerKind::InMemory {
            return Err(CoreError::invalid_config(
                "the in-memory pager has no directory; use open_in_memory_with_config",
            ));
        }

        let dir = EnvironmentDir::open(path, config.create_if_missing)?;
        let is_new = dir.is_new();
        if is_new && !config.create_if_missing {
            return Err(CoreError::invalid_format(
                "environment does not exist and create_if_missing is false",
            ));
        }
        if !is_new && config.error_if_exists {
            return Err(CoreError::invalid_format(
                "environment already exists and error_if_exists is true",
            ));
        }
        if !is_new {
            if let Some(stored) = stored_page_size(&dir.data_path())? {
                if stored != config.page_size {
                    return Err(CoreError::invalid_format(format!(
                        "environment uses {stored}-byte pages, opened with {}-byte pages",
                        config.page_size
                    )));
                }
            }
        }

        let options = PagerOptions {
            page_size: config.page_size,
            initial_pages: config.initial_pages(),
            growth_pages: config.growth_pages(),
            max_pages: config.max_pages(),
        };
        let pager: Arc<dyn Pager> =
            Arc::new(MmapPager::open(&dir.data_path(), options).map_err(CoreError::from_storage)?);
        let journal_dir: Arc<dyn LogDirectory> =
            Arc::new(FileLogDirectory::open(&dir.journal_path())?);
        if is_new {
            sync_directory(dir.path())?;
        }

        Self::start(config, Some(dir), pager, journal_dir)
    }

    /// Opens a fresh in-memory environment.
    ///
    /// Nothing survives the environment; useful for tests and scratch data.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens a fresh in-memory environment with custom configuration. The
    /// pager selection in `config` is ignored.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        let config = config.pager(PagerKind::InMemory);
        config.validate()?;
        let options = PagerOptions {
            page_size: config.page_size,
            initial_pages: config.initial_pages(),
            growth_pages: config.growth_pages(),
            max_pages: config.max_pages(),
        };
        let pager: Arc<dyn Pager> = Arc::new(MemoryPager::with_options(options));
        Self::start(config, None, pager, Arc::new(MemoryLogDirectory::new()))
    }

    /// Opens an environment over caller-supplied storage.
    ///
    /// This is a lower-level constructor for tests that need to share
    /// storage between instances or inject failures. For most use cases,
    /// prefer [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the pager's page size differs from the
    /// configured one, and otherwise fails as [`open`](Self::open).
    pub fn open_with_storage(
        config: Config,
        pager: Arc<dyn Pager>,
        journal_dir: Arc<dyn LogDirectory>,
    ) -> CoreResult<Self> {
        config.validate()?;
        Self::start(config, None, pager, journal_dir)
    }

    /// Recovers the data file from the journal and publishes its header.
    fn start(
        config: Config,
        dir: Option<EnvironmentDir>,
        pager: Arc<dyn Pager>,
        journal_dir: Arc<dyn LogDirectory>,
    ) -> CoreResult<Self> {
        let page_size = pager.page_size();
        if page_size != config.page_size {
            return Err(CoreError::invalid_config(format!(
                "pager uses {page_size}-byte pages, configured for {}",
                config.page_size
            )));
        }

        let checkpoint = Self::checkpoint_txid(pager.as_ref());
        let recovery = Journal::recover(journal_dir.as_ref(), page_size, checkpoint, |record| {
            for (page, image) in &record.pages {
                pager
                    .ensure(page.as_u64() + 1)
                    .map_err(CoreError::from_storage)?;
                pager.write(*page, image).map_err(CoreError::from_storage)?;
            }
            Ok(())
        })?;
        if recovery.replayed > 0 {
            pager.sync().map_err(CoreError::from_storage)?;
        }

        let journal = Journal::open(
            Arc::clone(&journal_dir),
            config.journal_file_size,
            config.sync_on_commit,
        )?;
        let stored = EnvironmentHeader::decode(
            &pager
                .read(PageNumber::HEADER)
                .map_err(CoreError::from_storage)?,
        )?;

        let manager = match stored {
            Some(header) => {
                pager
                    .ensure(header.next_page.as_u64())
                    .map_err(CoreError::from_storage)?;
                pager
                    .set_next_page(header.next_page)
                    .map_err(CoreError::from_storage)?;
                let view = PagerView::new(Arc::clone(&pager));
                let available = freespace::load(&view, &header.free_space)?;
                TransactionManager::new(
                    pager,
                    journal,
                    header,
                    available,
                    config.comparer,
                    config.checkpoint_threshold,
                )
            }
            None => Self::bootstrap(&config, pager, journal)?,
        };
        manager.checkpoint()?;

        let header = manager.current();
        info!(
            generation = %header.generation,
            last_txid = %header.last_txid,
            pages = header.next_page.as_u64(),
            journal_files = recovery.files,
            replayed = recovery.replayed,
            skipped = recovery.skipped,
            torn_bytes = recovery.torn_bytes,
            "storage environment opened"
        );

        Ok(Self {
            config,
            manager,
            dir,
            recovery,
            is_open: RwLock::new(true),
        })
    }

    /// Checkpoint recorded in the header page, or zero if the page is blank
    /// or damaged. A damaged header is rewritten by replaying the journal.
    fn checkpoint_txid(pager: &dyn Pager) -> TransactionId {
        let decoded = pager
            .read(PageNumber::HEADER)
            .map_err(CoreError::from_storage)
            .and_then(|page| EnvironmentHeader::decode(&page));
        match decoded {
            Ok(Some(header)) => header.checkpoint_txid,
            Ok(None) => TransactionId::default(),
            Err(err) => {
                warn!(error = %err, "header page unreadable, replaying the whole journal");
                TransactionId::default()
            }
        }
    }

    /// Writes the first generation of a new environment: an empty catalog
    /// and an empty free-space tree.
    fn bootstrap(
        config: &Config,
        pager: Arc<dyn Pager>,
        journal: Journal,
    ) -> CoreResult<TransactionManager> {
        pager.ensure(1).map_err(CoreError::from_storage)?;
        pager
            .set_next_page(PageNumber(1))
            .map_err(CoreError::from_storage)?;
        let manager = TransactionManager::new(
            pager,
            journal,
            EnvironmentHeader::empty(config.page_size),
            FreeSpace::new(),
            config.comparer,
            config.checkpoint_threshold,
        );
        {
            let mut txn = manager.begin_write()?;
            txn.initialize()?;
            txn.commit()?;
        }
        info!(page_size = config.page_size, "created storage environment");
        Ok(manager)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a read transaction on the latest committed generation.
    ///
    /// Never blocks, not even while a writer is active.
    pub fn begin_read(&self) -> CoreResult<ReadTransaction<'_>> {
        self.ensure_open()?;
        Ok(self.manager.begin_read())
    }

    /// Begins the write transaction.
    ///
    /// Blocks while another write transaction is active. Beginning a second
    /// writer on a thread that already holds one deadlocks.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentPoisoned` after a failure that left the data file
    /// out of step with the published state.
    pub fn begin_write(&self) -> CoreResult<WriteTransaction<'_>> {
        self.ensure_open()?;
        self.manager.begin_write()
    }

    /// Begins a transaction of the given kind.
    pub fn new_transaction(&self, flags: TransactionFlags) -> CoreResult<Transaction<'_>> {
        match flags {
            TransactionFlags::ReadOnly => self.begin_read().map(Transaction::Read),
            TransactionFlags::ReadWrite => self.begin_write().map(Transaction::Write),
        }
    }

    /// Runs `f` in a read transaction.
    pub fn read<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadTransaction<'_>) -> CoreResult<T>,
    {
        let txn = self.begin_read()?;
        f(&txn)
    }

    /// Runs `f` in a write transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back if it
    /// returns `Err`.
    ///
    /// ```rust,ignore
    /// env.write(|txn| {
    ///     txn.create_tree("t")?.add(b"k", b"v")?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn write<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<T>,
    {
        let mut txn = self.begin_write()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if txn.is_active() {
                    txn.rollback()?;
                }
                Err(err)
            }
        }
    }

    /// Creates a tree inside `txn`, or opens it if it already exists.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `txn` belongs to another environment.
    pub fn create_tree<'t, 'env>(
        &self,
        txn: &'t mut WriteTransaction<'env>,
        name: &str,
    ) -> CoreResult<TreeMut<'t, 'env>> {
        self.check_owner(txn.manager())?;
        txn.create_tree(name)
    }

    /// Opens a tree inside `txn`. Returns `None` if no tree has that name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `txn` belongs to another environment.
    pub fn open_tree<'t>(
        &self,
        txn: &'t Transaction<'_>,
        name: &str,
    ) -> CoreResult<Option<Tree<'t>>> {
        self.check_owner(txn.manager())?;
        txn.open_tree(name)
    }

    /// Names of all trees in the latest generation.
    pub fn tree_names(&self) -> CoreResult<Vec<String>> {
        self.read(|txn| txn.tree_names())
    }

    /// Takes a consistent, read-only view across every tree.
    ///
    /// Pages the snapshot references are kept until it is dropped, so long
    /// lived snapshots hold back page reuse.
    pub fn create_snapshot(&self) -> CoreResult<Snapshot<'_>> {
        Ok(Snapshot::new(self.begin_read()?))
    }

    fn check_owner(&self, manager: &TransactionManager) -> CoreResult<()> {
        if std::ptr::eq(manager, &self.manager) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(
                "transaction belongs to a different environment",
            ))
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Flushes the data file and discards the journal.
    ///
    /// Waits for the active write transaction, if any, to finish.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.manager.checkpoint()
    }

    /// Returns a point-in-time summary of the environment.
    pub fn stats(&self) -> CoreResult<EnvironmentStats> {
        self.ensure_open()?;
        EnvironmentStats::collect(&self.manager)
    }

    /// Walks every page reachable from the latest generation and checks it.
    ///
    /// Problems are reported in the returned [`VerifyReport`] rather than as
    /// errors. Any problem also poisons the environment, since the data
    /// file can no longer be trusted for writes.
    ///
    /// # Errors
    ///
    /// Returns an error only if pages cannot be read at all.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        let txn = self.begin_read()?;
        let report = verify::verify(&txn, self.manager.comparer())?;
        if !report.is_ok() {
            self.manager.poison(format!(
                "verification found {} problem(s), first: {}",
                report.issues.len(),
                report.issues.first().map_or("", String::as_str)
            ));
        }
        Ok(report)
    }

    /// What recovery found in the journal when the environment was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Returns the latest committed generation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.manager.current().generation
    }

    /// Returns the reason the environment refuses writes, if it does.
    #[must_use]
    pub fn poisoned(&self) -> Option<String> {
        self.manager.poisoned()
    }

    /// Returns the environment directory, if it has one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(EnvironmentDir::path)
    }

    /// Closes the environment.
    ///
    /// Waits for the active write transaction to finish, then checkpoints.
    /// Open read transactions may keep reading. Every later call to begin a
    /// transaction fails with `EnvironmentClosed`. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        // Lock order: writer, then `is_open`.
        let _writer = self.manager.lock_writer();
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        if self.manager.poisoned().is_none() {
            self.manager.checkpoint_locked()?;
        } else if let Err(err) = self.manager.journal().sync() {
            warn!(error = %err, "journal sync failed while closing a poisoned environment");
        }

        *is_open = false;
        info!(generation = %self.manager.current().generation, "storage environment closed");
        Ok(())
    }

    /// Checks if the environment is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Ensures the environment is open.
    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::EnvironmentClosed)
        }
    }

    /// Returns the environment configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for StorageEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEnvironment")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("generation", &self.generation())
            .field("poisoned", &self.poisoned())
            .finish_non_exhaustive()
    }
}

/// Page size recorded in an existing data file, if it has a header.
fn stored_page_size(path: &Path) -> CoreResult<Option<usize>> {
    let mut prefix = Vec::with_capacity(64);
    File::open(path)?.take(64).read_to_end(&mut prefix)?;
    Ok(EnvironmentHeader::peek_page_size(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Slice;
    use tempfile::tempdir;

    fn create_env() -> StorageEnvironment {
        StorageEnvironment::open_in_memory_with_config(Config::default().page_size(1024)).unwrap()
    }

    fn put(env: &StorageEnvironment, tree: &str, key: &[u8], value: &[u8]) {
        env.write(|txn| txn.create_tree(tree)?.add(key, value)).unwrap();
    }

    fn get(env: &StorageEnvironment, tree: &str, key: &[u8]) -> Option<Vec<u8>> {
        env.read(|txn| match txn.open_tree(tree)? {
            Some(tree) => tree.read(key),
            None => Ok(None),
        })
        .unwrap()
    }

    #[test]
    fn open_in_memory() {
        let env = create_env();
        assert!(env.is_open());
        assert!(env.path().is_none());
        assert_eq!(env.generation(), Generation(1));
        assert!(env.tree_names().unwrap().is_empty());
    }

    #[test]
    fn three_keys_iterate_in_order() {
        let env = create_env();
        env.write(|txn| {
            let mut tree = txn.create_tree("T")?;
            tree.add(b"a", b"1")?;
            tree.add(b"b", b"2")?;
            tree.add(b"c", b"3")?;
            Ok(())
        })
        .unwrap();

        let txn = env.begin_read().unwrap();
        let tree = txn.open_tree("T").unwrap().unwrap();
        let entries: Vec<_> = tree
            .iterate(Slice::BeforeAllKeys, Slice::AfterAllKeys)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
        assert_eq!(tree.state().entries, 3);
    }

    #[test]
    fn write_closure_rolls_back_on_error() {
        let env = create_env();
        put(&env, "t", b"k", b"old");

        let result: CoreResult<()> = env.write(|txn| {
            txn.create_tree("t")?.add(b"k", b"new")?;
            Err(CoreError::invalid_operation("changed my mind"))
        });
        assert!(result.is_err());
        assert_eq!(get(&env, "t", b"k"), Some(b"old".to_vec()));
    }

    #[test]
    fn new_transaction_honours_flags() {
        let env = create_env();
        let mut txn = env.new_transaction(TransactionFlags::ReadWrite).unwrap();
        {
            let writer = txn.as_write().unwrap();
            let mut tree = env.create_tree(writer, "t").unwrap();
            tree.add(b"k", b"v").unwrap();
        }
        txn.as_write().unwrap().commit().unwrap();
        drop(txn);

        let txn = env.new_transaction(TransactionFlags::ReadOnly).unwrap();
        let tree = env.open_tree(&txn, "t").unwrap().unwrap();
        assert_eq!(tree.read(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(env.open_tree(&txn, "missing").unwrap().is_none());
    }

    #[test]
    fn foreign_transactions_are_rejected() {
        let env = create_env();
        let other = create_env();
        let txn = other.new_transaction(TransactionFlags::ReadOnly).unwrap();
        assert!(matches!(
            env.open_tree(&txn, "t"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn close_database() {
        let env = create_env();
        put(&env, "t", b"k", b"v");
        env.close().unwrap();
        assert!(!env.is_open());
        assert!(matches!(env.begin_read(), Err(CoreError::EnvironmentClosed)));
        assert!(matches!(env.begin_write(), Err(CoreError::EnvironmentClosed)));
        env.close().unwrap();
    }

    #[test]
    fn reopen_keeps_committed_data() {
        let dir = tempdir().unwrap();
        let config = Config::default().page_size(1024);
        {
            let env = StorageEnvironment::open_with_config(dir.path(), config.clone()).unwrap();
            put(&env, "t", b"k", b"v");
            env.close().unwrap();
        }
        let env = StorageEnvironment::open_with_config(dir.path(), config).unwrap();
        assert_eq!(get(&env, "t", b"k"), Some(b"v".to_vec()));
        assert_eq!(env.recovery_report().replayed, 0);
    }

    #[test]
    fn reopen_without_close_replays_the_journal() {
        let dir = tempdir().unwrap();
        let config = Config::default().page_size(1024);
        {
            let env = StorageEnvironment::open_with_config(dir.path(), config.clone()).unwrap();
            put(&env, "t", b"k", b"v");
        }
        let env = StorageEnvironment::open_with_config(dir.path(), config).unwrap();
        assert_eq!(env.recovery_report().replayed, 1);
        assert_eq!(get(&env, "t", b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn second_instance_is_locked_out() {
        let dir = tempdir().unwrap();
        let _env = StorageEnvironment::open(dir.path()).unwrap();
        assert!(matches!(
            StorageEnvironment::open(dir.path()),
            Err(CoreError::EnvironmentLocked)
        ));
    }

    #[test]
    fn page_size_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        StorageEnvironment::open_with_config(dir.path(), Config::default().page_size(1024))
            .unwrap()
            .close()
            .unwrap();
        let result =
            StorageEnvironment::open_with_config(dir.path(), Config::default().page_size(4096));
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn existence_flags_are_honoured() {
        let dir = tempdir().unwrap();
        let missing = StorageEnvironment::open_with_config(
            dir.path(),
            Config::default().create_if_missing(false),
        );
        assert!(missing.is_err());

        StorageEnvironment::open(dir.path()).unwrap().close().unwrap();
        let exists = StorageEnvironment::open_with_config(
            dir.path(),
            Config::default().error_if_exists(true),
        );
        assert!(matches!(exists, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn in_memory_pager_needs_no_directory() {
        let dir = tempdir().unwrap();
        let result = StorageEnvironment::open_with_config(
            dir.path(),
            Config::default().pager(PagerKind::InMemory),
        );
        assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));
    }

    #[test]
    fn checkpoint_after_commits() {
        let env = create_env();
        for i in 0..10u8 {
            put(&env, "t", &[i], &[i]);
        }
        assert!(env.stats().unwrap().journal_bytes > 0);
        env.checkpoint().unwrap();
        assert_eq!(env.stats().unwrap().journal_bytes, 0);
        assert_eq!(get(&env, "t", &[7]), Some(vec![7]));
    }

    #[test]
    fn verify_fresh_and_used_environment() {
        let env = create_env();
        assert!(env.verify().unwrap().is_ok());
        for i in 0..200u32 {
            put(&env, "t", &i.to_be_bytes(), &[0u8; 100]);
        }
        let report = env.verify().unwrap();
        assert!(report.is_ok(), "{:?}", report.issues);
        assert_eq!(report.entries, 200);
        assert!(env.poisoned().is_none());
    }
}
