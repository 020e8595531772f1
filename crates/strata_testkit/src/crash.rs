//! Crash recovery testing for Strata.
//!
//! This module simulates crashes at various points of the commit and
//! checkpoint protocol and verifies that the environment recovers to the
//! last committed state.
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - committed data must survive
//! 2. **Crash before commit** - uncommitted data must be discarded
//! 3. **Crash while applying pages** - the journal replays the commit
//! 4. **Crash with a torn journal tail** - the torn commit is dropped
//! 5. **Crash during checkpoint** - nothing committed is lost
//!
//! A crash is modelled by [`CrashablePager::crash`]: every page written
//! since the last successful sync goes back to its previous contents, as
//! if the writes never reached the disk.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{Config, CoreError, CoreResult, StorageEnvironment};
use strata_storage::{
    LogDirectory, MemoryLogDirectory, MemoryPager, PageNumber, Pager, StorageError, StorageResult,
};

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash after the journal record was synced and the pages applied.
    AfterCommit,
    /// Crash while a write transaction is still open.
    BeforeCommit,
    /// Crash partway through writing a commit's pages to the data file.
    DuringApply,
    /// Crash partway through appending a journal record.
    DuringJournalAppend,
    /// Crash while syncing the data file for a checkpoint.
    DuringCheckpoint,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Where the crash was injected.
    pub point: CrashPoint,
    /// Expected entries after recovery.
    pub expected_entries: usize,
    /// Actual entries after recovery.
    pub actual_entries: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, point: CrashPoint, entries: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            point,
            expected_entries: entries,
            actual_entries: entries,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(
        description: &str,
        point: CrashPoint,
        expected: usize,
        actual: usize,
        error: &str,
    ) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            point,
            expected_entries: expected,
            actual_entries: actual,
            error: Some(error.to_string()),
        }
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, format!("simulated crash during {what}")))
}

/// A pager wrapper that can simulate crashes.
///
/// Writes go straight to the inner pager, but the previous contents of
/// every page written since the last sync are kept so that
/// [`crash`](Self::crash) can put them back.
pub struct CrashablePager {
    inner: Arc<dyn Pager>,
    writes_left: AtomicU64,
    fail_on_sync: AtomicBool,
    crashed: AtomicBool,
    /// Pre-images of pages written since the last sync.
    unsynced: Mutex<BTreeMap<u64, Vec<u8>>>,
}

impl CrashablePager {
    /// Creates a crashable pager wrapping an inner pager.
    pub fn new(inner: Arc<dyn Pager>) -> Self {
        Self {
            inner,
            writes_left: AtomicU64::new(u64::MAX),
            fail_on_sync: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            unsynced: Mutex::new(BTreeMap::new()),
        }
    }

    /// Creates a crashable pager over a fresh in-memory pager.
    pub fn in_memory(page_size: usize) -> Self {
        Self::new(Arc::new(MemoryPager::new(page_size)))
    }

    /// Lets `writes` more page writes succeed, then fails every write.
    pub fn crash_after_writes(&self, writes: u64) {
        self.writes_left.store(writes, Ordering::SeqCst);
    }

    /// Sets whether sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether an injected failure has fired.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Number of pages written since the last successful sync.
    pub fn unsynced_pages(&self) -> usize {
        self.unsynced.lock().len()
    }

    /// Loses every write since the last successful sync and clears the
    /// injected failures.
    pub fn crash(&self) -> StorageResult<()> {
        let lost = std::mem::take(&mut *self.unsynced.lock());
        for (page, image) in lost {
            self.inner.write(PageNumber(page), &image)?;
        }
        self.reset();
        Ok(())
    }

    /// Clears the injected failures without losing anything.
    pub fn reset(&self) {
        self.writes_left.store(u64::MAX, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }
}

impl Pager for CrashablePager {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn capacity(&self) -> u64 {
        self.inner.capacity()
    }

    fn next_page(&self) -> PageNumber {
        self.inner.next_page()
    }

    fn set_next_page(&self, next: PageNumber) -> StorageResult<()> {
        self.inner.set_next_page(next)
    }

    fn ensure(&self, min_pages: u64) -> StorageResult<()> {
        self.inner.ensure(min_pages)
    }

    fn read(&self, page: PageNumber) -> StorageResult<Vec<u8>> {
        self.inner.read(page)
    }

    fn write(&self, page: PageNumber, data: &[u8]) -> StorageResult<()> {
        let allowed = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("page write"));
        }

        {
            let mut unsynced = self.unsynced.lock();
            if !unsynced.contains_key(&page.as_u64()) {
                unsynced.insert(page.as_u64(), self.inner.read(page)?);
            }
        }
        self.inner.write(page, data)
    }

    fn sync(&self) -> StorageResult<()> {
        if self.fail_on_sync.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("sync"));
        }
        self.inner.sync()?;
        self.unsynced.lock().clear();
        Ok(())
    }
}

impl std::fmt::Debug for CrashablePager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashablePager")
            .field("page_size", &self.inner.page_size())
            .field("unsynced_pages", &self.unsynced_pages())
            .field("crashed", &self.has_crashed())
            .finish()
    }
}

const TREE: &str = "crash";

/// Test harness for crash recovery scenarios.
///
/// Every scenario runs against a fresh in-memory data file and journal,
/// so the harness needs no directory.
pub struct CrashRecoveryHarness {
    config: Config,
    pager: Arc<CrashablePager>,
    journal: MemoryLogDirectory,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness with small pages and no automatic checkpoints.
    pub fn new() -> Self {
        Self::with_config(Config::default().page_size(1024).checkpoint_threshold(0))
    }

    /// Creates a harness with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let pager = Arc::new(CrashablePager::in_memory(config.page_size));
        Self {
            config,
            pager,
            journal: MemoryLogDirectory::new(),
            results: Vec::new(),
        }
    }

    /// The pager under test.
    pub fn pager(&self) -> &Arc<CrashablePager> {
        &self.pager
    }

    /// The journal under test.
    pub fn journal(&self) -> &MemoryLogDirectory {
        &self.journal
    }

    /// Opens an environment over the harness storage, recovering whatever
    /// the last crash left behind.
    pub fn open(&self) -> CoreResult<StorageEnvironment> {
        let pager: Arc<dyn Pager> = Arc::clone(&self.pager) as Arc<dyn Pager>;
        StorageEnvironment::open_with_storage(
            self.config.clone(),
            pager,
            Arc::new(self.journal.clone()),
        )
    }

    /// Drops `env` without closing it, loses unsynced pages and reopens.
    pub fn crash_and_reopen(&self, env: StorageEnvironment) -> CoreResult<StorageEnvironment> {
        drop(env);
        self.pager.crash().map_err(CoreError::from)?;
        self.open()
    }

    /// Starts over with empty storage.
    fn fresh(&mut self) -> CoreResult<StorageEnvironment> {
        self.pager = Arc::new(CrashablePager::in_memory(self.config.page_size));
        self.journal = MemoryLogDirectory::new();
        self.open()
    }

    fn record(&mut self, result: CrashRecoveryResult) -> CrashRecoveryResult {
        self.results.push(result.clone());
        result
    }

    fn judge(
        &mut self,
        description: &str,
        point: CrashPoint,
        expected: usize,
        outcome: CoreResult<usize>,
    ) -> CrashRecoveryResult {
        let result = match outcome {
            Ok(actual) if actual == expected => CrashRecoveryResult::pass(description, point, actual),
            Ok(actual) => CrashRecoveryResult::fail(
                description,
                point,
                expected,
                actual,
                "recovered entry count differs",
            ),
            Err(err) => {
                CrashRecoveryResult::fail(description, point, expected, 0, &err.to_string())
            }
        };
        self.record(result)
    }

    /// Tests that committed data survives a crash.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let env = self.fresh()?;
            for i in 0..10u32 {
                put(&env, i, &[i as u8; 100])?;
            }
            let env = self.crash_and_reopen(env)?;
            check_entries(&env, 0..10)
        })();
        self.judge("Committed data survives crash", CrashPoint::AfterCommit, 10, outcome)
    }

    /// Tests that uncommitted data is discarded after a crash.
    pub fn test_uncommitted_data_discarded(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let env = self.fresh()?;
            put(&env, 0, b"committed")?;
            let mut txn = env.begin_write()?;
            {
                let mut tree = txn.create_tree(TREE)?;
                for i in 1..50u32 {
                    tree.add(&i.to_be_bytes(), b"uncommitted")?;
                }
            }
            // Abandoned without commit.
            drop(txn);
            let env = self.crash_and_reopen(env)?;
            count(&env)
        })();
        self.judge("Uncommitted data discarded", CrashPoint::BeforeCommit, 1, outcome)
    }

    /// Tests that a commit interrupted while applying its pages is replayed.
    pub fn test_crash_during_apply(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let env = self.fresh()?;
            put(&env, 0, b"first")?;
            self.pager.crash_after_writes(1);
            let failed = put(&env, 1, b"second").is_err();
            let poisoned = env.poisoned().is_some();
            if !failed || !poisoned {
                return Err(CoreError::invariant(
                    "interrupted apply did not fail and poison the environment",
                ));
            }
            let env = self.crash_and_reopen(env)?;
            if env.recovery_report().replayed != 2 {
                return Err(CoreError::invariant("expected both commits to replay"));
            }
            check_entries(&env, 0..2)
        })();
        self.judge("Interrupted apply replays from journal", CrashPoint::DuringApply, 2, outcome)
    }

    /// Tests that a torn journal record is dropped and earlier ones kept.
    pub fn test_torn_journal_tail(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let env = self.fresh()?;
            put(&env, 0, b"kept")?;
            put(&env, 1, b"torn")?;
            drop(env);
            tear_newest_log(&self.journal, 7)?;
            // Both commits are lost from the data file; only the first
            // survives in the journal.
            self.pager.crash().map_err(CoreError::from)?;
            let env = self.open()?;
            count(&env)
        })();
        self.judge("Torn journal tail discarded", CrashPoint::DuringJournalAppend, 1, outcome)
    }

    /// Tests that a failed checkpoint loses nothing.
    pub fn test_crash_during_checkpoint(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let env = self.fresh()?;
            for i in 0..20u32 {
                put(&env, i, b"value")?;
            }
            self.pager.set_fail_on_sync(true);
            if env.checkpoint().is_ok() {
                return Err(CoreError::invariant("checkpoint ignored a failed sync"));
            }
            let env = self.crash_and_reopen(env)?;
            check_entries(&env, 0..20)
        })();
        self.judge("Failed checkpoint loses nothing", CrashPoint::DuringCheckpoint, 20, outcome)
    }

    /// Tests that deletes are recovered like any other change.
    pub fn test_delete_survives_crash(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let env = self.fresh()?;
            for i in 0..10u32 {
                put(&env, i, b"value")?;
            }
            env.checkpoint()?;
            env.write(|txn| {
                let mut tree = txn.create_tree(TREE)?;
                for i in 0..5u32 {
                    tree.delete(&i.to_be_bytes())?;
                }
                Ok(())
            })?;
            let env = self.crash_and_reopen(env)?;
            check_entries(&env, 5..10)
        })();
        self.judge("Delete survives crash", CrashPoint::AfterCommit, 5, outcome)
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        self.results.clear();

        self.test_committed_data_survives();
        self.test_uncommitted_data_discarded();
        self.test_crash_during_apply();
        self.test_torn_journal_tail();
        self.test_crash_during_checkpoint();
        self.test_delete_survives_crash();

        self.results.clone()
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let total = self.results.len();

        let mut summary = format!(
            "\n=== Crash Recovery Test Summary ===\n\
             Passed: {passed}/{total}\n\n"
        );

        for result in &self.results {
            let status = if result.passed { "ok  " } else { "FAIL" };
            summary.push_str(&format!(
                "{status} {} ({:?})\n  Expected: {} entries, Actual: {} entries\n",
                result.description, result.point, result.expected_entries, result.actual_entries
            ));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  Error: {error}\n"));
            }
        }

        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn put(env: &StorageEnvironment, i: u32, value: &[u8]) -> CoreResult<()> {
    env.write(|txn| txn.create_tree(TREE)?.add(&i.to_be_bytes(), value))
}

fn count(env: &StorageEnvironment) -> CoreResult<usize> {
    env.read(|txn| match txn.open_tree(TREE)? {
        Some(tree) => Ok(tree.len() as usize),
        None => Ok(0),
    })
}

/// Counts the keys of `range` present in the tree, failing if any other
/// key is found.
fn check_entries(env: &StorageEnvironment, range: std::ops::Range<u32>) -> CoreResult<usize> {
    env.read(|txn| {
        let Some(tree) = txn.open_tree(TREE)? else {
            return Ok(0);
        };
        let mut found = 0;
        for entry in tree.iter()? {
            let (key, _) = entry?;
            let key = u32::from_be_bytes(
                key.try_into()
                    .map_err(|_| CoreError::invariant("unexpected key length"))?,
            );
            if !range.contains(&key) {
                return Err(CoreError::invariant(format!("unexpected key {key}")));
            }
            found += 1;
        }
        Ok(found)
    })
}

/// Cuts `bytes` off the end of the newest journal file.
pub fn tear_newest_log(journal: &MemoryLogDirectory, bytes: usize) -> CoreResult<()> {
    let newest = journal
        .list()?
        .last()
        .copied()
        .ok_or_else(|| CoreError::invariant("journal has no files"))?;
    let log = journal
        .log(newest)
        .ok_or_else(|| CoreError::invariant("journal file vanished"))?;
    let mut data = log.data();
    data.truncate(data.len().saturating_sub(bytes));
    log.set_data(data);
    Ok(())
}
