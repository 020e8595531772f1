//! Page-image journal for durability and crash recovery.
//!
//! A transaction is durable once its journal record is on disk. The data
//! file is updated afterwards and only synced at checkpoints, so after a
//! crash the journal is the authority: recovery rewrites every page image
//! it holds, in transaction order.
//!
//! ## Files
//!
//! The journal is a sequence of numbered files. Appends go to the newest
//! file; when it reaches the configured size a new file is started.
//! A checkpoint syncs the data file and then deletes every journal file.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | reserved (2) | txid (8) | generation (8) |
//! | page size (4) | page count (4) | body length (8) | crc32 (4) |
//! | page (8) | image (page size) | ... repeated page count times
//! ```
//!
//! ## Recovery Policy
//!
//! - A torn final record of the final file is discarded with a warning and
//!   the file is truncated back to the last complete record
//! - Any other damage is fatal: the environment does not open
//! - Transaction ids must strictly increase across the whole journal
//! - Records at or below the header's checkpoint transaction are skipped

mod reader;
mod record;

pub use record::{JournalRecord, JOURNAL_MAGIC, JOURNAL_VERSION, RECORD_HEADER_SIZE};

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::Mutex;
use reader::{JournalReader, ReadOutcome};
use std::sync::Arc;
use strata_storage::{LogDirectory, LogStorage};

/// What recovery found in the journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Journal files examined.
    pub files: usize,
    /// Records whose pages were written to the data file.
    pub replayed: usize,
    /// Records already covered by the last checkpoint.
    pub skipped: usize,
    /// Bytes of torn tail that were cut off.
    pub torn_bytes: u64,
    /// Newest transaction found in the journal.
    pub last_txid: Option<TransactionId>,
}

/// Appends commit records to the journal files.
pub struct Journal {
    dir: Arc<dyn LogDirectory>,
    file_size: u64,
    sync_on_commit: bool,
    state: Mutex<JournalState>,
}

struct JournalState {
    current: Box<dyn LogStorage>,
    number: u64,
    bytes_since_checkpoint: u64,
    broken: Option<String>,
}

impl Journal {
    /// Replays every record in the directory through `apply`.
    ///
    /// Records with a transaction id at or below `checkpoint` are counted
    /// but not applied. A torn tail is cut off the final file.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is damaged anywhere other than its
    /// tail, or if `apply` fails.
    pub fn recover<F>(
        dir: &dyn LogDirectory,
        page_size: usize,
        checkpoint: TransactionId,
        mut apply: F,
    ) -> CoreResult<RecoveryReport>
    where
        F: FnMut(&JournalRecord) -> CoreResult<()>,
    {
        let numbers = dir.list()?;
        let mut report = RecoveryReport {
            files: numbers.len(),
            ..RecoveryReport::default()
        };

        for (index, &number) in numbers.iter().enumerate() {
            let is_last = index + 1 == numbers.len();
            let mut log = dir.open(number)?;

            let torn = {
                let mut reader = JournalReader::new(log.as_ref(), page_size)?;
                loop {
                    match reader.next_record()? {
                        ReadOutcome::Record(record) => {
                            if let Some(last) = report.last_txid {
                                if record.txid <= last {
                                    return Err(CoreError::journal_corruption(format!(
                                        "{} follows {} in journal file {number}",
                                        record.txid, last
                                    )));
                                }
                            }
                            report.last_txid = Some(record.txid);
                            if record.txid <= checkpoint {
                                report.skipped += 1;
                            } else {
                                apply(&record)?;
                                report.replayed += 1;
                            }
                        }
                        ReadOutcome::End => break None,
                        ReadOutcome::Torn { offset, reason } => {
                            break Some((offset, reader.size(), reason));
                        }
                    }
                }
            };

            if let Some((offset, size, reason)) = torn {
                if !is_last {
                    return Err(CoreError::journal_corruption(format!(
                        "journal file {number} is damaged at offset {offset} but is not the newest file: {reason}"
                    )));
                }
                tracing::warn!(
                    file = number,
                    offset,
                    discarded = size - offset,
                    %reason,
                    "discarding torn journal tail"
                );
                log.truncate(offset)?;
                log.sync()?;
                report.torn_bytes += size - offset;
            }
        }

        Ok(report)
    }

    /// Opens the journal for appending, continuing the newest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or the file
    /// cannot be opened.
    pub fn open(dir: Arc<dyn LogDirectory>, file_size: u64, sync_on_commit: bool) -> CoreResult<Self> {
        let number = dir.list()?.last().copied().unwrap_or(1);
        let current = dir.open(number)?;
        let bytes = current.size()?;
        Ok(Self {
            dir,
            file_size,
            sync_on_commit,
            state: Mutex::new(JournalState {
                current,
                number,
                bytes_since_checkpoint: bytes,
                broken: None,
            }),
        })
    }

    /// Appends a record, syncing it if the journal syncs on commit.
    ///
    /// On failure the partial record is truncated away. If even that fails
    /// the journal refuses all further appends.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written (and synced).
    pub fn append(&self, record: &JournalRecord) -> CoreResult<u64> {
        let bytes = record.encode()?;
        let mut state = self.state.lock();
        if let Some(reason) = &state.broken {
            return Err(CoreError::EnvironmentPoisoned {
                reason: reason.clone(),
            });
        }

        let size = state.current.size()?;
        if size > 0 && size + bytes.len() as u64 > self.file_size {
            self.rotate(&mut state)?;
        }

        let before = state.current.size()?;
        let mut written = state.current.append(&bytes).map(|_| ());
        if written.is_ok() && self.sync_on_commit {
            written = state.current.sync();
        }

        if let Err(err) = written {
            if let Err(cleanup) = state.current.truncate(before) {
                let reason = format!("journal tail could not be cleaned after failed append: {cleanup}");
                tracing::error!(%reason, "journal broken");
                state.broken = Some(reason);
            }
            return Err(err.into());
        }

        state.bytes_since_checkpoint += bytes.len() as u64;
        Ok(bytes.len() as u64)
    }

    fn rotate(&self, state: &mut JournalState) -> CoreResult<()> {
        state.current.sync()?;
        let next = state.number + 1;
        state.current = self.dir.open(next)?;
        state.number = next;
        self.dir.sync()?;
        tracing::debug!(file = next, "rotated journal file");
        Ok(())
    }

    /// Forces everything appended so far to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        self.state.lock().current.sync()?;
        Ok(())
    }

    /// Deletes every journal file and starts a fresh one. Only call after the
    /// data file has been synced.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed or created.
    pub fn reset(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        let numbers = self.dir.list()?;
        let next = numbers.last().copied().unwrap_or(state.number).max(state.number) + 1;
        for number in numbers {
            self.dir.remove(number)?;
        }
        state.current = self.dir.open(next)?;
        state.number = next;
        state.bytes_since_checkpoint = 0;
        self.dir.sync()?;
        Ok(())
    }

    /// Bytes appended since the last reset.
    pub fn bytes_since_checkpoint(&self) -> u64 {
        self.state.lock().bytes_since_checkpoint
    }

    /// Number of the file currently appended to.
    pub fn current_file(&self) -> u64 {
        self.state.lock().number
    }

    /// Number of journal files on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn file_count(&self) -> CoreResult<usize> {
        Ok(self.dir.list()?.len())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Journal")
            .field("file", &state.number)
            .field("bytes_since_checkpoint", &state.bytes_since_checkpoint)
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}
