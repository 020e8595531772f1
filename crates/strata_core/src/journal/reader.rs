//! Sequential journal reading.
//!
//! Records are read one at a time straight from the log, so memory use is
//! bounded by the largest single record rather than the journal size.

use super::record::{record_crc, JournalRecord, RecordHeader, JOURNAL_VERSION, RECORD_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use strata_storage::LogStorage;

/// What the reader found at the current offset.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// A complete, verified record.
    Record(JournalRecord),
    /// Clean end of the log.
    End,
    /// The log ends in a record that was never completely written.
    Torn {
        /// Offset where the incomplete record starts.
        offset: u64,
        /// Why the tail was judged incomplete.
        reason: String,
    },
}

/// Reads the records of one journal file in order.
///
/// # Error Handling
///
/// - A header or body cut short by the end of the file is a torn tail
/// - A checksum mismatch on the final record of the file is a torn tail
/// - A tail of zero bytes (space the file system reserved but never wrote)
///   is a torn tail
/// - Anything else (bad magic, unknown version, wrong page size, checksum
///   mismatch with more records after it) is corruption
pub(crate) struct JournalReader<'a> {
    log: &'a dyn LogStorage,
    size: u64,
    offset: u64,
    page_size: u32,
}

impl<'a> JournalReader<'a> {
    pub(crate) fn new(log: &'a dyn LogStorage, page_size: usize) -> CoreResult<Self> {
        Ok(Self {
            size: log.size()?,
            log,
            offset: 0,
            page_size: page_size as u32,
        })
    }

    /// Size of the log when reading began.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    fn torn(&self, reason: impl Into<String>) -> ReadOutcome {
        ReadOutcome::Torn {
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn tail_is_zero(&self) -> CoreResult<bool> {
        let remaining = (self.size - self.offset) as usize;
        let tail = self.log.read_at(self.offset, remaining)?;
        Ok(tail.iter().all(|&b| b == 0))
    }

    pub(crate) fn next_record(&mut self) -> CoreResult<ReadOutcome> {
        let remaining = self.size - self.offset;
        if remaining == 0 {
            return Ok(ReadOutcome::End);
        }
        if remaining < RECORD_HEADER_SIZE as u64 {
            return Ok(self.torn(format!("{remaining} bytes cannot hold a record header")));
        }

        let head = self.log.read_at(self.offset, RECORD_HEADER_SIZE)?;
        let Some(header) = RecordHeader::parse(&head) else {
            if self.tail_is_zero()? {
                return Ok(self.torn("zero-filled tail"));
            }
            return Err(CoreError::journal_corruption(format!(
                "invalid record magic at offset {}",
                self.offset
            )));
        };

        if header.version > JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(format!(
                "unsupported record version {} at offset {}",
                header.version, self.offset
            )));
        }
        if header.page_size != self.page_size {
            return Err(CoreError::journal_corruption(format!(
                "record at offset {} uses {}-byte pages, environment uses {}",
                self.offset, header.page_size, self.page_size
            )));
        }
        if header.body_len != header.expected_body_len() {
            return Err(CoreError::journal_corruption(format!(
                "record at offset {} declares {} body bytes for {} pages",
                self.offset, header.body_len, header.page_count
            )));
        }

        let end = self.offset + RECORD_HEADER_SIZE as u64 + header.body_len;
        if end > self.size {
            return Ok(self.torn(format!(
                "record for {} needs {} bytes, {} remain",
                header.txid,
                end - self.offset,
                remaining
            )));
        }

        let body = self
            .log
            .read_at(self.offset + RECORD_HEADER_SIZE as u64, header.body_len as usize)?;
        let actual = record_crc(&head, &body);
        if actual != header.crc {
            if end == self.size {
                return Ok(self.torn(format!("checksum mismatch in final record {}", header.txid)));
            }
            return Err(CoreError::ChecksumMismatch {
                expected: header.crc,
                actual,
            });
        }

        let record = JournalRecord::from_parts(&header, &body)?;
        self.offset = end;
        Ok(ReadOutcome::Record(record))
    }
}
