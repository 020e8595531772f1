//! Journal record format.

use crate::error::{CoreError, CoreResult};
use crate::page::{read_u32, read_u64, Decoder};
use crate::types::{Generation, TransactionId};
use strata_storage::PageNumber;

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SJRN";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Size of the fixed record header.
///
/// magic (4) + version (2) + reserved (2) + txid (8) + generation (8) +
/// page size (4) + page count (4) + body length (8) + crc32 (4)
pub const RECORD_HEADER_SIZE: usize = 44;

const CRC_OFFSET: usize = 40;

/// The page images written by one committed transaction.
///
/// Replaying a record writes each image to its page. Images are complete
/// pages, so replaying the same record twice is harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// Transaction that committed these pages.
    pub txid: TransactionId,
    /// Generation the commit published.
    pub generation: Generation,
    /// Page size of every image.
    pub page_size: u32,
    /// Page images in ascending page order, header page included.
    pub pages: Vec<(PageNumber, Vec<u8>)>,
}

/// Fields of a record header, parsed before the body is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub(crate) version: u16,
    pub(crate) txid: TransactionId,
    pub(crate) generation: Generation,
    pub(crate) page_size: u32,
    pub(crate) page_count: u32,
    pub(crate) body_len: u64,
    pub(crate) crc: u32,
}

impl RecordHeader {
    /// Parses a header. Returns `None` if the magic is wrong.
    pub(crate) fn parse(bytes: &[u8]) -> Option<Self> {
        let mut d = Decoder::new(bytes, 0);
        if d.take(4)? != JOURNAL_MAGIC {
            return None;
        }
        let version = d.u16()?;
        let _reserved = d.u16()?;
        Some(Self {
            version,
            txid: TransactionId(d.u64()?),
            generation: Generation(d.u64()?),
            page_size: d.u32()?,
            page_count: d.u32()?,
            body_len: d.u64()?,
            crc: d.u32()?,
        })
    }

    /// Body length implied by the page count and size.
    pub(crate) fn expected_body_len(&self) -> u64 {
        u64::from(self.page_count) * (8 + u64::from(self.page_size))
    }
}

/// Checksum over a record header (checksum field skipped) and body.
pub(crate) fn record_crc(header: &[u8], body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[..CRC_OFFSET]);
    hasher.update(body);
    hasher.finalize()
}

impl JournalRecord {
    /// Serializes the record.
    ///
    /// # Errors
    ///
    /// Returns an error if an image is not exactly one page long or there
    /// are more pages than the format can count.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let page_size = self.page_size as usize;
        let page_count = u32::try_from(self.pages.len())
            .map_err(|_| CoreError::invalid_operation("too many pages in one commit"))?;
        let body_len = self.pages.len() * (8 + page_size);

        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + body_len);
        buf.extend_from_slice(&JOURNAL_MAGIC);
        buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.txid.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.generation.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.page_size.to_le_bytes());
        buf.extend_from_slice(&page_count.to_le_bytes());
        buf.extend_from_slice(&(body_len as u64).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        for (page, image) in &self.pages {
            if image.len() != page_size {
                return Err(CoreError::invariant(format!(
                    "journal image for {page} has {} bytes, expected {page_size}",
                    image.len()
                )));
            }
            buf.extend_from_slice(&page.as_u64().to_le_bytes());
            buf.extend_from_slice(image);
        }

        let crc = record_crc(&buf[..RECORD_HEADER_SIZE], &buf[RECORD_HEADER_SIZE..]);
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Parses a record whose checksum has already been verified.
    pub(crate) fn from_parts(header: &RecordHeader, body: &[u8]) -> CoreResult<Self> {
        let page_size = header.page_size as usize;
        let stride = 8 + page_size;
        if body.len() as u64 != header.expected_body_len() {
            return Err(CoreError::journal_corruption(format!(
                "record for {} has {} body bytes, expected {}",
                header.txid,
                body.len(),
                header.expected_body_len()
            )));
        }
        let pages = body
            .chunks_exact(stride)
            .map(|chunk| (PageNumber(read_u64(chunk, 0)), chunk[8..].to_vec()))
            .collect();
        Ok(Self {
            txid: header.txid,
            generation: header.generation,
            page_size: header.page_size,
            pages,
        })
    }

    /// Parses and verifies a complete serialized record.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not exactly one valid record.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(CoreError::journal_corruption("record shorter than header"));
        }
        let (head, body) = bytes.split_at(RECORD_HEADER_SIZE);
        let header = RecordHeader::parse(head)
            .ok_or_else(|| CoreError::journal_corruption("invalid record magic"))?;
        let actual = record_crc(head, body);
        if actual != read_u32(head, CRC_OFFSET) {
            return Err(CoreError::ChecksumMismatch {
                expected: header.crc,
                actual,
            });
        }
        Self::from_parts(&header, body)
    }

    /// Size of the serialized record.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.pages.len() * (8 + self.page_size as usize)
    }
}
