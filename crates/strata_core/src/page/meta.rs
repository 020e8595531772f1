//! The environment header on page 0.

use super::{is_blank, seal, verify, Decoder, PageKind, PAGE_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::tree::TreeState;
use crate::types::{Generation, TransactionId};
use strata_storage::PageNumber;

/// Magic bytes identifying a Strata data file.
pub const HEADER_MAGIC: [u8; 4] = *b"STRT";

/// Current data file format version.
pub const FORMAT_VERSION: u16 = 1;

/// Root state of a committed generation.
///
/// The header names everything a reader needs to find the data of a
/// generation: the catalog of named trees and the free-space tree. Every
/// commit writes a new header through the journal. Readers never read page 0
/// after open; they hold the header of their generation in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHeader {
    /// Page size the file was created with.
    pub page_size: u32,
    /// Generation this header describes.
    pub generation: Generation,
    /// Transaction that produced this generation.
    pub last_txid: TransactionId,
    /// Newest transaction known to be in the data file and synced.
    /// Journal records at or below it are skipped by recovery.
    pub checkpoint_txid: TransactionId,
    /// High-water mark of allocated pages.
    pub next_page: PageNumber,
    /// Tree mapping names to tree states.
    pub catalog: TreeState,
    /// Tree mapping free run start pages to run lengths.
    pub free_space: TreeState,
}

impl EnvironmentHeader {
    /// Header of an environment that has no trees yet.
    #[must_use]
    pub fn empty(page_size: usize) -> Self {
        Self {
            page_size: page_size as u32,
            generation: Generation::default(),
            last_txid: TransactionId::default(),
            checkpoint_txid: TransactionId::default(),
            next_page: PageNumber(1),
            catalog: TreeState::default(),
            free_space: TreeState::default(),
        }
    }

    /// Serializes the header into a sealed page 0 image.
    pub fn encode(&self, page_size: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(page_size);
        buf.resize(PAGE_HEADER_SIZE, 0);
        buf.extend_from_slice(&HEADER_MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.page_size.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&self.generation.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.last_txid.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.checkpoint_txid.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.next_page.as_u64().to_le_bytes());
        self.catalog.encode_into(&mut buf);
        self.free_space.encode_into(&mut buf);
        buf.resize(page_size, 0);
        seal(&mut buf, PageKind::Header, 0, PageNumber::HEADER);
        buf
    }

    /// Parses page 0. Returns `None` for a page that was never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the page is damaged or from an unsupported format.
    pub fn decode(buf: &[u8]) -> CoreResult<Option<Self>> {
        if is_blank(buf) {
            return Ok(None);
        }
        verify(buf, PageNumber::HEADER, Some(PageKind::Header))?;

        let short = || CoreError::invalid_format("header page too short");
        let mut d = Decoder::new(buf, PAGE_HEADER_SIZE);
        if d.take(4).ok_or_else(short)? != HEADER_MAGIC {
            return Err(CoreError::invalid_format("invalid header magic"));
        }
        let version = d.u16().ok_or_else(short)?;
        if version > FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported format version: {version}"
            )));
        }
        let _reserved = d.u16().ok_or_else(short)?;
        let page_size = d.u32().ok_or_else(short)?;
        let _reserved = d.u32().ok_or_else(short)?;
        let generation = Generation(d.u64().ok_or_else(short)?);
        let last_txid = TransactionId(d.u64().ok_or_else(short)?);
        let checkpoint_txid = TransactionId(d.u64().ok_or_else(short)?);
        let next_page = PageNumber(d.u64().ok_or_else(short)?);
        let catalog = TreeState::decode_from(&mut d).ok_or_else(short)?;
        let free_space = TreeState::decode_from(&mut d).ok_or_else(short)?;

        if page_size as usize != buf.len() {
            return Err(CoreError::invalid_format(format!(
                "file uses {page_size}-byte pages, opened with {}-byte pages",
                buf.len()
            )));
        }

        Ok(Some(Self {
            page_size,
            generation,
            last_txid,
            checkpoint_txid,
            next_page,
            catalog,
            free_space,
        }))
    }

    /// Reads the page size a header page was written with, without
    /// validating anything else. Used to detect a page size mismatch before
    /// the checksum (which covers a page of the stored size) can be checked.
    pub(crate) fn peek_page_size(buf: &[u8]) -> Option<usize> {
        let mut d = Decoder::new(buf, PAGE_HEADER_SIZE);
        if d.take(4)? != HEADER_MAGIC {
            return None;
        }
        let _version = d.u16()?;
        let _reserved = d.u16()?;
        Some(d.u32()? as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EnvironmentHeader {
        EnvironmentHeader {
            page_size: 1024,
            generation: Generation(5),
            last_txid: TransactionId(9),
            checkpoint_txid: TransactionId(7),
            next_page: PageNumber(33),
            catalog: TreeState::with_root(PageNumber(3)),
            free_space: TreeState::with_root(PageNumber(4)),
        }
    }

    #[test]
    fn header_round_trips() {
        let header = sample();
        let page = header.encode(1024);
        assert_eq!(page.len(), 1024);
        assert_eq!(EnvironmentHeader::decode(&page).unwrap(), Some(header));
        assert_eq!(EnvironmentHeader::peek_page_size(&page), Some(1024));
    }

    #[test]
    fn blank_page_is_no_header() {
        assert_eq!(EnvironmentHeader::decode(&[0u8; 1024]).unwrap(), None);
    }

    #[test]
    fn damaged_header_is_rejected() {
        let mut page = sample().encode(1024);
        page[40] ^= 0xaa;
        assert!(EnvironmentHeader::decode(&page).is_err());
    }
}
