//! On-disk page format.
//!
//! Every page starts with a 16-byte header:
//!
//! ```text
//! +------+----------+---------+----------+-------------+
//! | kind | reserved | count   | crc32    | page number |
//! | u8   | u8       | u16 LE  | u32 LE   | u64 LE      |
//! +------+----------+---------+----------+-------------+
//! ```
//!
//! The checksum covers the whole page (or the whole run, for overflow
//! values) with the checksum field itself read as zero. Storing the page
//! number catches pages written to the wrong place.

pub(crate) mod meta;
pub(crate) mod node;
pub(crate) mod overflow;

use crate::error::{CoreError, CoreResult};
use strata_storage::PageNumber;

/// Size of the common page header.
pub const PAGE_HEADER_SIZE: usize = 16;

const KIND_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 2;
const CRC_OFFSET: usize = 4;
const NUMBER_OFFSET: usize = 8;

/// What a page holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    /// Environment header (page 0).
    Header = 1,
    /// Interior B+Tree node.
    Branch = 2,
    /// B+Tree leaf.
    Leaf = 3,
    /// First page of an overflow run.
    Overflow = 4,
}

impl PageKind {
    /// Converts a byte to a page kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Header),
            2 => Some(Self::Branch),
            3 => Some(Self::Leaf),
            4 => Some(Self::Overflow),
            _ => None,
        }
    }

    /// Converts the page kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Size limits that follow from the page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    page_size: usize,
}

impl Geometry {
    /// Creates the geometry for a page size.
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn page_size(self) -> usize {
        self.page_size
    }

    /// Bytes available for node contents after the header.
    #[must_use]
    pub const fn usable(self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    /// Longest key a tree accepts.
    #[must_use]
    pub const fn max_key_size(self) -> usize {
        self.page_size / 8
    }

    /// Longest value stored inline in a leaf. Longer values go to overflow
    /// pages.
    #[must_use]
    pub const fn max_inline_value(self) -> usize {
        self.page_size / 8
    }

    /// Number of pages an overflow run for a value of `len` bytes needs.
    #[must_use]
    pub const fn overflow_pages(self, len: u64) -> u64 {
        (overflow::OVERFLOW_HEADER_SIZE as u64 + len).div_ceil(self.page_size as u64)
    }
}

/// Computes the checksum of a page or run, skipping the checksum field.
pub(crate) fn checksum(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..CRC_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&buf[CRC_OFFSET + 4..]);
    hasher.finalize()
}

/// Writes the page header into `buf` and stamps its checksum. Must be the
/// last change made to the buffer.
pub(crate) fn seal(buf: &mut [u8], kind: PageKind, count: u16, page: PageNumber) {
    buf[KIND_OFFSET] = kind.as_byte();
    buf[KIND_OFFSET + 1] = 0;
    buf[COUNT_OFFSET..COUNT_OFFSET + 2].copy_from_slice(&count.to_le_bytes());
    buf[NUMBER_OFFSET..NUMBER_OFFSET + 8].copy_from_slice(&page.as_u64().to_le_bytes());
    let crc = checksum(buf);
    buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
}

/// Validates a page header and checksum. Returns the page kind and entry
/// count.
///
/// # Errors
///
/// Returns [`CoreError::PageCorruption`] if the kind is unknown or not
/// `expected`, the stored page number is wrong, or the checksum does not
/// match.
pub(crate) fn verify(
    buf: &[u8],
    page: PageNumber,
    expected: Option<PageKind>,
) -> CoreResult<(PageKind, u16)> {
    if buf.len() < PAGE_HEADER_SIZE {
        return Err(CoreError::page_corruption(page.as_u64(), "short page"));
    }
    let kind = PageKind::from_byte(buf[KIND_OFFSET]).ok_or_else(|| {
        CoreError::page_corruption(
            page.as_u64(),
            format!("unknown page kind {}", buf[KIND_OFFSET]),
        )
    })?;
    if let Some(expected) = expected {
        if kind != expected {
            return Err(CoreError::page_corruption(
                page.as_u64(),
                format!("expected {expected:?} page, found {kind:?}"),
            ));
        }
    }
    let stored_number = read_u64(buf, NUMBER_OFFSET);
    if stored_number != page.as_u64() {
        return Err(CoreError::page_corruption(
            page.as_u64(),
            format!("page claims to be page {stored_number}"),
        ));
    }
    let stored = read_u32(buf, CRC_OFFSET);
    let actual = checksum(buf);
    if stored != actual {
        return Err(CoreError::page_corruption(
            page.as_u64(),
            format!("checksum mismatch: stored {stored:08x}, computed {actual:08x}"),
        ));
    }
    Ok((kind, read_u16(buf, COUNT_OFFSET)))
}

/// Returns true if the buffer has never been written.
pub(crate) fn is_blank(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// A bounds-checked little-endian reader over a byte slice.
///
/// Every accessor returns `None` once the input runs out; the caller turns
/// that into the error that fits its context.
pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| read_u16(b, 0))
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| read_u32(b, 0))
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| read_u64(b, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_page_verifies() {
        let mut buf = vec![0u8; 1024];
        buf[100] = 42;
        seal(&mut buf, PageKind::Leaf, 3, PageNumber(9));

        let (kind, count) = verify(&buf, PageNumber(9), Some(PageKind::Leaf)).unwrap();
        assert_eq!(kind, PageKind::Leaf);
        assert_eq!(count, 3);
    }

    #[test]
    fn flipped_bit_is_detected() {
        let mut buf = vec![0u8; 1024];
        seal(&mut buf, PageKind::Branch, 1, PageNumber(2));
        buf[700] ^= 0x10;
        let err = verify(&buf, PageNumber(2), None).unwrap_err();
        assert!(matches!(err, CoreError::PageCorruption { page: 2, .. }));
    }

    #[test]
    fn misplaced_page_is_detected() {
        let mut buf = vec![0u8; 1024];
        seal(&mut buf, PageKind::Leaf, 0, PageNumber(5));
        assert!(verify(&buf, PageNumber(6), None).is_err());
        assert!(verify(&buf, PageNumber(5), Some(PageKind::Branch)).is_err());
    }

    #[test]
    fn blank_page_has_unknown_kind() {
        let buf = vec![0u8; 1024];
        assert!(is_blank(&buf));
        assert!(verify(&buf, PageNumber(1), None).is_err());
    }

    #[test]
    fn geometry_limits() {
        let g = Geometry::new(4096);
        assert_eq!(g.usable(), 4080);
        assert_eq!(g.max_key_size(), 512);
        assert_eq!(g.max_inline_value(), 512);
        assert_eq!(g.overflow_pages(1), 1);
        assert_eq!(g.overflow_pages(4096 - 24), 1);
        assert_eq!(g.overflow_pages(4096 - 23), 2);
    }

    #[test]
    fn decoder_stops_at_end() {
        let data = [1u8, 0, 2, 0, 0, 0];
        let mut d = Decoder::new(&data, 0);
        assert_eq!(d.u16(), Some(1));
        assert_eq!(d.u32(), Some(2));
        assert_eq!(d.position(), 6);
        assert_eq!(d.u8(), None);
    }
}
