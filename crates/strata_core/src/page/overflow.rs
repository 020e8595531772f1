//! Overflow runs for large values.
//!
//! A value too large to live in a leaf is written to a run of contiguous
//! pages. Only the first page carries a header; the value length follows it
//! and the value bytes run on through the following pages. The checksum
//! covers the whole run.

use super::{read_u64, seal, verify, PageKind, PAGE_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use strata_storage::PageNumber;

/// Header bytes before the value: page header plus value length.
pub(crate) const OVERFLOW_HEADER_SIZE: usize = PAGE_HEADER_SIZE + 8;

/// Serializes a value into a sealed run of `pages` pages.
pub(crate) fn encode(value: &[u8], first: PageNumber, page_size: usize, pages: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(page_size * pages as usize);
    buf.resize(PAGE_HEADER_SIZE, 0);
    buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    buf.extend_from_slice(value);
    buf.resize(page_size * pages as usize, 0);
    seal(&mut buf, PageKind::Overflow, 0, first);
    buf
}

/// Validates a run and returns the value it holds.
pub(crate) fn decode(run: &[u8], first: PageNumber, expected_len: u64) -> CoreResult<Vec<u8>> {
    verify(run, first, Some(PageKind::Overflow))?;
    let len = read_u64(run, PAGE_HEADER_SIZE);
    if len != expected_len {
        return Err(CoreError::page_corruption(
            first.as_u64(),
            format!("overflow holds {len} bytes, leaf expects {expected_len}"),
        ));
    }
    let end = OVERFLOW_HEADER_SIZE
        .checked_add(len as usize)
        .filter(|&end| end <= run.len())
        .ok_or_else(|| CoreError::page_corruption(first.as_u64(), "overflow length exceeds run"))?;
    Ok(run[OVERFLOW_HEADER_SIZE..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Geometry;

    #[test]
    fn run_spans_pages() {
        let g = Geometry::new(1024);
        let value: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let pages = g.overflow_pages(value.len() as u64);
        assert_eq!(pages, 3);

        let run = encode(&value, PageNumber(10), 1024, pages);
        assert_eq!(run.len(), 3 * 1024);
        assert_eq!(decode(&run, PageNumber(10), 3000).unwrap(), value);
    }

    #[test]
    fn damage_in_later_page_is_detected() {
        let value = vec![7u8; 2000];
        let mut run = encode(&value, PageNumber(4), 1024, 2);
        run[1500] ^= 1;
        assert!(decode(&run, PageNumber(4), 2000).is_err());
    }

    #[test]
    fn length_mismatch_is_detected() {
        let run = encode(&[1, 2, 3], PageNumber(4), 1024, 1);
        assert!(decode(&run, PageNumber(4), 4).is_err());
    }
}
