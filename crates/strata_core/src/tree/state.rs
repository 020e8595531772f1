//! Per-tree bookkeeping.

use crate::error::{CoreError, CoreResult};
use crate::page::Decoder;
use strata_storage::PageNumber;

/// Encoded size of a [`TreeState`].
pub(crate) const TREE_STATE_SIZE: usize = 48;

/// Root pointer and counters of one B+Tree.
///
/// A tree's state is a value: committing a transaction writes the new state
/// into the catalog, and readers keep whichever state their snapshot saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeState {
    /// Root page.
    pub root: PageNumber,
    /// Number of key/value entries.
    pub entries: u64,
    /// Levels from root to leaf; a lone leaf root has depth 1.
    pub depth: u32,
    /// Interior pages.
    pub branch_pages: u64,
    /// Leaf pages.
    pub leaf_pages: u64,
    /// Pages held by overflow values.
    pub overflow_pages: u64,
}

impl TreeState {
    /// State of a tree consisting of one empty leaf.
    #[must_use]
    pub const fn with_root(root: PageNumber) -> Self {
        Self {
            root,
            entries: 0,
            depth: 1,
            branch_pages: 0,
            leaf_pages: 1,
            overflow_pages: 0,
        }
    }

    /// Total pages the tree occupies.
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.branch_pages + self.leaf_pages + self.overflow_pages
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.root.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.entries.to_le_bytes());
        buf.extend_from_slice(&self.depth.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&self.branch_pages.to_le_bytes());
        buf.extend_from_slice(&self.leaf_pages.to_le_bytes());
        buf.extend_from_slice(&self.overflow_pages.to_le_bytes());
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TREE_STATE_SIZE);
        self.encode_into(&mut buf);
        buf
    }

    pub(crate) fn decode_from(d: &mut Decoder<'_>) -> Option<Self> {
        let root = PageNumber(d.u64()?);
        let entries = d.u64()?;
        let depth = d.u32()?;
        let _reserved = d.u32()?;
        Some(Self {
            root,
            entries,
            depth,
            branch_pages: d.u64()?,
            leaf_pages: d.u64()?,
            overflow_pages: d.u64()?,
        })
    }

    pub(crate) fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() != TREE_STATE_SIZE {
            return Err(CoreError::invariant(format!(
                "tree state record has {} bytes, expected {TREE_STATE_SIZE}",
                data.len()
            )));
        }
        Self::decode_from(&mut Decoder::new(data, 0))
            .ok_or_else(|| CoreError::invariant("truncated tree state"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tree_is_one_leaf() {
        let state = TreeState::with_root(PageNumber(7));
        assert_eq!(state.depth, 1);
        assert_eq!(state.page_count(), 1);
        assert_eq!(state.entries, 0);
    }

    #[test]
    fn state_survives_encoding() {
        let state = TreeState {
            root: PageNumber(12),
            entries: 1000,
            depth: 3,
            branch_pages: 4,
            leaf_pages: 40,
            overflow_pages: 9,
        };
        let bytes = state.encode();
        assert_eq!(bytes.len(), TREE_STATE_SIZE);
        assert_eq!(TreeState::decode(&bytes).unwrap(), state);
        assert!(TreeState::decode(&bytes[1..]).is_err());
    }
}
