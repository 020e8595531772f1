//! B+Tree node encoding.
//!
//! Leaf entry:
//!
//! ```text
//! key_len u16 | flags u8 | key | inline: val_len u32, value
//!                              | overflow: first page u64, value len u64
//! ```
//!
//! Branch entry:
//!
//! ```text
//! key_len u16 | key | child u64
//! ```
//!
//! A branch with `n` children stores `n` entries. The first entry's key is
//! always empty: child 0 covers everything below entry 1's key.

use super::{seal, verify, Decoder, PageKind, PAGE_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use strata_storage::PageNumber;

const FLAG_INLINE: u8 = 0;
const FLAG_OVERFLOW: u8 = 1;

/// Where a leaf keeps an entry's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LeafValue {
    Inline(Vec<u8>),
    Overflow { page: PageNumber, len: u64 },
}

impl LeafValue {
    fn encoded_size(&self) -> usize {
        match self {
            Self::Inline(value) => 4 + value.len(),
            Self::Overflow { .. } => 16,
        }
    }

    /// Length of the value in bytes.
    pub(crate) fn len(&self) -> u64 {
        match self {
            Self::Inline(value) => value.len() as u64,
            Self::Overflow { len, .. } => *len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeafEntry {
    pub(crate) key: Vec<u8>,
    pub(crate) value: LeafValue,
}

impl LeafEntry {
    pub(crate) fn encoded_size(&self) -> usize {
        3 + self.key.len() + self.value.encoded_size()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BranchEntry {
    pub(crate) key: Vec<u8>,
    pub(crate) child: PageNumber,
}

impl BranchEntry {
    pub(crate) fn encoded_size(&self) -> usize {
        2 + self.key.len() + 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Leaf(Vec<LeafEntry>),
    Branch(Vec<BranchEntry>),
}

impl Node {
    pub(crate) fn empty_leaf() -> Self {
        Self::Leaf(Vec::new())
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Leaf(entries) => entries.len(),
            Self::Branch(entries) => entries.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    /// Bytes the node occupies on a page, header included.
    pub(crate) fn encoded_size(&self) -> usize {
        PAGE_HEADER_SIZE
            + match self {
                Self::Leaf(entries) => entries.iter().map(LeafEntry::encoded_size).sum::<usize>(),
                Self::Branch(entries) => {
                    entries.iter().map(BranchEntry::encoded_size).sum::<usize>()
                }
            }
    }

    /// Serializes the node into a sealed page image.
    pub(crate) fn encode(&self, page: PageNumber, page_size: usize) -> CoreResult<Vec<u8>> {
        let size = self.encoded_size();
        if size > page_size {
            return Err(CoreError::invariant(format!(
                "node of {size} bytes does not fit a {page_size}-byte page"
            )));
        }
        let count = u16::try_from(self.len())
            .map_err(|_| CoreError::invariant("node has more than 65535 entries"))?;

        let mut buf = Vec::with_capacity(page_size);
        buf.resize(PAGE_HEADER_SIZE, 0);
        let kind = match self {
            Self::Leaf(entries) => {
                for entry in entries {
                    buf.extend_from_slice(&(entry.key.len() as u16).to_le_bytes());
                    match &entry.value {
                        LeafValue::Inline(value) => {
                            buf.push(FLAG_INLINE);
                            buf.extend_from_slice(&entry.key);
                            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
                            buf.extend_from_slice(value);
                        }
                        LeafValue::Overflow { page, len } => {
                            buf.push(FLAG_OVERFLOW);
                            buf.extend_from_slice(&entry.key);
                            buf.extend_from_slice(&page.as_u64().to_le_bytes());
                            buf.extend_from_slice(&len.to_le_bytes());
                        }
                    }
                }
                PageKind::Leaf
            }
            Self::Branch(entries) => {
                for entry in entries {
                    buf.extend_from_slice(&(entry.key.len() as u16).to_le_bytes());
                    buf.extend_from_slice(&entry.key);
                    buf.extend_from_slice(&entry.child.as_u64().to_le_bytes());
                }
                PageKind::Branch
            }
        };
        buf.resize(page_size, 0);
        seal(&mut buf, kind, count, page);
        Ok(buf)
    }

    /// Parses and validates a page image.
    pub(crate) fn decode(buf: &[u8], page: PageNumber) -> CoreResult<Self> {
        let (kind, count) = verify(buf, page, None)?;
        let short = || CoreError::page_corruption(page.as_u64(), "entry runs past end of page");
        let mut d = Decoder::new(buf, PAGE_HEADER_SIZE);
        match kind {
            PageKind::Leaf => {
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key_len = d.u16().ok_or_else(short)? as usize;
                    let flags = d.u8().ok_or_else(short)?;
                    let key = d.take(key_len).ok_or_else(short)?.to_vec();
                    let value = match flags {
                        FLAG_INLINE => {
                            let len = d.u32().ok_or_else(short)? as usize;
                            LeafValue::Inline(d.take(len).ok_or_else(short)?.to_vec())
                        }
                        FLAG_OVERFLOW => LeafValue::Overflow {
                            page: PageNumber(d.u64().ok_or_else(short)?),
                            len: d.u64().ok_or_else(short)?,
                        },
                        other => {
                            return Err(CoreError::page_corruption(
                                page.as_u64(),
                                format!("unknown leaf entry flags {other}"),
                            ))
                        }
                    };
                    entries.push(LeafEntry { key, value });
                }
                Ok(Self::Leaf(entries))
            }
            PageKind::Branch => {
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key_len = d.u16().ok_or_else(short)? as usize;
                    let key = d.take(key_len).ok_or_else(short)?.to_vec();
                    let child = PageNumber(d.u64().ok_or_else(short)?);
                    entries.push(BranchEntry { key, child });
                }
                if entries.is_empty() {
                    return Err(CoreError::page_corruption(page.as_u64(), "branch has no children"));
                }
                Ok(Self::Branch(entries))
            }
            other => Err(CoreError::page_corruption(
                page.as_u64(),
                format!("expected a tree node, found {other:?} page"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> Node {
        Node::Leaf(vec![
            LeafEntry {
                key: b"alpha".to_vec(),
                value: LeafValue::Inline(b"one".to_vec()),
            },
            LeafEntry {
                key: b"beta".to_vec(),
                value: LeafValue::Overflow {
                    page: PageNumber(40),
                    len: 9000,
                },
            },
            LeafEntry {
                key: Vec::new(),
                value: LeafValue::Inline(Vec::new()),
            },
        ])
    }

    #[test]
    fn leaf_encodes_and_decodes() {
        let node = leaf();
        let buf = node.encode(PageNumber(3), 1024).unwrap();
        assert_eq!(buf.len(), 1024);
        assert_eq!(Node::decode(&buf, PageNumber(3)).unwrap(), node);
    }

    #[test]
    fn branch_encodes_and_decodes() {
        let node = Node::Branch(vec![
            BranchEntry {
                key: Vec::new(),
                child: PageNumber(4),
            },
            BranchEntry {
                key: b"m".to_vec(),
                child: PageNumber(5),
            },
        ]);
        let buf = node.encode(PageNumber(6), 1024).unwrap();
        assert_eq!(Node::decode(&buf, PageNumber(6)).unwrap(), node);
    }

    #[test]
    fn encoded_size_matches_bytes_used() {
        let node = leaf();
        // 16 header + (3+5+4+3) + (3+4+16) + (3+0+4+0)
        assert_eq!(node.encoded_size(), 16 + 15 + 23 + 7);
    }

    #[test]
    fn oversized_node_is_rejected() {
        let node = Node::Leaf(vec![LeafEntry {
            key: vec![1; 100],
            value: LeafValue::Inline(vec![2; 2000]),
        }]);
        assert!(node.encode(PageNumber(1), 1024).is_err());
    }

    #[test]
    fn corrupted_node_fails_to_decode() {
        let mut buf = leaf().encode(PageNumber(3), 1024).unwrap();
        buf[20] ^= 0xff;
        assert!(matches!(
            Node::decode(&buf, PageNumber(3)),
            Err(CoreError::PageCorruption { .. })
        ));
    }
}
