//! Ordered iteration over a tree.

use super::ops::{child_index, load_value};
use super::PageSource;
use crate::error::{CoreError, CoreResult};
use crate::page::node::{LeafValue, Node};
use crate::types::{Comparer, Slice};
use std::borrow::Cow;
use std::cmp::Ordering;
use strata_storage::PageNumber;

struct Frame<'t> {
    node: Cow<'t, Node>,
    index: usize,
}

/// A position in a tree, moving forward in key order.
///
/// A cursor keeps the path from the root to its current leaf, so moving to
/// the next leaf means walking up until a branch has a child to the right.
/// It sees exactly the tree version it was created from.
///
/// # Example
///
/// ```ignore
/// let mut cursor = tree.cursor();
/// cursor.seek(&Slice::from(b"m"))?;
/// while let Some(key) = cursor.key() {
///     println!("{:?}", key);
///     cursor.move_next()?;
/// }
/// ```
pub struct Cursor<'t> {
    source: &'t dyn PageSource,
    root: PageNumber,
    comparer: Comparer,
    upper: Slice,
    stack: Vec<Frame<'t>>,
    started: bool,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(
        source: &'t dyn PageSource,
        root: PageNumber,
        comparer: Comparer,
        upper: Slice,
    ) -> Self {
        Self {
            source,
            root,
            comparer,
            upper,
            stack: Vec::new(),
            started: false,
        }
    }

    /// Positions the cursor on the first key at or after `lower`.
    ///
    /// Returns false if there is no such key below the upper bound.
    pub fn seek(&mut self, lower: &Slice) -> CoreResult<bool> {
        self.stack.clear();
        self.started = false;
        let mut page = self.root;
        loop {
            let node = self.source.node(page)?;
            let (index, child) = match node.as_ref() {
                Node::Branch(entries) => {
                    let index = match lower {
                        Slice::BeforeAllKeys => 0,
                        Slice::Key(key) => child_index(entries, self.comparer, key),
                        Slice::AfterAllKeys => entries.len() - 1,
                    };
                    (index, Some(entries[index].child))
                }
                Node::Leaf(entries) => {
                    let index = match lower {
                        Slice::BeforeAllKeys => 0,
                        Slice::Key(key) => entries
                            .partition_point(|e| (self.comparer)(&e.key, key) == Ordering::Less),
                        Slice::AfterAllKeys => entries.len(),
                    };
                    (index, None)
                }
            };
            self.stack.push(Frame { node, index });
            match child {
                Some(child) => page = child,
                None => break,
            }
        }
        self.settle()?;
        Ok(self.is_valid())
    }

    /// Positions the cursor on the first key of the tree.
    pub fn seek_first(&mut self) -> CoreResult<bool> {
        self.seek(&Slice::BeforeAllKeys)
    }

    /// Advances to the next key. Returns false at the end of the range.
    pub fn move_next(&mut self) -> CoreResult<bool> {
        let Some(leaf) = self.stack.last_mut() else {
            return Ok(false);
        };
        leaf.index += 1;
        self.settle()?;
        Ok(self.is_valid())
    }

    /// Moves past exhausted leaves until the top frame points at an entry,
    /// or the stack is empty.
    fn settle(&mut self) -> CoreResult<()> {
        loop {
            match self.stack.last() {
                Some(top) if top.node.is_leaf() && top.index >= top.node.len() => {}
                _ => return Ok(()),
            }
            self.stack.pop();

            // Climb to the first branch with a child to the right.
            let next = loop {
                let Some(top) = self.stack.last_mut() else {
                    return Ok(());
                };
                top.index += 1;
                if top.index < top.node.len() {
                    let Node::Branch(entries) = top.node.as_ref() else {
                        return Err(CoreError::invariant("leaf below the top of a cursor"));
                    };
                    break entries[top.index].child;
                }
                self.stack.pop();
            };
            self.descend_leftmost(next)?;
        }
    }

    fn descend_leftmost(&mut self, mut page: PageNumber) -> CoreResult<()> {
        loop {
            let node = self.source.node(page)?;
            let child = match node.as_ref() {
                Node::Branch(entries) => Some(entries[0].child),
                Node::Leaf(_) => None,
            };
            self.stack.push(Frame { node, index: 0 });
            match child {
                Some(child) => page = child,
                None => return Ok(()),
            }
        }
    }

    fn entry(&self) -> Option<(&[u8], &LeafValue)> {
        let top = self.stack.last()?;
        let Node::Leaf(entries) = top.node.as_ref() else {
            return None;
        };
        let entry = entries.get(top.index)?;
        if self.upper.cmp_key(&entry.key, self.comparer) != Ordering::Less {
            return None;
        }
        Some((entry.key.as_slice(), &entry.value))
    }

    /// Returns true if the cursor is on a key inside its range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.entry().is_some()
    }

    /// Current key.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.entry().map(|(key, _)| key)
    }

    /// Length of the current value, without reading overflow pages.
    #[must_use]
    pub fn value_len(&self) -> Option<u64> {
        self.entry().map(|(_, value)| value.len())
    }

    /// Reads the current value.
    pub fn value(&self) -> CoreResult<Option<Vec<u8>>> {
        self.entry()
            .map(|(_, value)| load_value(self.source, value))
            .transpose()
    }

    /// Current key and value.
    pub fn current(&self) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.entry()
            .map(|(key, value)| Ok((key.to_vec(), load_value(self.source, value)?)))
            .transpose()
    }
}

impl Iterator for Cursor<'_> {
    type Item = CoreResult<(Vec<u8>, Vec<u8>)>;

    /// Yields the entry under the cursor, then advances. The first call
    /// yields the entry the cursor was positioned on.
    fn next(&mut self) -> Option<Self::Item> {
        if self.started {
            if let Err(err) = self.move_next() {
                self.stack.clear();
                return Some(Err(err));
            }
        }
        self.started = true;
        let (key, value) = self.entry()?;
        let key = key.to_vec();
        match load_value(self.source, value) {
            Ok(value) => Some(Ok((key, value))),
            Err(err) => {
                self.stack.clear();
                Some(Err(err))
            }
        }
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("root", &self.root)
            .field("upper", &self.upper)
            .field("key", &self.key())
            .finish()
    }
}
