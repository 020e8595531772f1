//! B+Tree algorithms over a [`PageSource`] or a [`WriteSet`].

use super::{PageSource, TreeState};
use crate::error::{CoreError, CoreResult};
use crate::page::node::{BranchEntry, LeafEntry, LeafValue, Node};
use crate::transaction::WriteSet;
use crate::types::Comparer;
use std::cmp::Ordering;
use strata_storage::PageNumber;

/// Index of the child of a branch that covers `key`.
pub(crate) fn child_index(entries: &[BranchEntry], comparer: Comparer, key: &[u8]) -> usize {
    entries
        .get(1..)
        .map_or(0, |rest| rest.partition_point(|e| comparer(&e.key, key) != Ordering::Greater))
}

fn search_leaf(entries: &[LeafEntry], comparer: Comparer, key: &[u8]) -> Result<usize, usize> {
    entries.binary_search_by(|e| comparer(&e.key, key))
}

fn not_a_branch(page: PageNumber) -> CoreError {
    CoreError::page_corruption(page.as_u64(), "expected a branch on the search path")
}

fn not_a_leaf(page: PageNumber) -> CoreError {
    CoreError::page_corruption(page.as_u64(), "expected a leaf at the bottom of the tree")
}

/// Walks from the root to the leaf that covers `key`.
///
/// Returns the branches passed on the way, with the child index taken in
/// each, and the leaf page.
fn descend(
    source: &dyn PageSource,
    state: &TreeState,
    comparer: Comparer,
    key: &[u8],
) -> CoreResult<(Vec<(PageNumber, usize)>, PageNumber)> {
    let mut path = Vec::with_capacity(state.depth as usize);
    let mut page = state.root;
    for _ in 1..state.depth {
        let node = source.node(page)?;
        let Node::Branch(entries) = node.as_ref() else {
            return Err(not_a_branch(page));
        };
        let index = child_index(entries, comparer, key);
        path.push((page, index));
        page = entries[index].child;
    }
    Ok((path, page))
}

/// Looks up the leaf entry for `key`.
pub(crate) fn lookup(
    source: &dyn PageSource,
    state: &TreeState,
    comparer: Comparer,
    key: &[u8],
) -> CoreResult<Option<LeafValue>> {
    let (_, leaf) = descend(source, state, comparer, key)?;
    let node = source.node(leaf)?;
    let Node::Leaf(entries) = node.as_ref() else {
        return Err(not_a_leaf(leaf));
    };
    Ok(search_leaf(entries, comparer, key)
        .ok()
        .map(|i| entries[i].value.clone()))
}

/// Materializes a leaf value, reading its overflow run if it has one.
pub(crate) fn load_value(source: &dyn PageSource, value: &LeafValue) -> CoreResult<Vec<u8>> {
    match value {
        LeafValue::Inline(bytes) => Ok(bytes.clone()),
        LeafValue::Overflow { page, len } => Ok(source.overflow(*page, *len)?.into_owned()),
    }
}

/// Creates an empty tree: a single empty leaf.
pub(crate) fn create(ws: &mut WriteSet) -> CoreResult<TreeState> {
    let root = ws.insert_node(Node::empty_leaf())?;
    Ok(TreeState::with_root(root))
}

/// Rejects keys the tree cannot store. Checked before anything is modified.
pub(crate) fn check_key(ws: &WriteSet, key: &[u8]) -> CoreResult<()> {
    let max = ws.geometry().max_key_size();
    if key.len() > max {
        return Err(CoreError::KeyTooLarge {
            size: key.len(),
            max,
        });
    }
    Ok(())
}

/// Splits the node on `page` if it no longer fits a page. Returns the
/// separator and the new right sibling.
fn split_if_needed(
    ws: &mut WriteSet,
    state: &mut TreeState,
    page: PageNumber,
    appended: bool,
) -> CoreResult<Option<(Vec<u8>, PageNumber)>> {
    let page_size = ws.geometry().page_size();
    let node = ws.node_mut(page)?;
    if node.encoded_size() <= page_size {
        return Ok(None);
    }

    let (separator, right) = match node {
        Node::Leaf(entries) => {
            let sizes: Vec<usize> = entries.iter().map(LeafEntry::encoded_size).collect();
            let at = split_point(&sizes, appended);
            let right = entries.split_off(at);
            (right[0].key.clone(), Node::Leaf(right))
        }
        Node::Branch(entries) => {
            let sizes: Vec<usize> = entries.iter().map(BranchEntry::encoded_size).collect();
            let at = split_point(&sizes, appended);
            let mut right = entries.split_off(at);
            let separator = std::mem::take(&mut right[0].key);
            (separator, Node::Branch(right))
        }
    };

    if right.is_leaf() {
        state.leaf_pages += 1;
    } else {
        state.branch_pages += 1;
    }
    let right_page = ws.insert_node(right)?;
    Ok(Some((separator, right_page)))
}

/// Where to split a node whose entries have the given encoded sizes.
///
/// The left half gets the shortest prefix holding at least half the bytes.
/// After an append at the right edge the left page keeps everything but the
/// new entry. Both halves are non-empty.
fn split_point(sizes: &[usize], appended: bool) -> usize {
    let last = sizes.len() - 1;
    if appended {
        return last;
    }
    let total: usize = sizes.iter().sum();
    let mut running = 0;
    for (i, size) in sizes.iter().enumerate() {
        running += size;
        if running * 2 >= total {
            return (i + 1).clamp(1, last);
        }
    }
    last
}

/// Inserts or replaces `key`.
pub(crate) fn insert(
    ws: &mut WriteSet,
    state: &mut TreeState,
    comparer: Comparer,
    key: &[u8],
    value: &[u8],
) -> CoreResult<()> {
    check_key(ws, key)?;
    let (path, leaf) = descend(&*ws, state, comparer, key)?;

    let value = if value.len() > ws.geometry().max_inline_value() {
        let (page, pages) = ws.write_overflow(value.to_vec())?;
        state.overflow_pages += pages;
        LeafValue::Overflow {
            page,
            len: value.len() as u64,
        }
    } else {
        LeafValue::Inline(value.to_vec())
    };

    let leaf = ws.writable(leaf)?;
    let (old, appended) = {
        let Node::Leaf(entries) = ws.node_mut(leaf)? else {
            return Err(not_a_leaf(leaf));
        };
        match search_leaf(entries, comparer, key) {
            Ok(i) => (Some(std::mem::replace(&mut entries[i].value, value)), false),
            Err(i) => {
                entries.insert(
                    i,
                    LeafEntry {
                        key: key.to_vec(),
                        value,
                    },
                );
                (None, i + 1 == entries.len())
            }
        }
    };
    match old {
        Some(LeafValue::Overflow { page, len }) => {
            ws.free_overflow(page, len)?;
            state.overflow_pages -= ws.geometry().overflow_pages(len);
        }
        Some(LeafValue::Inline(_)) => {}
        None => state.entries += 1,
    }

    let mut split = split_if_needed(ws, state, leaf, appended)?;
    let mut child = leaf;
    for (parent, index) in path.into_iter().rev() {
        let parent = ws.writable(parent)?;
        let appended = {
            let Node::Branch(entries) = ws.node_mut(parent)? else {
                return Err(not_a_branch(parent));
            };
            entries[index].child = child;
            split.take().map(|(key, right)| {
                entries.insert(index + 1, BranchEntry { key, child: right });
                index + 2 == entries.len()
            })
        };
        if let Some(appended) = appended {
            split = split_if_needed(ws, state, parent, appended)?;
        }
        child = parent;
    }

    state.root = child;
    if let Some((key, right)) = split {
        state.root = ws.insert_node(Node::Branch(vec![
            BranchEntry {
                key: Vec::new(),
                child,
            },
            BranchEntry { key, child: right },
        ]))?;
        state.branch_pages += 1;
        state.depth += 1;
    }
    Ok(())
}

/// Removes `key`. Returns false if it was not present.
///
/// Pages are never merged. A leaf left empty is unlinked from its parent
/// (unless it is the root), branches left without children are unlinked in
/// turn, and a root branch with a single child is replaced by that child.
pub(crate) fn remove(
    ws: &mut WriteSet,
    state: &mut TreeState,
    comparer: Comparer,
    key: &[u8],
) -> CoreResult<bool> {
    let (path, leaf) = descend(&*ws, state, comparer, key)?;
    {
        let node = ws.node(leaf)?;
        let Node::Leaf(entries) = node.as_ref() else {
            return Err(not_a_leaf(leaf));
        };
        if search_leaf(entries, comparer, key).is_err() {
            return Ok(false);
        }
    }

    let leaf = ws.writable(leaf)?;
    let (removed, now_empty) = {
        let Node::Leaf(entries) = ws.node_mut(leaf)? else {
            return Err(not_a_leaf(leaf));
        };
        let index = search_leaf(entries, comparer, key)
            .map_err(|_| CoreError::invariant("key vanished from copied leaf"))?;
        let removed = entries.remove(index);
        (removed, entries.is_empty())
    };
    state.entries -= 1;
    if let LeafValue::Overflow { page, len } = removed.value {
        ws.free_overflow(page, len)?;
        state.overflow_pages -= ws.geometry().overflow_pages(len);
    }

    let mut unlinked = now_empty && !path.is_empty();
    if unlinked {
        ws.free_node(leaf)?;
        state.leaf_pages -= 1;
    }

    let mut child = leaf;
    for (parent, index) in path.into_iter().rev() {
        let parent = ws.writable(parent)?;
        let parent_empty = {
            let Node::Branch(entries) = ws.node_mut(parent)? else {
                return Err(not_a_branch(parent));
            };
            if unlinked {
                entries.remove(index);
                if index == 0 {
                    if let Some(first) = entries.first_mut() {
                        first.key.clear();
                    }
                }
            } else {
                entries[index].child = child;
            }
            entries.is_empty()
        };
        unlinked = parent_empty;
        if parent_empty {
            ws.free_node(parent)?;
            state.branch_pages -= 1;
        }
        child = parent;
    }

    if unlinked {
        // Every page of the tree was unlinked.
        *state = TreeState {
            entries: state.entries,
            ..create(ws)?
        };
        return Ok(true);
    }

    state.root = child;
    loop {
        let only_child = {
            let node = ws.node(state.root)?;
            match node.as_ref() {
                Node::Branch(entries) if entries.len() == 1 => Some(entries[0].child),
                _ => None,
            }
        };
        let Some(only_child) = only_child else { break };
        ws.free_node(state.root)?;
        state.root = only_child;
        state.branch_pages -= 1;
        state.depth -= 1;
    }
    Ok(true)
}

/// Frees every page of a tree.
pub(crate) fn release_all(ws: &mut WriteSet, state: &TreeState) -> CoreResult<()> {
    let mut stack = vec![state.root];
    while let Some(page) = stack.pop() {
        let overflow: Vec<(PageNumber, u64)> = {
            let node = ws.node(page)?;
            match node.as_ref() {
                Node::Branch(entries) => {
                    stack.extend(entries.iter().map(|e| e.child));
                    Vec::new()
                }
                Node::Leaf(entries) => entries
                    .iter()
                    .filter_map(|e| match e.value {
                        LeafValue::Overflow { page, len } => Some((page, len)),
                        LeafValue::Inline(_) => None,
                    })
                    .collect(),
            }
        };
        for (first, len) in overflow {
            ws.free_overflow(first, len)?;
        }
        ws.free_node(page)?;
    }
    Ok(())
}
