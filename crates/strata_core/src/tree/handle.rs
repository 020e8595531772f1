//! Tree handles.

use super::ops;
use super::{Cursor, PageSource, TreeState};
use crate::error::{CoreError, CoreResult};
use crate::transaction::WriteTransaction;
use crate::types::{Comparer, Slice};
use std::io::{self, Read};

/// A read view of one named tree, as of the transaction it was opened in.
pub struct Tree<'t> {
    source: &'t dyn PageSource,
    name: String,
    state: TreeState,
    comparer: Comparer,
}

impl<'t> Tree<'t> {
    pub(crate) fn new(
        source: &'t dyn PageSource,
        name: impl Into<String>,
        state: TreeState,
        comparer: Comparer,
    ) -> Self {
        Self {
            source,
            name: name.into(),
            state,
            comparer,
        }
    }

    /// Returns the tree name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the root page and counters.
    #[must_use]
    pub fn state(&self) -> TreeState {
        self.state
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.state.entries
    }

    /// Returns true if the tree has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.entries == 0
    }

    /// Reads the value stored under `key`.
    pub fn read(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        ops::lookup(self.source, &self.state, self.comparer, key)?
            .map(|value| ops::load_value(self.source, &value))
            .transpose()
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        Ok(ops::lookup(self.source, &self.state, self.comparer, key)?.is_some())
    }

    /// Opens the value stored under `key` as a byte stream.
    ///
    /// The whole value is loaded before the reader is returned, so
    /// [`ValueReader::len`] is known up front and reads never touch pages.
    pub fn read_stream(&self, key: &[u8]) -> CoreResult<Option<ValueReader>> {
        Ok(self.read(key)?.map(ValueReader::new))
    }

    /// Returns an unpositioned cursor over the whole tree.
    #[must_use]
    pub fn cursor(&self) -> Cursor<'t> {
        Cursor::new(self.source, self.state.root, self.comparer, Slice::AfterAllKeys)
    }

    /// Returns a cursor over `[lower, upper)`, positioned on the first key.
    pub fn iterate(&self, lower: impl Into<Slice>, upper: impl Into<Slice>) -> CoreResult<Cursor<'t>> {
        let mut cursor = Cursor::new(self.source, self.state.root, self.comparer, upper.into());
        cursor.seek(&lower.into())?;
        Ok(cursor)
    }

    /// Returns a cursor over every entry, positioned on the first key.
    pub fn iter(&self) -> CoreResult<Cursor<'t>> {
        self.iterate(Slice::BeforeAllKeys, Slice::AfterAllKeys)
    }
}

impl std::fmt::Debug for Tree<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

/// A writable handle to one named tree inside a write transaction.
///
/// Changes are private to the transaction until it commits.
pub struct TreeMut<'a, 'env> {
    txn: &'a mut WriteTransaction<'env>,
    name: String,
}

impl<'a, 'env> TreeMut<'a, 'env> {
    pub(crate) fn new(txn: &'a mut WriteTransaction<'env>, name: impl Into<String>) -> Self {
        Self {
            txn,
            name: name.into(),
        }
    }

    /// Returns the tree name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries, including this transaction's changes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.txn.tree_entries(&self.name)
    }

    /// Returns true if the tree has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `key`, replacing any existing value.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.txn.tree_add(&self.name, key, value)
    }

    /// Removes `key`. Returns false if it was not present.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<bool> {
        self.txn.tree_delete(&self.name, key)
    }

    /// Stores everything `reader` yields under `key`. Returns the number of
    /// bytes stored.
    ///
    /// The stream is buffered in memory in full before it is written, since
    /// an overflow run is allocated at its final length.
    pub fn add_stream<R: Read>(&mut self, key: &[u8], mut reader: R) -> CoreResult<u64> {
        let mut value = Vec::new();
        reader.read_to_end(&mut value)?;
        self.add(key, &value)?;
        Ok(value.len() as u64)
    }

    /// A read view including this transaction's changes.
    pub fn as_tree(&self) -> CoreResult<Tree<'_>> {
        self.txn
            .open_tree(&self.name)?
            .ok_or_else(|| CoreError::tree_not_found(&self.name))
    }

    /// Returns the tree's current root page and counters.
    pub fn state(&self) -> CoreResult<TreeState> {
        Ok(self.as_tree()?.state())
    }

    /// Reads the value stored under `key`.
    pub fn read(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.as_tree()?.read(key)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        self.as_tree()?.contains(key)
    }

    /// Opens the value stored under `key` as a byte stream.
    pub fn read_stream(&self, key: &[u8]) -> CoreResult<Option<ValueReader>> {
        self.as_tree()?.read_stream(key)
    }

    /// Returns a cursor over `[lower, upper)`.
    pub fn iterate(&self, lower: impl Into<Slice>, upper: impl Into<Slice>) -> CoreResult<Cursor<'_>> {
        self.as_tree()?.iterate(lower, upper)
    }
}

/// A value read as a byte stream.
///
/// Holds the complete value in memory.
#[derive(Debug)]
pub struct ValueReader {
    inner: io::Cursor<Vec<u8>>,
}

impl ValueReader {
    fn new(value: Vec<u8>) -> Self {
        Self {
            inner: io::Cursor::new(value),
        }
    }

    /// Total length of the value.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    /// Returns true if the value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    /// Returns the whole value.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Read for ValueReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
