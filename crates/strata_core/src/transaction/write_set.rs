//! Private pages of a write transaction.

use crate::error::{CoreError, CoreResult};
use crate::freespace::{FreeSpace, PageRun};
use crate::page::node::Node;
use crate::page::{overflow, Geometry};
use crate::tree::PageSource;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_storage::{PageNumber, Pager};

/// Committed pages, read straight from the pager.
#[derive(Clone)]
pub(crate) struct PagerView {
    pager: Arc<dyn Pager>,
    geometry: Geometry,
}

impl PagerView {
    pub(crate) fn new(pager: Arc<dyn Pager>) -> Self {
        let geometry = Geometry::new(pager.page_size());
        Self { pager, geometry }
    }

    pub(crate) fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub(crate) fn pager(&self) -> &Arc<dyn Pager> {
        &self.pager
    }
}

impl PageSource for PagerView {
    fn node(&self, page: PageNumber) -> CoreResult<Cow<'_, Node>> {
        let buf = self.pager.read(page).map_err(CoreError::from_storage)?;
        Ok(Cow::Owned(Node::decode(&buf, page)?))
    }

    fn overflow(&self, page: PageNumber, len: u64) -> CoreResult<Cow<'_, [u8]>> {
        let count = self.geometry.overflow_pages(len);
        let run = self
            .pager
            .read_run(page, count)
            .map_err(CoreError::from_storage)?;
        Ok(Cow::Owned(overflow::decode(&run, page, len)?))
    }
}

/// A page written by the transaction but not yet committed.
#[derive(Debug)]
pub(crate) enum DirtyPage {
    Node(Node),
    /// Value bytes of an overflow run starting at this page.
    Overflow(Vec<u8>),
}

/// Pages allocated, modified and freed by one write transaction.
///
/// Committed pages are never written in place: [`WriteSet::writable`]
/// copies a committed node to a fresh page and queues the old page to be
/// freed once no reader can reach it. Fresh pages belong to this
/// transaction alone and are modified in memory until commit.
pub(crate) struct WriteSet {
    view: PagerView,
    dirty: HashMap<PageNumber, DirtyPage>,
    /// First pages of runs allocated by this transaction.
    fresh: HashSet<PageNumber>,
    /// Pages this transaction may reuse.
    allocator: FreeSpace,
    /// Committed runs this transaction superseded.
    freed: Vec<PageRun>,
    /// Allocate only from the pager high-water mark. Set while the
    /// free-space tree is being rewritten, so that recording the free set
    /// does not consume it.
    fresh_only: bool,
}

impl WriteSet {
    pub(crate) fn new(view: PagerView, allocator: FreeSpace) -> Self {
        Self {
            view,
            dirty: HashMap::new(),
            fresh: HashSet::new(),
            allocator,
            freed: Vec::new(),
            fresh_only: false,
        }
    }

    pub(crate) fn geometry(&self) -> Geometry {
        self.view.geometry()
    }

    pub(crate) fn allocator(&self) -> &FreeSpace {
        &self.allocator
    }

    pub(crate) fn freed(&self) -> &[PageRun] {
        &self.freed
    }

    pub(crate) fn set_fresh_only(&mut self, fresh_only: bool) {
        self.fresh_only = fresh_only;
    }

    #[cfg(test)]
    pub(crate) fn dirty_pages(&self) -> usize {
        self.dirty.len()
    }

    fn allocate(&mut self, count: u64) -> CoreResult<PageNumber> {
        if !self.fresh_only {
            if let Some(page) = self.allocator.allocate(count) {
                return Ok(page);
            }
        }
        self.view
            .pager
            .allocate(count)
            .map_err(CoreError::from_storage)
    }

    /// Places a node on a newly allocated page.
    pub(crate) fn insert_node(&mut self, node: Node) -> CoreResult<PageNumber> {
        let page = self.allocate(1)?;
        self.dirty.insert(page, DirtyPage::Node(node));
        self.fresh.insert(page);
        Ok(page)
    }

    /// Returns a page holding a modifiable copy of the node on `page`.
    ///
    /// Fresh pages are returned as they are. A committed page is copied to
    /// a new page and freed.
    pub(crate) fn writable(&mut self, page: PageNumber) -> CoreResult<PageNumber> {
        if self.fresh.contains(&page) {
            return Ok(page);
        }
        let node = self.view.node(page)?.into_owned();
        let copy = self.insert_node(node)?;
        self.freed.push(PageRun::single(page));
        Ok(copy)
    }

    /// Mutable access to a node on a page returned by [`Self::writable`] or
    /// [`Self::insert_node`].
    pub(crate) fn node_mut(&mut self, page: PageNumber) -> CoreResult<&mut Node> {
        match self.dirty.get_mut(&page) {
            Some(DirtyPage::Node(node)) => Ok(node),
            _ => Err(CoreError::invariant(format!("{page} is not a writable node"))),
        }
    }

    /// Frees a node page.
    pub(crate) fn free_node(&mut self, page: PageNumber) -> CoreResult<()> {
        self.free_run(PageRun::single(page))
    }

    /// Writes a value to a new overflow run. Returns the first page and the
    /// number of pages.
    pub(crate) fn write_overflow(&mut self, value: Vec<u8>) -> CoreResult<(PageNumber, u64)> {
        let count = self.geometry().overflow_pages(value.len() as u64);
        let first = self.allocate(count)?;
        self.dirty.insert(first, DirtyPage::Overflow(value));
        self.fresh.insert(first);
        Ok((first, count))
    }

    /// Frees the overflow run holding a value of `len` bytes.
    pub(crate) fn free_overflow(&mut self, first: PageNumber, len: u64) -> CoreResult<()> {
        let count = self.geometry().overflow_pages(len);
        self.free_run(PageRun::new(first, count))
    }

    fn free_run(&mut self, run: PageRun) -> CoreResult<()> {
        if self.fresh.remove(&run.start) {
            self.dirty.remove(&run.start);
            self.allocator.release(run)
        } else {
            self.freed.push(run);
            Ok(())
        }
    }

    /// Serializes every dirty page into sealed page images, in page order.
    /// Overflow runs are split into their individual pages.
    pub(crate) fn page_images(&self) -> CoreResult<Vec<(PageNumber, Vec<u8>)>> {
        let page_size = self.geometry().page_size();
        let mut pages: Vec<_> = self.dirty.keys().copied().collect();
        pages.sort_unstable();

        let mut images = Vec::with_capacity(pages.len());
        for page in pages {
            match &self.dirty[&page] {
                DirtyPage::Node(node) => images.push((page, node.encode(page, page_size)?)),
                DirtyPage::Overflow(value) => {
                    let count = self.geometry().overflow_pages(value.len() as u64);
                    let run = overflow::encode(value, page, page_size, count);
                    for (i, chunk) in run.chunks_exact(page_size).enumerate() {
                        images.push((PageNumber(page.0 + i as u64), chunk.to_vec()));
                    }
                }
            }
        }
        Ok(images)
    }
}

impl PageSource for WriteSet {
    fn node(&self, page: PageNumber) -> CoreResult<Cow<'_, Node>> {
        match self.dirty.get(&page) {
            Some(DirtyPage::Node(node)) => Ok(Cow::Borrowed(node)),
            Some(DirtyPage::Overflow(_)) => Err(CoreError::invariant(format!(
                "{page} holds an overflow value, not a node"
            ))),
            None => self.view.node(page),
        }
    }

    fn overflow(&self, page: PageNumber, len: u64) -> CoreResult<Cow<'_, [u8]>> {
        match self.dirty.get(&page) {
            Some(DirtyPage::Overflow(value)) if value.len() as u64 == len => {
                Ok(Cow::Borrowed(value.as_slice()))
            }
            Some(_) => Err(CoreError::invariant(format!(
                "{page} does not hold an overflow value of {len} bytes"
            ))),
            None => self.view.overflow(page, len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::node::{LeafEntry, LeafValue};
    use strata_storage::MemoryPager;

    fn write_set() -> (Arc<dyn Pager>, WriteSet) {
        let pager: Arc<dyn Pager> = Arc::new(MemoryPager::new(1024));
        pager.set_next_page(PageNumber(1)).unwrap();
        let ws = WriteSet::new(PagerView::new(Arc::clone(&pager)), FreeSpace::new());
        (pager, ws)
    }

    fn leaf(key: &[u8]) -> Node {
        Node::Leaf(vec![LeafEntry {
            key: key.to_vec(),
            value: LeafValue::Inline(b"v".to_vec()),
        }])
    }

    #[test]
    fn committed_pages_are_copied_on_write() {
        let (pager, mut ws) = write_set();
        pager.ensure(3).unwrap();
        pager
            .write(PageNumber(2), &leaf(b"a").encode(PageNumber(2), 1024).unwrap())
            .unwrap();
        pager.set_next_page(PageNumber(3)).unwrap();

        let copy = ws.writable(PageNumber(2)).unwrap();
        assert_ne!(copy, PageNumber(2));
        assert_eq!(ws.freed(), &[PageRun::single(PageNumber(2))]);
        // Writing the copy again does not copy it twice.
        assert_eq!(ws.writable(copy).unwrap(), copy);
        assert_eq!(*ws.node(copy).unwrap(), leaf(b"a"));
    }

    #[test]
    fn freeing_a_fresh_page_makes_it_reusable() {
        let (_pager, mut ws) = write_set();
        let page = ws.insert_node(Node::empty_leaf()).unwrap();
        ws.free_node(page).unwrap();
        assert!(ws.freed().is_empty());
        assert_eq!(ws.insert_node(Node::empty_leaf()).unwrap(), page);
    }

    #[test]
    fn fresh_only_skips_the_allocator() {
        let (pager, mut ws) = write_set();
        let page = ws.insert_node(Node::empty_leaf()).unwrap();
        ws.free_node(page).unwrap();
        ws.set_fresh_only(true);
        let other = ws.insert_node(Node::empty_leaf()).unwrap();
        assert_ne!(other, page);
        assert_eq!(pager.next_page(), PageNumber(other.0 + 1));
    }

    #[test]
    fn overflow_images_cover_the_run() {
        let (_pager, mut ws) = write_set();
        let value = vec![9u8; 2500];
        let (first, count) = ws.write_overflow(value.clone()).unwrap();
        assert_eq!(count, 3);
        assert_eq!(&*ws.overflow(first, 2500).unwrap(), value.as_slice());

        let images = ws.page_images().unwrap();
        assert_eq!(images.len(), 3);
        let run: Vec<u8> = images.iter().flat_map(|(_, b)| b.clone()).collect();
        assert_eq!(overflow::decode(&run, first, 2500).unwrap(), value);
    }
}
