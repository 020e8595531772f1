//! Consistency checking.
//!
//! Verification walks one generation from its header: the catalog, every
//! named tree, and the free-space tree. Each page reached is claimed once;
//! a page claimed twice, or a page neither reachable nor recorded as free,
//! is reported. Every node is decoded (which checks its checksum) and
//! every overflow run is read back.

use crate::catalog;
use crate::error::{CoreError, CoreResult};
use crate::freespace::{self, FreeSpace, PageRun};
use crate::page::meta::EnvironmentHeader;
use crate::page::node::{LeafValue, Node};
use crate::page::Geometry;
use crate::transaction::ReadTransaction;
use crate::tree::{PageSource, TreeState};
use crate::types::{lexicographic, Comparer, Generation};
use std::cmp::Ordering;
use strata_storage::PageNumber;

/// Result of [`StorageEnvironment::verify`](crate::StorageEnvironment::verify).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Generation that was checked.
    pub generation: Generation,
    /// Named trees walked.
    pub trees: usize,
    /// Entries found across all named trees.
    pub entries: u64,
    /// Pages reached from the header, overflow pages included.
    pub pages: u64,
    /// Pages recorded as free.
    pub free_pages: u64,
    /// Problems found, one line each.
    pub issues: Vec<String>,
}

impl VerifyReport {
    /// Returns true if no problem was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Page counts observed while walking one tree.
#[derive(Debug, Default)]
struct Observed {
    entries: u64,
    branch_pages: u64,
    leaf_pages: u64,
    overflow_pages: u64,
}

struct Walker<'a> {
    source: &'a dyn PageSource,
    geometry: Geometry,
    next_page: u64,
    /// Pages already accounted for.
    claimed: FreeSpace,
    issues: Vec<String>,
}

impl<'a> Walker<'a> {
    /// Records a corruption finding; passes other errors through.
    fn note<T>(&mut self, context: &str, result: CoreResult<T>) -> CoreResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_corruption() || matches!(err, CoreError::InvalidFormat { .. }) => {
                self.issues.push(format!("{context}: {err}"));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Marks a run as accounted for. Returns false if any of it is out of
    /// bounds or already claimed.
    fn claim(&mut self, context: &str, run: PageRun) -> bool {
        if run.start.as_u64() == 0 || run.end() > self.next_page {
            self.issues.push(format!(
                "{context}: pages {}..{} outside the allocated range 1..{}",
                run.start.as_u64(),
                run.end(),
                self.next_page
            ));
            return false;
        }
        if self.claimed.overlap(run) > 0 || self.claimed.release(run).is_err() {
            self.issues.push(format!(
                "{context}: pages {}..{} are referenced more than once",
                run.start.as_u64(),
                run.end()
            ));
            return false;
        }
        true
    }

    fn walk_tree(&mut self, name: &str, state: &TreeState, comparer: Comparer) -> CoreResult<u64> {
        let mut observed = Observed::default();
        self.walk_node(name, state, comparer, state.root, 1, None, None, &mut observed)?;

        let expected = (
            state.entries,
            state.branch_pages,
            state.leaf_pages,
            state.overflow_pages,
        );
        let found = (
            observed.entries,
            observed.branch_pages,
            observed.leaf_pages,
            observed.overflow_pages,
        );
        if expected != found {
            self.issues.push(format!(
                "tree {name}: state records (entries, branch, leaf, overflow) = {expected:?}, found {found:?}"
            ));
        }
        Ok(observed.entries)
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_node(
        &mut self,
        name: &str,
        state: &TreeState,
        comparer: Comparer,
        page: PageNumber,
        level: u32,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        observed: &mut Observed,
    ) -> CoreResult<()> {
        let context = format!("tree {name}, page {}", page.as_u64());
        if !self.claim(&context, PageRun::single(page)) {
            return Ok(());
        }
        let source = self.source;
        let Some(node) = self.note(&context, source.node(page))? else {
            return Ok(());
        };

        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |lo| comparer(key, lo) != Ordering::Less)
                && upper.map_or(true, |hi| comparer(key, hi) == Ordering::Less)
        };
        let is_root = page == state.root;

        match node.as_ref() {
            Node::Leaf(entries) => {
                observed.leaf_pages += 1;
                if level != state.depth {
                    self.issues.push(format!(
                        "{context}: leaf at depth {level}, tree depth is {}",
                        state.depth
                    ));
                }
                if entries.is_empty() && !is_root {
                    self.issues.push(format!("{context}: empty non-root leaf"));
                }
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 && comparer(&entries[i - 1].key, &entry.key) != Ordering::Less {
                        self.issues.push(format!("{context}: leaf keys out of order at {i}"));
                    }
                    if !in_bounds(&entry.key) {
                        self.issues
                            .push(format!("{context}: key {i} outside its parent's range"));
                    }
                    if let LeafValue::Overflow { page: first, len } = entry.value {
                        let count = self.geometry.overflow_pages(len);
                        let overflow = format!("{context}, overflow at {}", first.as_u64());
                        if self.claim(&overflow, PageRun::new(first, count)) {
                            observed.overflow_pages += count;
                            self.note(&overflow, source.overflow(first, len))?;
                        }
                    }
                }
                observed.entries += entries.len() as u64;
            }
            Node::Branch(entries) => {
                observed.branch_pages += 1;
                if level >= state.depth {
                    self.issues.push(format!(
                        "{context}: branch at depth {level}, tree depth is {}",
                        state.depth
                    ));
                    return Ok(());
                }
                if is_root && entries.len() < 2 {
                    self.issues
                        .push(format!("{context}: root branch with {} children", entries.len()));
                }
                if entries.is_empty() {
                    self.issues.push(format!("{context}: empty branch"));
                    return Ok(());
                }
                if !entries[0].key.is_empty() {
                    self.issues
                        .push(format!("{context}: first separator is not empty"));
                }
                for i in 1..entries.len() {
                    if i > 1 && comparer(&entries[i - 1].key, &entries[i].key) != Ordering::Less {
                        self.issues
                            .push(format!("{context}: separators out of order at {i}"));
                    }
                    if !in_bounds(&entries[i].key) {
                        self.issues
                            .push(format!("{context}: separator {i} outside its parent's range"));
                    }
                }
                for (i, entry) in entries.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(entry.key.as_slice()) };
                    let child_upper = entries.get(i + 1).map(|next| next.key.as_slice()).or(upper);
                    self.walk_node(
                        name,
                        state,
                        comparer,
                        entry.child,
                        level + 1,
                        child_lower,
                        child_upper,
                        observed,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Checks the generation `txn` reads.
pub(crate) fn verify(txn: &ReadTransaction<'_>, comparer: Comparer) -> CoreResult<VerifyReport> {
    let header = txn.header();
    let view = txn.view();
    let mut walker = Walker {
        source: view,
        geometry: view.geometry(),
        next_page: header.next_page.as_u64(),
        claimed: FreeSpace::new(),
        issues: Vec::new(),
    };
    let mut report = VerifyReport {
        generation: header.generation,
        ..VerifyReport::default()
    };

    // Page 0 may already hold a newer generation; it only has to decode.
    let stored = view
        .pager()
        .read(PageNumber::HEADER)
        .map_err(CoreError::from_storage)?;
    walker.note("header page", EnvironmentHeader::decode(&stored))?;

    walker.walk_tree("$catalog", &header.catalog, lexicographic)?;
    if let Some(trees) = walker.note("catalog", catalog::entries(view, &header.catalog))? {
        report.trees = trees.len();
        for (name, state) in &trees {
            report.entries += walker.walk_tree(name, state, comparer)?;
        }
    }

    walker.walk_tree("$free", &header.free_space, lexicographic)?;
    if let Some(runs) = walker.note("free-space tree", freespace::read_runs(view, &header.free_space))? {
        for (start, len) in runs {
            let run = PageRun::new(PageNumber(start), len);
            if walker.claim("free run", run) {
                report.free_pages += len;
            }
        }
    }

    let accounted = walker.claimed.total_pages();
    let allocated = walker.next_page.saturating_sub(1);
    if accounted < allocated {
        walker.issues.push(format!(
            "{} of {allocated} allocated pages are neither reachable nor free",
            allocated - accounted
        ));
    }
    report.pages = accounted - report.free_pages;
    report.issues = walker.issues;
    Ok(report)
}
