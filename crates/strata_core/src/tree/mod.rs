//! Copy-on-write B+Trees.
//!
//! Trees never modify a committed page. A write transaction copies every
//! page on the path from the root to the leaf it changes into a freshly
//! allocated page, so readers holding an older root keep seeing the old
//! tree untouched.
//!
//! ## Shape
//!
//! - Leaves hold entries sorted by the tree's comparer; there are no sibling
//!   links, so cursors walk back up through their own stack
//! - Branches hold `n` children and `n - 1` separators; child `i` covers keys
//!   from separator `i` up to (excluding) separator `i + 1`
//! - Nodes split at their byte midpoint, except that an insert at the far
//!   right edge leaves the left page full, which packs sequential inserts
//! - Deletes never merge; an emptied page is unlinked from its parent and a
//!   root branch left with one child is collapsed into that child
//! - Values longer than `page_size / 8` go to an overflow run; keys longer
//!   than `page_size / 8` are rejected

mod cursor;
mod handle;
pub(crate) mod ops;
mod state;

pub use cursor::Cursor;
pub use handle::{Tree, TreeMut, ValueReader};
pub use state::TreeState;
pub(crate) use state::TREE_STATE_SIZE;

use crate::error::CoreResult;
use crate::page::node::Node;
use std::borrow::Cow;
use strata_storage::PageNumber;

/// Read access to tree pages.
///
/// Committed pages come straight from the pager; a write transaction layers
/// its private pages on top.
pub(crate) trait PageSource {
    /// Decodes the node on `page`.
    fn node(&self, page: PageNumber) -> CoreResult<Cow<'_, Node>>;

    /// Reads the overflow value of `len` bytes starting at `page`.
    fn overflow(&self, page: PageNumber, len: u64) -> CoreResult<Cow<'_, [u8]>>;
}
