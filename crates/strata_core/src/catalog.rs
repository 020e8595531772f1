//! The catalog of named trees.
//!
//! The catalog is itself a tree, rooted in the environment header, mapping
//! each tree name to its encoded [`TreeState`]. It always uses byte order,
//! whatever comparer user trees are configured with.

use crate::error::{CoreError, CoreResult};
use crate::page::Geometry;
use crate::tree::{ops, Cursor, PageSource, TreeState};
use crate::types::{lexicographic, Slice};

/// Prefix reserved for engine-internal names.
pub const RESERVED_PREFIX: char = '$';

/// Checks that `name` can name a user tree.
pub(crate) fn validate_name(name: &str, geometry: Geometry) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_operation("tree name cannot be empty"));
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(CoreError::invalid_operation(format!(
            "tree names starting with '{RESERVED_PREFIX}' are reserved: {name}"
        )));
    }
    let max = geometry.max_key_size();
    if name.len() > max {
        return Err(CoreError::KeyTooLarge {
            size: name.len(),
            max,
        });
    }
    Ok(())
}

/// Looks up the state of a named tree.
pub(crate) fn lookup(
    source: &dyn PageSource,
    catalog: &TreeState,
    name: &str,
) -> CoreResult<Option<TreeState>> {
    ops::lookup(source, catalog, lexicographic, name.as_bytes())?
        .map(|value| TreeState::decode(&ops::load_value(source, &value)?))
        .transpose()
}

/// Every registered tree, in name order.
pub(crate) fn entries(
    source: &dyn PageSource,
    catalog: &TreeState,
) -> CoreResult<Vec<(String, TreeState)>> {
    let mut cursor = Cursor::new(source, catalog.root, lexicographic, Slice::AfterAllKeys);
    cursor.seek_first()?;
    cursor
        .map(|entry| {
            let (key, value) = entry?;
            let name = String::from_utf8(key)
                .map_err(|_| CoreError::invariant("catalog holds a non UTF-8 tree name"))?;
            Ok((name, TreeState::decode(&value)?))
        })
        .collect()
}
