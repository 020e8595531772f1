//! Core type definitions for Strata.

use std::cmp::Ordering;
use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused, also
/// across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifies one committed state of the environment.
///
/// Every successful write commit publishes the next generation. Readers pin
/// the generation that was current when they began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    /// Creates a new generation.
    #[must_use]
    pub const fn new(generation: u64) -> Self {
        Self(generation)
    }

    /// Returns the raw generation value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next generation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen:{}", self.0)
    }
}

/// A total order over keys.
pub type Comparer = fn(&[u8], &[u8]) -> Ordering;

/// Plain byte order, the default [`Comparer`].
#[must_use]
pub fn lexicographic(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// A range bound for iteration.
///
/// `BeforeAllKeys` and `AfterAllKeys` compare below and above every key, so
/// they can bound a range without knowing anything about the key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slice {
    /// Below every key.
    BeforeAllKeys,
    /// A concrete key.
    Key(Vec<u8>),
    /// Above every key.
    AfterAllKeys,
}

impl Slice {
    /// Compares a concrete key against this bound.
    #[must_use]
    pub fn cmp_key(&self, key: &[u8], comparer: Comparer) -> Ordering {
        match self {
            Self::BeforeAllKeys => Ordering::Greater,
            Self::Key(bound) => comparer(key, bound),
            Self::AfterAllKeys => Ordering::Less,
        }
    }

    /// Returns the concrete key, if any.
    #[must_use]
    pub fn as_key(&self) -> Option<&[u8]> {
        match self {
            Self::Key(key) => Some(key),
            _ => None,
        }
    }
}

impl From<&[u8]> for Slice {
    fn from(key: &[u8]) -> Self {
        Self::Key(key.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Slice {
    fn from(key: &[u8; N]) -> Self {
        Self::Key(key.to_vec())
    }
}

impl From<Vec<u8>> for Slice {
    fn from(key: Vec<u8>) -> Self {
        Self::Key(key)
    }
}

impl From<&str> for Slice {
    fn from(key: &str) -> Self {
        Self::Key(key.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = t1.next();
        assert!(t1 < t2);
        assert_eq!(t2.to_string(), "txn:2");
    }

    #[test]
    fn generation_next() {
        let g = Generation::new(5);
        assert_eq!(g.next().as_u64(), 6);
        assert_eq!(format!("{g}"), "gen:5");
    }

    #[test]
    fn sentinels_bracket_every_key() {
        let key: &[u8] = b"";
        assert_eq!(
            Slice::BeforeAllKeys.cmp_key(key, lexicographic),
            Ordering::Greater
        );
        assert_eq!(
            Slice::AfterAllKeys.cmp_key(&[0xff; 8], lexicographic),
            Ordering::Less
        );
        assert_eq!(
            Slice::from("m").cmp_key(b"a", lexicographic),
            Ordering::Less
        );
        assert_eq!(Slice::from(b"k").as_key(), Some(&b"k"[..]));
    }
}
