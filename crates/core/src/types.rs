//! Core identifiers
//!
//! - [`TxnId`]: client-visible transaction identifier
//! - [`TableId`]: logical table identifier
//! - [`PartitionId`]: index of a partition inside its table
//! - [`Key`]: composite primary key used for routing and locking

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Identifier of one client transaction
///
/// Assigned by the coordinator when a transaction is submitted. It is the
/// identity shared by the transaction's RVPs and actions, and the holder id
/// recorded in partition lock tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Identifier of a logical table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub u16);

impl TableId {
    /// Table index as usize (used by the CPU placement formula)
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Index of a partition within its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PartitionId(pub usize);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Composite primary key
///
/// Keys are short sequences of integer fields, e.g. `(w_id, d_id, c_id)`.
/// Ordering is lexicographic on the fields, so keys sharing a prefix sort
/// together, which is what range partitioning relies on.
///
/// # Examples
///
/// ```
/// use doradb_core::Key;
///
/// let district = Key::from([1, 7]);
/// assert_eq!(district.leading(), Some(1));
/// assert_eq!(district.fields(), &[1, 7]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Key(SmallVec<[u64; 4]>);

impl Key {
    /// Create an empty key
    pub fn new() -> Self {
        Key(SmallVec::new())
    }

    /// Append one field
    pub fn push(&mut self, field: u64) {
        self.0.push(field);
    }

    /// Append one field, builder style
    pub fn with(mut self, field: u64) -> Self {
        self.0.push(field);
        self
    }

    /// Key fields
    pub fn fields(&self) -> &[u64] {
        &self.0
    }

    /// First field, the one partitioning is computed on
    pub fn leading(&self) -> Option<u64> {
        self.0.first().copied()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the key has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[u64; N]> for Key {
    fn from(fields: [u64; N]) -> Self {
        Key(fields.iter().copied().collect())
    }
}

impl From<&[u64]> for Key {
    fn from(fields: &[u64]) -> Self {
        Key(fields.iter().copied().collect())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", field)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_is_lexicographic() {
        let a = Key::from([1, 2]);
        let b = Key::from([1, 10]);
        let c = Key::from([2]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_key_builder() {
        let k = Key::new().with(3).with(4).with(5);
        assert_eq!(k.len(), 3);
        assert_eq!(k, Key::from([3, 4, 5]));
        assert_eq!(k.to_string(), "(3,4,5)");
    }

    #[test]
    fn test_empty_key_has_no_leading_field() {
        let k = Key::new();
        assert!(k.is_empty());
        assert_eq!(k.leading(), None);
    }

    #[test]
    fn test_txn_id_display() {
        assert_eq!(TxnId(42).to_string(), "txn-42");
        assert_eq!(TableId(3).index(), 3);
    }
}
