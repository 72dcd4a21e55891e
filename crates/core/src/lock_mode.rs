//! Partition-local lock modes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lock modes understood by a partition's lock table
///
/// Compatibility (symmetric):
///
/// | held \ req | NoLock | Shared | Excl |
/// |------------|--------|--------|------|
/// | NoLock     | yes    | yes    | yes  |
/// | Shared     | yes    | yes    | no   |
/// | Excl       | yes    | no     | no   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LockMode {
    /// Unlocked
    NoLock = 0,
    /// Shared (read) lock
    Shared = 1,
    /// Exclusive (write) lock
    Excl = 2,
}

const COMPATIBILITY: [[bool; 3]; 3] = [
    [true, true, true],
    [true, true, false],
    [true, false, false],
];

impl LockMode {
    /// All modes, in matrix order
    pub const ALL: [LockMode; 3] = [LockMode::NoLock, LockMode::Shared, LockMode::Excl];

    /// Can `requested` be granted while `self` is held by someone else?
    #[inline]
    pub fn compatible(self, requested: LockMode) -> bool {
        COMPATIBILITY[self as usize][requested as usize]
    }

    /// The stronger of two modes
    #[inline]
    pub fn stronger(self, other: LockMode) -> LockMode {
        if other > self {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockMode::NoLock => "NL",
            LockMode::Shared => "S",
            LockMode::Excl => "X",
        };
        f.write_str(s)
    }
}
