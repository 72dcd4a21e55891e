//! Action decisions and transaction outcomes
//!
//! Every action reports exactly one [`Decision`] to its rendezvous point.
//! The rendezvous point folds those reports into an [`AtomicDecision`]:
//!
//! ```text
//! Undecided --Commit--> Undecided (counted, no change)
//! Undecided --Abort---> Abort      (poisoned, permanent)
//! Undecided --Deadlock> Deadlock   (poisoned, permanent)
//! Abort/Deadlock --*--> unchanged  (first bad report wins)
//! ```
//!
//! When the last report arrives the aggregate resolves to Commit if it was
//! never poisoned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::TxnId;

/// Outcome of one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Decision {
    /// No outcome yet
    Undecided = 1,
    /// Local business-rule or storage failure
    Abort = 2,
    /// Lock wait failed
    Deadlock = 3,
    /// Local success
    Commit = 4,
    /// Skipped because a sibling failed; no local work performed
    Die = 5,
}

impl Decision {
    /// Does this decision poison the transaction?
    #[inline]
    pub fn is_poison(&self) -> bool {
        matches!(self, Decision::Abort | Decision::Deadlock)
    }

    fn from_u8(raw: u8) -> Decision {
        match raw {
            1 => Decision::Undecided,
            2 => Decision::Abort,
            3 => Decision::Deadlock,
            4 => Decision::Commit,
            5 => Decision::Die,
            other => unreachable!("invalid decision byte {}", other),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Undecided => "undecided",
            Decision::Abort => "abort",
            Decision::Deadlock => "deadlock",
            Decision::Commit => "commit",
            Decision::Die => "die",
        };
        f.write_str(s)
    }
}

/// Lock-free aggregate of the decisions reported to one rendezvous point
///
/// The only transition is `Undecided -> Abort | Deadlock`, performed with a
/// compare-and-swap so that exactly one reporter observes itself as the
/// poisoner.
#[derive(Debug)]
pub struct AtomicDecision(AtomicU8);

impl AtomicDecision {
    /// Create an undecided aggregate
    pub fn new() -> Self {
        AtomicDecision(AtomicU8::new(Decision::Undecided as u8))
    }

    /// Current aggregate (Undecided until poisoned)
    #[inline]
    pub fn load(&self) -> Decision {
        Decision::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Fold one report into the aggregate
    ///
    /// Returns `true` if this call poisoned the aggregate. Commit and Die
    /// reports never change it.
    pub fn merge(&self, reported: Decision) -> bool {
        if !reported.is_poison() {
            return false;
        }
        self.0
            .compare_exchange(
                Decision::Undecided as u8,
                reported as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Has any report poisoned the aggregate?
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.load().is_poison()
    }

    /// Resolve the aggregate once every report is in
    pub fn resolve(&self) -> Decision {
        match self.load() {
            Decision::Undecided => Decision::Commit,
            poisoned => poisoned,
        }
    }

    /// Reset to Undecided (only valid while no reporter can observe it)
    pub fn reset(&self) {
        self.0.store(Decision::Undecided as u8, Ordering::Release);
    }
}

impl Default for AtomicDecision {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-visible status of a finished transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrxStatus {
    /// Committed in the storage manager
    Committed,
    /// Rolled back after an Abort report or a failed commit
    Aborted,
    /// Rolled back after a lock-wait failure
    Deadlocked,
}

impl TrxStatus {
    /// Map a resolved aggregate decision to the client-visible status
    pub fn from_decision(decision: Decision) -> TrxStatus {
        match decision {
            Decision::Commit => TrxStatus::Committed,
            Decision::Deadlock => TrxStatus::Deadlocked,
            _ => TrxStatus::Aborted,
        }
    }
}

/// Result record handed back to the caller of a coordinator entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrxResult {
    /// Final status
    pub status: TrxStatus,
    /// Transaction the result belongs to
    pub txn_id: TxnId,
}

impl TrxResult {
    /// Did the transaction commit?
    pub fn is_committed(&self) -> bool {
        self.status == TrxStatus::Committed
    }
}
