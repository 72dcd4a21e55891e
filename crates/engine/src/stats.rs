//! Per transaction type counters
//!
//! `attempted` is bumped by the coordinator when a transaction starts; the
//! other counters by the terminal completion. A snapshot reads the finish
//! counters before `attempted`, so it never shows more finished
//! transactions than started ones.

use doradb_core::TrxStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transaction types the engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrxKind {
    /// TPC-C Payment
    Payment,
    /// TPC-C NewOrder
    NewOrder,
    /// Single warehouse update
    MbenchWarehouse,
    /// Single customer update
    MbenchCustomer,
}

impl TrxKind {
    /// Every kind, in counter order
    pub const ALL: [TrxKind; 4] = [
        TrxKind::Payment,
        TrxKind::NewOrder,
        TrxKind::MbenchWarehouse,
        TrxKind::MbenchCustomer,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TrxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrxKind::Payment => "payment",
            TrxKind::NewOrder => "new-order",
            TrxKind::MbenchWarehouse => "mbench-wh",
            TrxKind::MbenchCustomer => "mbench-cust",
        };
        f.write_str(s)
    }
}

/// Snapshot of one kind's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrxStats {
    /// Transactions started
    pub attempted: u64,
    /// Finished Committed
    pub committed: u64,
    /// Finished Aborted
    pub aborted: u64,
    /// Finished Deadlocked
    pub deadlocked: u64,
}

impl TrxStats {
    /// Transactions that produced a result
    pub fn finished(&self) -> u64 {
        self.committed + self.aborted + self.deadlocked
    }

    /// Transactions started but not finished
    pub fn in_flight(&self) -> u64 {
        self.attempted.saturating_sub(self.finished())
    }

    fn add(&mut self, other: &TrxStats) {
        self.attempted += other.attempted;
        self.committed += other.committed;
        self.aborted += other.aborted;
        self.deadlocked += other.deadlocked;
    }
}

#[derive(Debug, Default)]
struct Counters {
    attempted: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    deadlocked: AtomicU64,
}

/// Counters of every transaction kind
#[derive(Debug, Default)]
pub struct StatsBoard {
    kinds: [Counters; 4],
}

impl StatsBoard {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a started transaction
    pub fn attempt(&self, kind: TrxKind) {
        self.kinds[kind.slot()].attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a finished transaction
    pub fn record(&self, kind: TrxKind, status: TrxStatus) {
        let c = &self.kinds[kind.slot()];
        let counter = match status {
            TrxStatus::Committed => &c.committed,
            TrxStatus::Aborted => &c.aborted,
            TrxStatus::Deadlocked => &c.deadlocked,
        };
        counter.fetch_add(1, Ordering::Release);
    }

    /// Snapshot of one kind
    pub fn get(&self, kind: TrxKind) -> TrxStats {
        let c = &self.kinds[kind.slot()];
        let committed = c.committed.load(Ordering::Acquire);
        let aborted = c.aborted.load(Ordering::Acquire);
        let deadlocked = c.deadlocked.load(Ordering::Acquire);
        TrxStats {
            attempted: c.attempted.load(Ordering::Acquire),
            committed,
            aborted,
            deadlocked,
        }
    }

    /// Sum over every kind
    pub fn total(&self) -> TrxStats {
        let mut total = TrxStats::default();
        for kind in TrxKind::ALL {
            total.add(&self.get(kind));
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counts_per_kind() {
        let board = StatsBoard::new();
        board.attempt(TrxKind::Payment);
        board.attempt(TrxKind::Payment);
        board.attempt(TrxKind::NewOrder);
        board.record(TrxKind::Payment, TrxStatus::Committed);
        board.record(TrxKind::Payment, TrxStatus::Deadlocked);
        board.record(TrxKind::NewOrder, TrxStatus::Aborted);

        let pay = board.get(TrxKind::Payment);
        assert_eq!(pay.attempted, 2);
        assert_eq!(pay.committed, 1);
        assert_eq!(pay.deadlocked, 1);
        assert_eq!(pay.finished(), 2);
        assert_eq!(board.get(TrxKind::MbenchWarehouse), TrxStats::default());

        let total = board.total();
        assert_eq!(total.attempted, 3);
        assert_eq!(total.aborted, 1);
        assert_eq!(total.in_flight(), 0);
    }

    #[test]
    fn test_snapshots_never_finish_more_than_started() {
        let board = Arc::new(StatsBoard::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let board = Arc::clone(&board);
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        board.attempt(TrxKind::MbenchWarehouse);
                        board.record(TrxKind::MbenchWarehouse, TrxStatus::Committed);
                    }
                })
            })
            .collect();
        while writers.iter().any(|w| !w.is_finished()) {
            let s = board.get(TrxKind::MbenchWarehouse);
            assert!(s.finished() <= s.attempted);
        }
        for w in writers {
            w.join().unwrap();
        }
        let s = board.total();
        assert_eq!(s.attempted, 20_000);
        assert_eq!(s.in_flight(), 0);

        let skewed = TrxStats {
            attempted: 1,
            committed: 2,
            ..TrxStats::default()
        };
        assert_eq!(skewed.in_flight(), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let board = StatsBoard::new();
        board.attempt(TrxKind::MbenchCustomer);
        let json = serde_json::to_string(&board.get(TrxKind::MbenchCustomer)).unwrap();
        assert_eq!(
            json,
            r#"{"attempted":1,"committed":0,"aborted":0,"deadlocked":0}"#
        );
        assert_eq!(TrxKind::NewOrder.to_string(), "new-order");
    }
}
