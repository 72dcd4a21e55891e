//! Per-partition lock table
//!
//! Maps each touched key to its current mode and holders. Entries are kept
//! after release so that hot keys do not churn the map; once the number of
//! distinct keys touched since the last clear exceeds a threshold, every
//! entry without a live holder is purged in bulk.
//!
//! The table is only mutated by the worker thread(s) of its partition, so it
//! needs no synchronization of its own.

use doradb_core::{Key, LockMode, TxnId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct LockEntry {
    holders: SmallVec<[(TxnId, LockMode); 2]>,
}

impl LockEntry {
    /// Strongest mode held by anyone other than `txn`
    fn mode_excluding(&self, txn: TxnId) -> LockMode {
        self.holders
            .iter()
            .filter(|(holder, _)| *holder != txn)
            .fold(LockMode::NoLock, |acc, (_, mode)| acc.stronger(*mode))
    }

    fn mode(&self) -> LockMode {
        self.holders
            .iter()
            .fold(LockMode::NoLock, |acc, (_, mode)| acc.stronger(*mode))
    }
}

/// Key -> (mode, holders) map with the bulk-clear policy
#[derive(Debug)]
pub struct LockTable {
    entries: FxHashMap<Key, LockEntry>,
    touched: usize,
    threshold: usize,
    clears: u64,
}

impl LockTable {
    /// Create a table that clears after `threshold` distinct keys
    pub fn new(threshold: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            touched: 0,
            threshold: threshold.max(1),
            clears: 0,
        }
    }

    /// Try to grant `mode` on `key` to `txn`
    ///
    /// Returns `false` if an incompatible mode is held by another
    /// transaction. Requests are re-entrant: a holder asking again for the
    /// same or a weaker mode is granted immediately. A stronger request is
    /// granted only when `txn` is the sole holder.
    pub fn acquire(&mut self, key: &Key, mode: LockMode, txn: TxnId) -> bool {
        let touched = &mut self.touched;
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            *touched += 1;
            LockEntry::default()
        });

        if mode == LockMode::NoLock {
            return true;
        }

        if !entry.mode_excluding(txn).compatible(mode) {
            trace!(%key, %txn, requested = %mode, held = %entry.mode(), "lock conflict");
            return false;
        }

        match entry.holders.iter_mut().find(|(holder, _)| *holder == txn) {
            Some((_, held)) => *held = held.stronger(mode),
            None => entry.holders.push((txn, mode)),
        }
        true
    }

    /// Drop `txn`'s hold on `key`
    pub fn release(&mut self, key: &Key, txn: TxnId) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.holders.retain(|(holder, _)| *holder != txn);
        }
    }

    /// Drop `txn`'s hold on every key in `keys`
    pub fn release_all<'a>(&mut self, txn: TxnId, keys: impl IntoIterator<Item = &'a Key>) {
        for key in keys {
            self.release(key, txn);
        }
    }

    /// Current combined mode of `key`
    pub fn mode(&self, key: &Key) -> LockMode {
        self.entries
            .get(key)
            .map(LockEntry::mode)
            .unwrap_or(LockMode::NoLock)
    }

    /// Holders of `key`
    pub fn holders(&self, key: &Key) -> Vec<TxnId> {
        self.entries
            .get(key)
            .map(|e| e.holders.iter().map(|(t, _)| *t).collect())
            .unwrap_or_default()
    }

    /// Does `txn` hold `key` in any mode?
    pub fn holds(&self, key: &Key, txn: TxnId) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.holders.iter().any(|(t, _)| *t == txn))
    }

    /// Is there an entry (held or not) for `key`?
    pub fn is_tracked(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Distinct keys touched since the last clear
    pub fn touched(&self) -> usize {
        self.touched
    }

    /// Bulk clears performed so far
    pub fn clears(&self) -> u64 {
        self.clears
    }

    /// Number of keys with at least one holder
    pub fn held_keys(&self) -> usize {
        self.entries.values().filter(|e| !e.holders.is_empty()).count()
    }

    /// Purge unheld entries if the touched-key threshold is exceeded
    ///
    /// Returns `true` if a clear happened.
    pub fn maybe_clear(&mut self) -> bool {
        if self.touched <= self.threshold {
            return false;
        }
        self.clear();
        true
    }

    /// Purge every entry without a live holder
    pub fn clear(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.holders.is_empty());
        self.touched = self.entries.len();
        self.clears += 1;
        debug!(
            purged = before - self.entries.len(),
            retained = self.entries.len(),
            "lock table cleared"
        );
    }
}
