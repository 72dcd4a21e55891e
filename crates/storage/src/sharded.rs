//! Sharded in-memory storage manager
//!
//! DashMap keyed by table, FxHashMap within each table.
//!
//! # Design
//!
//! - DashMap: tables never contend with each other
//! - FxHashMap: O(1) tuple lookups, fast non-crypto hash
//! - Undo images: the first write of a key by a transaction records the
//!   before-image; abort restores them in reverse order, commit drops them
//!
//! Isolation between transactions is not this layer's job. The partition
//! workers serialize every logical access to a key before it gets here.

use dashmap::DashMap;
use doradb_core::{Key, StorageError, TableId};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use crate::manager::{StorageManager, TxnHandle};

/// Tuples of one table
#[derive(Debug)]
pub struct TableShard<T> {
    pub(crate) data: FxHashMap<Key, T>,
}

impl<T> TableShard<T> {
    /// Create an empty shard
    pub fn new() -> Self {
        Self {
            data: FxHashMap::default(),
        }
    }

    /// Number of tuples in this table
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if table is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<T> Default for TableShard<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct UndoEntry<T> {
    table: TableId,
    key: Key,
    before: Option<T>,
}

#[derive(Debug)]
struct TxnState<T> {
    undo: Vec<UndoEntry<T>>,
    written: FxHashSet<(TableId, Key)>,
}

impl<T> TxnState<T> {
    fn new() -> Self {
        Self {
            undo: Vec::new(),
            written: FxHashSet::default(),
        }
    }
}

/// Commit/abort counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Transactions started
    pub begun: u64,
    /// Transactions committed
    pub committed: u64,
    /// Transactions rolled back (including failed commits)
    pub aborted: u64,
}

/// In-memory [`StorageManager`]
///
/// # Fault injection
///
/// Tests can make the next commit fail ([`MemoryStorage::fail_next_commit`])
/// or make every write into one table fail ([`MemoryStorage::fail_writes_on`]).
pub struct MemoryStorage<T> {
    tables: DashMap<TableId, TableShard<T>>,
    txns: DashMap<u64, TxnState<T>>,
    next_txn: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    fail_next_commit: AtomicBool,
    failing_tables: Mutex<FxHashSet<TableId>>,
}

impl<T: Clone + Send + Sync + 'static> MemoryStorage<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            txns: DashMap::new(),
            next_txn: AtomicU64::new(1),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            fail_next_commit: AtomicBool::new(false),
            failing_tables: Mutex::new(FxHashSet::default()),
        }
    }

    /// Load a tuple outside of any transaction (initial population)
    pub fn load(&self, table: TableId, key: Key, tuple: T) {
        self.tables
            .entry(table)
            .or_insert_with(TableShard::new)
            .data
            .insert(key, tuple);
    }

    /// Read the current value of a tuple outside of any transaction
    pub fn peek(&self, table: TableId, key: &Key) -> Option<T> {
        self.tables
            .get(&table)
            .and_then(|shard| shard.data.get(key).cloned())
    }

    /// Number of tuples in a table
    pub fn table_len(&self, table: TableId) -> usize {
        self.tables.get(&table).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of transactions begun but not yet finished
    pub fn active_transactions(&self) -> usize {
        self.txns.len()
    }

    /// Commit/abort counters
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            begun: self.next_txn.load(Ordering::Relaxed) - 1,
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }

    /// Make the next commit fail (and roll back)
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::Release);
    }

    /// Make every write into `table` fail until cleared
    pub fn fail_writes_on(&self, table: TableId) {
        self.failing_tables.lock().insert(table);
    }

    /// Stop failing writes on every table
    pub fn clear_failures(&self) {
        self.failing_tables.lock().clear();
        self.fail_next_commit.store(false, Ordering::Release);
    }

    fn ensure_active(&self, txn: TxnHandle) -> Result<(), StorageError> {
        if self.txns.contains_key(&txn.0) {
            Ok(())
        } else if txn.0 > 0 && txn.0 < self.next_txn.load(Ordering::Acquire) {
            Err(StorageError::TxnNotActive(txn.0))
        } else {
            Err(StorageError::UnknownTxn(txn.0))
        }
    }

    fn check_injected(&self, table: TableId) -> Result<(), StorageError> {
        if self.failing_tables.lock().contains(&table) {
            return Err(StorageError::Injected(format!("writes to {} disabled", table)));
        }
        Ok(())
    }

    /// Write a tuple and remember the before-image the first time
    fn write(
        &self,
        txn: TxnHandle,
        table: TableId,
        key: Key,
        tuple: T,
        must_be_new: bool,
    ) -> Result<(), StorageError> {
        self.ensure_active(txn)?;
        self.check_injected(table)?;

        let before = {
            let mut shard = self.tables.entry(table).or_insert_with(TableShard::new);
            if must_be_new && shard.data.contains_key(&key) {
                return Err(StorageError::Duplicate {
                    table,
                    key: key.to_string(),
                });
            }
            shard.data.insert(key.clone(), tuple)
        };

        let mut state = self
            .txns
            .get_mut(&txn.0)
            .ok_or(StorageError::TxnNotActive(txn.0))?;
        if state.written.insert((table, key.clone())) {
            state.undo.push(UndoEntry { table, key, before });
        }
        Ok(())
    }

    fn rollback(&self, state: TxnState<T>) {
        for entry in state.undo.into_iter().rev() {
            if let Some(mut shard) = self.tables.get_mut(&entry.table) {
                match entry.before {
                    Some(before) => {
                        shard.data.insert(entry.key, before);
                    }
                    None => {
                        shard.data.remove(&entry.key);
                    }
                }
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> StorageManager for MemoryStorage<T> {
    type Tuple = T;

    fn begin_transaction(&self) -> TxnHandle {
        let id = self.next_txn.fetch_add(1, Ordering::AcqRel);
        self.txns.insert(id, TxnState::new());
        TxnHandle(id)
    }

    fn commit(&self, txn: TxnHandle) -> Result<(), StorageError> {
        self.ensure_active(txn)?;
        let (_, state) = self
            .txns
            .remove(&txn.0)
            .ok_or(StorageError::TxnNotActive(txn.0))?;

        if self.fail_next_commit.swap(false, Ordering::AcqRel) {
            debug!(txn = %txn, "injected commit failure, rolling back");
            self.rollback(state);
            self.aborted.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Injected(format!("commit of {} failed", txn)));
        }

        self.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn abort(&self, txn: TxnHandle) -> Result<(), StorageError> {
        self.ensure_active(txn)?;
        let (_, state) = self
            .txns
            .remove(&txn.0)
            .ok_or(StorageError::TxnNotActive(txn.0))?;
        self.rollback(state);
        self.aborted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, txn: TxnHandle, table: TableId, key: &Key) -> Result<Option<T>, StorageError> {
        self.ensure_active(txn)?;
        Ok(self.peek(table, key))
    }

    fn put(&self, txn: TxnHandle, table: TableId, key: Key, tuple: T) -> Result<(), StorageError> {
        self.write(txn, table, key, tuple, false)
    }

    fn insert(&self, txn: TxnHandle, table: TableId, key: Key, tuple: T) -> Result<(), StorageError> {
        self.write(txn, table, key, tuple, true)
    }
}

impl<T> std::fmt::Debug for MemoryStorage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("tables", &self.tables.len())
            .field("active_txns", &self.txns.len())
            .finish()
    }
}
