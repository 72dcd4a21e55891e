//! The storage-manager contract consumed by actions and terminal RVPs

use doradb_core::{Key, StorageError, TableId};
use std::fmt;

/// Handle to a storage-manager transaction
///
/// Issued by [`StorageManager::begin_transaction`] and passed by value to
/// every action of the owning DORA transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnHandle(pub u64);

impl fmt::Display for TxnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sm-{}", self.0)
    }
}

/// Transaction boundaries and tuple access
///
/// All operations are fallible. Actions turn any error into an Abort
/// decision; the terminal RVP turns a failed commit into an Aborted result.
///
/// Implementations must tolerate concurrent calls on the same handle from
/// different partition workers, as long as they touch different keys.
pub trait StorageManager: Send + Sync + 'static {
    /// Row type stored in tables
    type Tuple: Clone + Send + Sync + 'static;

    /// Start a transaction
    fn begin_transaction(&self) -> TxnHandle;

    /// Make the transaction's writes permanent
    fn commit(&self, txn: TxnHandle) -> Result<(), StorageError>;

    /// Roll back the transaction's writes
    fn abort(&self, txn: TxnHandle) -> Result<(), StorageError>;

    /// Read one tuple
    fn get(
        &self,
        txn: TxnHandle,
        table: TableId,
        key: &Key,
    ) -> Result<Option<Self::Tuple>, StorageError>;

    /// Overwrite (or create) one tuple
    fn put(
        &self,
        txn: TxnHandle,
        table: TableId,
        key: Key,
        tuple: Self::Tuple,
    ) -> Result<(), StorageError>;

    /// Create one tuple, failing with [`StorageError::Duplicate`] if it exists
    fn insert(
        &self,
        txn: TxnHandle,
        table: TableId,
        key: Key,
        tuple: Self::Tuple,
    ) -> Result<(), StorageError>;

    /// Read a tuple that must exist
    fn fetch(
        &self,
        txn: TxnHandle,
        table: TableId,
        key: &Key,
    ) -> Result<Self::Tuple, StorageError> {
        self.get(txn, table, key)?.ok_or_else(|| StorageError::NotFound {
            table,
            key: key.to_string(),
        })
    }
}
