//! Error types for DoraDB
//!
//! Three families:
//! - [`EnqueueError`]: an action could not be placed in a partition queue.
//!   Surfaced synchronously to the coordinator; the transaction never starts.
//! - [`StorageError`]: the storage manager refused an operation. Inside an
//!   action this becomes an Abort decision, never a crash.
//! - [`Error`]: everything a caller of the engine can observe.

use thiserror::Error;

use crate::types::{PartitionId, TableId, TxnId};

/// Failure to enqueue an action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The partition is shutting down
    #[error("partition {table}/{partition} is closed")]
    Closed {
        /// Owning table
        table: TableId,
        /// Partition index
        partition: PartitionId,
    },

    /// Partition index out of range for the table
    #[error("partition {partition} out of range for table {table} ({count} partitions)")]
    Invalid {
        /// Owning table
        table: TableId,
        /// Requested partition index
        partition: PartitionId,
        /// Number of partitions the table has
        count: usize,
    },
}

/// Failure reported by the storage manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Tuple does not exist
    #[error("tuple {key} not found in table {table}")]
    NotFound {
        /// Table searched
        table: TableId,
        /// Key rendered for diagnostics
        key: String,
    },

    /// Insert of an existing key
    #[error("duplicate key {key} in table {table}")]
    Duplicate {
        /// Target table
        table: TableId,
        /// Key rendered for diagnostics
        key: String,
    },

    /// Transaction handle was never issued
    #[error("unknown transaction handle {0}")]
    UnknownTxn(u64),

    /// Transaction already committed or aborted
    #[error("transaction {0} is no longer active")]
    TxnNotActive(u64),

    /// Failure injected by a test harness
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Engine-level error
#[derive(Debug, Error)]
pub enum Error {
    /// Enqueue failed; the transaction was not started
    #[error("enqueue failed: {0}")]
    Enqueue(#[from] EnqueueError),

    /// Storage manager failure outside of action execution
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// An object cache hit its hard limit
    #[error("object cache '{cache}' exhausted")]
    CacheExhausted {
        /// Cache name
        cache: &'static str,
    },

    /// More actions registered than the wave was sized for
    #[error("wave of {txn} is sized for {total} actions")]
    WaveOverflow {
        /// Owning transaction
        txn: TxnId,
        /// Declared wave size
        total: usize,
    },

    /// A dynamic rendezvous point had its size fixed twice
    #[error("rendezvous point for {txn} already sized")]
    AlreadySized {
        /// Owning transaction
        txn: TxnId,
    },

    /// Transaction input the engine cannot run
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The engine dropped the transaction before it produced a result
    #[error("transaction {0} was abandoned before completion")]
    Abandoned(TxnId),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for DoraDB operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Was this an enqueue failure (transaction never started)?
    pub fn is_enqueue(&self) -> bool {
        matches!(self, Error::Enqueue(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_error_display() {
        let e = EnqueueError::Invalid {
            table: TableId(1),
            partition: PartitionId(9),
            count: 4,
        };
        assert_eq!(
            e.to_string(),
            "partition p9 out of range for table t1 (4 partitions)"
        );
    }

    #[test]
    fn test_conversion_into_engine_error() {
        let e: Error = EnqueueError::Closed {
            table: TableId(0),
            partition: PartitionId(0),
        }
        .into();
        assert!(e.is_enqueue());

        let e: Error = StorageError::UnknownTxn(7).into();
        assert!(!e.is_enqueue());
        assert!(e.to_string().contains("unknown transaction handle 7"));
    }
}
