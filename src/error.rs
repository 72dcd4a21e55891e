//! Public error type for DoraDB
//!
//! Flattens the per-crate errors into one stable enum. Transaction
//! outcomes (committed, aborted, deadlocked) are not errors; they arrive
//! as [`TrxStatus`](doradb_core::TrxStatus) through the transaction's
//! future.

use thiserror::Error;

/// All DoraDB errors
#[derive(Debug, Error)]
pub enum Error {
    /// The transaction could not be enqueued and never started
    #[error("transaction not started: {0}")]
    NotStarted(String),

    /// Transaction input the engine cannot run
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage manager failure
    #[error("storage error: {0}")]
    Storage(String),

    /// A pool of actions or rendezvous points ran dry
    #[error("resources exhausted: {0}")]
    Exhausted(String),

    /// The engine dropped a transaction without a result
    #[error("transaction {0} abandoned")]
    Abandoned(u64),

    /// I/O error while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for DoraDB operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// May the same submission succeed if tried again later?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Exhausted(_))
    }

    /// Did the submission fail before the transaction started?
    pub fn is_enqueue_failure(&self) -> bool {
        matches!(self, Error::NotStarted(_))
    }

    /// Is this a bug rather than a usage problem?
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Internal(_) | Error::Abandoned(_))
    }
}

impl From<doradb_core::Error> for Error {
    fn from(e: doradb_core::Error) -> Self {
        use doradb_core::Error as CoreError;
        match e {
            CoreError::Enqueue(err) => Error::NotStarted(err.to_string()),
            CoreError::Storage(err) => Error::Storage(err.to_string()),
            CoreError::Config(msg) => Error::Config(msg),
            err @ CoreError::CacheExhausted { .. } => Error::Exhausted(err.to_string()),
            CoreError::InvalidInput(msg) => Error::InvalidInput(msg),
            CoreError::Abandoned(txn) => Error::Abandoned(txn.as_u64()),
            err @ (CoreError::WaveOverflow { .. } | CoreError::AlreadySized { .. }) => {
                Error::Internal(err.to_string())
            }
            CoreError::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doradb_core::{EnqueueError, PartitionId, TableId, TxnId};

    #[test]
    fn test_enqueue_failures_flatten() {
        let core = doradb_core::Error::Enqueue(EnqueueError::Closed {
            table: TableId(2),
            partition: PartitionId(0),
        });
        let err = Error::from(core);
        assert!(err.is_enqueue_failure());
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("transaction not started"));
    }

    #[test]
    fn test_exhausted_cache_is_retryable() {
        let err = Error::from(doradb_core::Error::CacheExhausted { cache: "rvp-terminal" });
        assert!(err.is_retryable());
        assert!(err.to_string().contains("rvp-terminal"));
    }

    #[test]
    fn test_serious_errors() {
        assert!(Error::from(doradb_core::Error::Abandoned(TxnId(7))).is_serious());
        assert!(Error::from(doradb_core::Error::AlreadySized { txn: TxnId(1) }).is_serious());
        assert!(!Error::Config("x".into()).is_serious());
    }
}
