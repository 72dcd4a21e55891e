//! Core types for DoraDB
//!
//! This crate defines the vocabulary shared by every other layer:
//! - Identifiers: [`TxnId`], [`TableId`], [`PartitionId`], [`Key`]
//! - Action outcomes: [`Decision`] and the client-visible [`TrxResult`]
//! - Partition-local lock modes: [`LockMode`]
//! - The error taxonomy: [`Error`], [`EnqueueError`], [`StorageError`]
//! - Engine configuration: [`DoraConfig`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod decision;
pub mod error;
pub mod lock_mode;
pub mod types;

pub use config::{CpuPlacement, DoraConfig};
pub use decision::{AtomicDecision, Decision, TrxResult, TrxStatus};
pub use error::{EnqueueError, Error, Result, StorageError};
pub use lock_mode::LockMode;
pub use types::{Key, PartitionId, TableId, TxnId};
