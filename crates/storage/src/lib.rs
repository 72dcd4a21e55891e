//! Storage-manager layer for DoraDB
//!
//! The partitioned execution core treats storage as a collaborator that
//! offers transaction boundaries and tuple-level access:
//! - [`StorageManager`]: begin/commit/abort plus get/put/insert
//! - [`MemoryStorage`]: DashMap-sharded in-memory implementation with
//!   per-transaction undo images so aborts restore before-images
//!
//! Durability and recovery are out of scope here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod sharded;

pub use manager::{StorageManager, TxnHandle};
pub use sharded::{MemoryStorage, StorageStats, TableShard};
