//! Partitioned, data-oriented execution core
//!
//! A transaction is decomposed into per-partition actions synchronized by
//! rendezvous points (RVPs). Every partition serializes the actions routed to
//! it with its own worker thread(s) and lock table, so there is no global lock
//! manager.
//!
//! - [`ObjectCache`]: recycling pools for actions and RVPs
//! - [`LockTable`]: per-partition key locks with bulk clearing
//! - [`Action`]: one partition's slice of a transaction
//! - [`Rvp`]: wave barrier aggregating action decisions
//! - [`Partition`] / [`Table`]: queues, lock tables and worker threads
//! - [`Wave`] / [`enqueue_chain`]: the hand-over-hand multi-partition enqueue

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod cache;
pub mod enqueue;
pub mod lock_table;
pub mod partition;
pub mod rvp;
mod worker;

pub use action::{Action, ActionHeader, ActionState, KeySet, LockPolicy};
pub use cache::{CacheStats, ObjectCache, Pooled, Recyclable};
pub use enqueue::{enqueue_chain, ChainError, Wave};
pub use lock_table::LockTable;
pub use partition::{Partition, PartitionPolicy, PartitionStats, Table};
pub use rvp::{
    Completion, HeldLocks, LockRelease, Rendezvous, Rvp, RvpHandle, TicketId, WaveOutcome,
};
