//! TPC-C transactions on the partitioned execution core
//!
//! This crate wires the core's partitions, actions and RVPs to a concrete
//! workload:
//! - [`schema`]: tables, rows and keys, all keyed by warehouse first
//! - [`input`]: transaction inputs and the [`TpccInputBuilder`]
//! - [`populate`]: initial database load
//! - [`action`]: [`TpccAction`], every per-partition slice of every type
//! - [`completion`]: midway and terminal RVP completions
//! - [`env`]: [`TpccEnv`], the tables, caches, storage and counters
//! - [`coordinator`]: `submit_payment`, `submit_new_order`,
//!   `submit_mbench_wh` and `submit_mbench_cust`
//! - [`future`]: [`TrxFuture`], the caller's handle on a result
//!
//! # Example
//!
//! ```no_run
//! use doradb_core::DoraConfig;
//! use doradb_engine::{populate, PaymentInput, Store, TpccEnv, TpccScale};
//! use std::sync::Arc;
//!
//! let scale = TpccScale::tiny(2);
//! let store = Arc::new(Store::new());
//! populate(&store, &scale);
//! let env = TpccEnv::new(DoraConfig::default(), scale, store)?;
//! env.start()?;
//!
//! let result = env.submit_payment(PaymentInput::local(1, 1, 1, 1_000))?.wait()?;
//! assert!(result.is_committed());
//! env.shutdown();
//! # Ok::<(), doradb_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod completion;
pub mod coordinator;
pub mod env;
pub mod future;
pub mod input;
pub mod populate;
pub mod schema;
pub mod stats;

pub use action::{ActionBody, ActionKind, PaymentNames, Store, TpccAction};
pub use completion::{PaymentMidway, Terminal};
pub use env::{warehouse_ranges, ActionCaches, TpccEnv};
pub use future::TrxFuture;
pub use input::{
    MbenchInput, NewOrderInput, OrderLine, PaymentInput, TpccInputBuilder, MAX_AMOUNT, MAX_QUANTITY,
};
pub use populate::{populate, PopulateStats};
pub use schema::{Credit, TpccScale, Tuple};
pub use stats::{StatsBoard, TrxKind, TrxStats};
