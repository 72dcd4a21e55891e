//! # DoraDB
//!
//! Data-oriented transaction execution: every table is split into logical
//! partitions, each served by its own worker threads, and a transaction is
//! decomposed into per-partition actions joined by rendezvous points
//! instead of running on one thread against a shared lock manager.
//!
//! ## Quick Start
//!
//! ```no_run
//! use doradb::prelude::*;
//!
//! let db = Dora::builder().warehouses(4).partitions(4).open()?;
//!
//! // hand-written input
//! let paid = db.payment(PaymentInput::local(1, 1, 42, 1_500))?.wait()?;
//! assert!(paid.is_committed());
//!
//! // generated input
//! let mut inputs = db.input_builder();
//! let order = db.new_order(inputs.new_order(None))?.wait()?;
//! println!("{:?}", order.status);
//!
//! db.close();
//! # Ok::<(), doradb::Error>(())
//! ```
//!
//! ## Layers
//!
//! - [`doradb_core`]: ids, decisions, lock modes, errors, configuration
//! - [`doradb_storage`]: the storage-manager collaborator
//! - [`doradb_concurrency`]: caches, lock tables, partitions, RVPs
//! - [`doradb_engine`]: the transaction types and their coordinators
//! - this crate: the [`Dora`] facade

#![warn(missing_docs)]
#![warn(clippy::all)]

mod database;
mod error;

pub mod prelude;

pub use database::{DatabaseMetrics, Dora, DoraBuilder};
pub use error::{Error, Result};

pub use doradb_concurrency;
pub use doradb_core;
pub use doradb_engine;
pub use doradb_storage;

pub use doradb_core::{DoraConfig, TrxResult, TrxStatus, TxnId};
pub use doradb_engine::{
    MbenchInput, NewOrderInput, OrderLine, PaymentInput, TpccInputBuilder, TpccScale, TrxFuture,
    TrxKind, TrxStats,
};
