//! Convenient imports for DoraDB
//!
//! ```no_run
//! use doradb::prelude::*;
//!
//! let db = Dora::builder().warehouses(1).open()?;
//! let result = db.mbench_wh(MbenchInput { wh: 1, d: 1, c_id: 1, amount: 5 })?.wait()?;
//! assert_eq!(result.status, TrxStatus::Committed);
//! # Ok::<(), doradb::Error>(())
//! ```

// Main entry point
pub use crate::database::{Dora, DoraBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Configuration
pub use doradb_core::DoraConfig;
pub use doradb_engine::TpccScale;

// Transaction inputs
pub use doradb_engine::{MbenchInput, NewOrderInput, OrderLine, PaymentInput, TpccInputBuilder};

// Results
pub use doradb_core::{TrxResult, TrxStatus};
pub use doradb_engine::{TrxFuture, TrxKind, TrxStats};
