//! Main entry point for DoraDB
//!
//! [`Dora`] owns a running engine: the populated store, the partitions of
//! every table and their workers. Build one with [`Dora::builder`].

use crate::error::{Error, Result};
use doradb_core::DoraConfig;
use doradb_engine::{
    populate, MbenchInput, NewOrderInput, PaymentInput, Store, TpccEnv, TpccInputBuilder,
    TpccScale, TrxFuture, TrxKind, TrxStats,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A running DoraDB engine
///
/// Transactions are submitted through the `payment`, `new_order`,
/// `mbench_wh` and `mbench_cust` methods, each returning a [`TrxFuture`]
/// that resolves once the transaction has committed or aborted.
/// Dropping the engine closes every partition and joins the workers.
///
/// # Example
///
/// ```no_run
/// use doradb::prelude::*;
///
/// let db = Dora::builder().warehouses(2).partitions(2).open()?;
/// let result = db.payment(PaymentInput::local(1, 1, 1, 1_000))?.wait()?;
/// assert!(result.is_committed());
/// # Ok::<(), doradb::Error>(())
/// ```
pub struct Dora {
    env: Arc<TpccEnv>,
}

impl Dora {
    /// Builder with default settings
    pub fn builder() -> DoraBuilder {
        DoraBuilder::new()
    }

    /// Open an engine configured by a TOML file
    ///
    /// See [`DoraBuilder::from_file`] for the format.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        DoraBuilder::from_file(path)?.open()
    }

    /// Submit a Payment
    pub fn payment(&self, input: PaymentInput) -> Result<TrxFuture> {
        self.env.submit_payment(input).map_err(Into::into)
    }

    /// Submit a NewOrder
    pub fn new_order(&self, input: NewOrderInput) -> Result<TrxFuture> {
        self.env.submit_new_order(input).map_err(Into::into)
    }

    /// Submit a single-row warehouse update
    pub fn mbench_wh(&self, input: MbenchInput) -> Result<TrxFuture> {
        self.env.submit_mbench_wh(input).map_err(Into::into)
    }

    /// Submit a single-row customer update
    pub fn mbench_cust(&self, input: MbenchInput) -> Result<TrxFuture> {
        self.env.submit_mbench_cust(input).map_err(Into::into)
    }

    /// Input generator for this database's scale
    pub fn input_builder(&self) -> TpccInputBuilder {
        TpccInputBuilder::new(*self.env.scale())
    }

    /// Reproducible input generator for this database's scale
    pub fn seeded_input_builder(&self, seed: u64) -> TpccInputBuilder {
        TpccInputBuilder::seeded(*self.env.scale(), seed)
    }

    /// Engine configuration
    pub fn config(&self) -> &DoraConfig {
        self.env.config()
    }

    /// Database size
    pub fn scale(&self) -> &TpccScale {
        self.env.scale()
    }

    /// Counters of one transaction type
    pub fn stats(&self, kind: TrxKind) -> TrxStats {
        self.env.stats(kind)
    }

    /// Engine metrics
    pub fn metrics(&self) -> DatabaseMetrics {
        let total = self.env.total_stats();
        let commit_rate = if total.finished() == 0 {
            0.0
        } else {
            total.committed as f64 / total.finished() as f64
        };
        DatabaseMetrics {
            transactions_attempted: total.attempted,
            transactions_committed: total.committed,
            transactions_aborted: total.aborted,
            transactions_deadlocked: total.deadlocked,
            transactions_in_flight: total.in_flight(),
            commit_rate,
            live_actions: self.env.action_caches().live(),
            live_rvps: self.env.live_rvps(),
        }
    }

    /// The engine underneath, for partition-level inspection
    pub fn env(&self) -> &Arc<TpccEnv> {
        &self.env
    }

    /// Close every partition and join the workers
    ///
    /// Queued actions still run; later submissions fail with
    /// [`Error::NotStarted`]. Calling it again is a no-op.
    pub fn close(&self) {
        self.env.shutdown();
    }
}

impl Drop for Dora {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Dora {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dora").field("env", &self.env).finish()
    }
}

/// Engine metrics
#[derive(Debug, Clone)]
pub struct DatabaseMetrics {
    /// Transactions submitted
    pub transactions_attempted: u64,
    /// Transactions committed
    pub transactions_committed: u64,
    /// Transactions aborted by a rule, a storage error or shutdown
    pub transactions_aborted: u64,
    /// Transactions aborted by a lock-wait timeout
    pub transactions_deadlocked: u64,
    /// Transactions submitted but not yet finished
    pub transactions_in_flight: u64,
    /// Committed share of finished transactions (0.0 - 1.0)
    pub commit_rate: f64,
    /// Actions out of their caches
    pub live_actions: u64,
    /// Rendezvous points out of their caches
    pub live_rvps: u64,
}

/// Builder for a [`Dora`] engine
///
/// # Example
///
/// ```no_run
/// use doradb::prelude::*;
///
/// // 4 warehouses over 2 partitions per table, 2 workers each
/// let db = Dora::builder()
///     .warehouses(4)
///     .partitions(2)
///     .workers(2)
///     .open()?;
/// # Ok::<(), doradb::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DoraBuilder {
    config: DoraConfig,
    scale: TpccScale,
    populate: bool,
}

impl DoraBuilder {
    /// Default configuration over a one-warehouse database
    pub fn new() -> Self {
        DoraBuilder {
            config: DoraConfig::default(),
            scale: TpccScale::default(),
            populate: true,
        }
    }

    /// Builder from a TOML document
    ///
    /// Top-level keys are [`DoraConfig`] fields; an optional `[tpcc]`
    /// table sets the [`TpccScale`]:
    ///
    /// ```toml
    /// partitions_per_table = 2
    /// lock_wait_timeout_ms = 50
    ///
    /// [tpcc]
    /// warehouses = 2
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut table: toml::Table = text.parse()?;
        let scale = match table.remove("tpcc") {
            Some(value) => value.try_into::<TpccScale>()?,
            None => TpccScale::default(),
        };
        let config: DoraConfig = toml::Value::Table(table).try_into()?;
        config.validate()?;
        Ok(DoraBuilder {
            config,
            scale,
            populate: true,
        })
    }

    /// Builder from a TOML file, see [`DoraBuilder::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Replace the whole engine configuration
    pub fn config(mut self, config: DoraConfig) -> Self {
        self.config = config;
        self
    }

    /// Partitions per table
    pub fn partitions(mut self, n: usize) -> Self {
        self.config.partitions_per_table = n;
        self
    }

    /// Worker threads per partition
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers_per_partition = n;
        self
    }

    /// Lock waits longer than this abort with a Deadlock status
    pub fn lock_wait_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_wait_timeout_ms = ms;
        self
    }

    /// Replace the whole database size
    pub fn scale(mut self, scale: TpccScale) -> Self {
        self.scale = scale;
        self
    }

    /// Number of warehouses, keeping the other size settings
    pub fn warehouses(mut self, warehouses: u64) -> Self {
        self.scale.warehouses = warehouses;
        self
    }

    /// Start over empty tables instead of loading the initial database
    pub fn empty(mut self) -> Self {
        self.populate = false;
        self
    }

    /// Load the database, build the partitions and start the workers
    pub fn open(self) -> Result<Dora> {
        self.config.validate()?;
        if self.scale.warehouses == 0 {
            return Err(Error::Config("at least one warehouse is needed".into()));
        }
        let store = Arc::new(Store::new());
        if self.populate {
            populate(&store, &self.scale);
        }
        let env = TpccEnv::new(self.config, self.scale, store)?;
        env.start()?;
        info!(
            warehouses = self.scale.warehouses,
            partitions_per_table = env.config().partitions_per_table,
            workers_per_partition = env.config().workers_per_partition,
            "engine open"
        );
        Ok(Dora { env })
    }
}

impl Default for DoraBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_without_tpcc_section() {
        let b = DoraBuilder::from_toml_str("partitions_per_table = 3\n").unwrap();
        assert_eq!(b.config.partitions_per_table, 3);
        assert_eq!(b.scale, TpccScale::default());
    }

    #[test]
    fn test_toml_with_tpcc_section() {
        let text = r#"
            workers_per_partition = 2

            [cpu]
            starting = 0

            [tpcc]
            warehouses = 4
            items = 50
        "#;
        let b = DoraBuilder::from_toml_str(text).unwrap();
        assert_eq!(b.config.workers_per_partition, 2);
        assert_eq!(b.config.cpu.starting, 0);
        assert_eq!(b.scale.warehouses, 4);
        assert_eq!(b.scale.items, 50);
        assert_eq!(b.scale.districts_per_warehouse, 10);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            DoraBuilder::from_toml_str("partitions_per_table = \"many\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            DoraBuilder::from_toml_str("workers_per_partition = 0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            DoraBuilder::from_file("/nonexistent/dora.toml"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_builder_setters() {
        let b = Dora::builder()
            .partitions(4)
            .workers(2)
            .lock_wait_timeout_ms(20)
            .scale(TpccScale::tiny(1))
            .warehouses(3)
            .empty();
        assert_eq!(b.config.partitions_per_table, 4);
        assert_eq!(b.config.workers_per_partition, 2);
        assert_eq!(b.config.lock_wait_timeout_ms, 20);
        assert_eq!(b.scale, TpccScale::tiny(3));
        assert!(!b.populate);
    }

    #[test]
    fn test_open_rejects_zero_warehouses() {
        let err = Dora::builder().warehouses(0).empty().open().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
