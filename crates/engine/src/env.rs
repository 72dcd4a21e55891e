//! The TPC-C environment
//!
//! Owns everything a running engine needs: one [`Table`] of partitions per
//! schema table, the action and RVP caches, the storage manager and the
//! per-kind counters. The coordinators in [`crate::coordinator`] are
//! methods on it.
//!
//! # Partitioning
//!
//! Every table is range-partitioned on the warehouse id that leads all of
//! its keys. With `W` warehouses and `P` partitions per table, partition
//! `i` serves warehouses `[1 + i*k, 1 + (i+1)*k)` where `k = ceil(W/P)`,
//! so one partition per warehouse when `P >= W`.

use doradb_concurrency::{ObjectCache, Partition, PartitionStats, Pooled, Rvp, Table};
use doradb_core::{DoraConfig, Error, PartitionId, Result, TableId, TxnId};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::action::{ActionKind, Store, TpccAction};
use crate::completion::{PaymentMidway, Terminal};
use crate::schema::{TpccScale, CUSTOMER, DISTRICT, HISTORY, STOCK, WAREHOUSE};
use crate::stats::{StatsBoard, TrxKind, TrxStats};

/// One action cache per [`ActionKind`]
#[derive(Debug)]
pub struct ActionCaches {
    caches: Vec<ObjectCache<TpccAction>>,
}

impl ActionCaches {
    /// Pre-fill every cache with `capacity` actions
    pub fn new(capacity: usize) -> Self {
        let caches = ActionKind::ALL
            .iter()
            .map(|kind| ObjectCache::new(kind.label(), capacity))
            .collect();
        ActionCaches { caches }
    }

    /// Cache of one kind
    pub fn cache(&self, kind: ActionKind) -> &ObjectCache<TpccAction> {
        &self.caches[kind.slot()]
    }

    /// Borrow an action of `kind`
    pub fn borrow(&self, kind: ActionKind) -> Result<Pooled<TpccAction>> {
        self.cache(kind).borrow()
    }

    /// Actions currently out of every cache
    pub fn live(&self) -> u64 {
        self.caches.iter().map(|c| c.live()).sum()
    }
}

/// Warehouse ranges for `partitions` partitions over `warehouses` warehouses
pub fn warehouse_ranges(warehouses: u64, partitions: usize) -> Vec<Range<u64>> {
    let warehouses = warehouses.max(1);
    let parts = (partitions as u64).clamp(1, warehouses);
    let per = (warehouses + parts - 1) / parts;
    let mut ranges = Vec::with_capacity(parts as usize);
    let mut lo = 1;
    while lo <= warehouses {
        let hi = (lo + per).min(warehouses + 1);
        ranges.push(lo..hi);
        lo = hi;
    }
    ranges
}

/// Tables, caches, storage and counters of a TPC-C engine
pub struct TpccEnv {
    pub(crate) config: DoraConfig,
    pub(crate) scale: TpccScale,
    per_partition: u64,
    pub(crate) store: Arc<Store>,
    pub(crate) warehouse: Table<TpccAction>,
    pub(crate) district: Table<TpccAction>,
    pub(crate) customer: Table<TpccAction>,
    pub(crate) history: Table<TpccAction>,
    pub(crate) stock: Table<TpccAction>,
    pub(crate) actions: ActionCaches,
    pub(crate) midway_rvps: ObjectCache<Rvp<PaymentMidway>>,
    pub(crate) terminal_rvps: ObjectCache<Rvp<Terminal>>,
    pub(crate) stats: Arc<StatsBoard>,
    next_txn: AtomicU64,
    started: AtomicBool,
}

impl TpccEnv {
    /// Build the environment over an already populated store
    ///
    /// Workers are not running until [`TpccEnv::start`].
    pub fn new(config: DoraConfig, scale: TpccScale, store: Arc<Store>) -> Result<Arc<Self>> {
        config.validate()?;
        if scale.warehouses == 0 {
            return Err(Error::Config("at least one warehouse is needed".into()));
        }
        let ranges = warehouse_ranges(scale.warehouses, config.partitions_per_table);
        let per_partition = ranges.first().map(|r| r.end - r.start).unwrap_or(1);
        let table = |id: TableId, name: &'static str| {
            Table::with_ranges(id, name, ranges.clone(), &config)
        };

        let env = TpccEnv {
            warehouse: table(WAREHOUSE, "warehouse")?,
            district: table(DISTRICT, "district")?,
            customer: table(CUSTOMER, "customer")?,
            history: table(HISTORY, "history")?,
            stock: table(STOCK, "stock")?,
            actions: ActionCaches::new(config.action_cache_size),
            midway_rvps: ObjectCache::new("rvp-pay-midway", config.rvp_cache_size),
            terminal_rvps: ObjectCache::new("rvp-terminal", config.rvp_cache_size),
            stats: Arc::new(StatsBoard::new()),
            next_txn: AtomicU64::new(1),
            started: AtomicBool::new(false),
            per_partition,
            config,
            scale,
            store,
        };
        info!(
            warehouses = scale.warehouses,
            partitions = env.warehouse.len(),
            warehouses_per_partition = per_partition,
            "environment built"
        );
        Ok(Arc::new(env))
    }

    /// Spawn the workers of every table
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::Internal("environment already started".into()));
        }
        for table in self.tables() {
            table.start(Arc::clone(&self.store), &self.config)?;
        }
        Ok(())
    }

    /// Close every partition and join the workers
    ///
    /// Actions already queued still run; transactions whose next wave
    /// cannot be enqueued any more finish Aborted.
    pub fn shutdown(&self) {
        for table in self.tables() {
            table.close();
        }
        for table in self.tables() {
            table.join();
        }
    }

    /// Every table, in id order
    pub fn tables(&self) -> [&Table<TpccAction>; 5] {
        [
            &self.warehouse,
            &self.district,
            &self.customer,
            &self.history,
            &self.stock,
        ]
    }

    /// Table by id
    pub fn table(&self, id: TableId) -> Option<&Table<TpccAction>> {
        self.tables().into_iter().find(|t| t.id() == id)
    }

    /// Partition of `table` serving warehouse `wh`
    ///
    /// Warehouses outside the database map past the last partition and
    /// fail as [`EnqueueError::Invalid`](doradb_core::EnqueueError::Invalid).
    pub fn route(&self, table: &Table<TpccAction>, wh: u64) -> Result<Arc<Partition<TpccAction>>> {
        let index = if wh == 0 || wh > self.scale.warehouses {
            PartitionId(table.len())
        } else {
            PartitionId(((wh - 1) / self.per_partition) as usize)
        };
        Ok(Arc::clone(table.partition(index)?))
    }

    /// Engine configuration
    pub fn config(&self) -> &DoraConfig {
        &self.config
    }

    /// Database size
    pub fn scale(&self) -> &TpccScale {
        &self.scale
    }

    /// Storage manager
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Action caches
    pub fn action_caches(&self) -> &ActionCaches {
        &self.actions
    }

    /// RVPs currently out of their caches
    pub fn live_rvps(&self) -> u64 {
        self.midway_rvps.live() + self.terminal_rvps.live()
    }

    /// Counters of one transaction kind
    pub fn stats(&self, kind: TrxKind) -> TrxStats {
        self.stats.get(kind)
    }

    /// Counters summed over every kind
    pub fn total_stats(&self) -> TrxStats {
        self.stats.total()
    }

    /// Partition counters of every table
    pub fn partition_stats(&self) -> Vec<(TableId, Vec<PartitionStats>)> {
        self.tables()
            .into_iter()
            .map(|t| (t.id(), t.stats()))
            .collect()
    }

    pub(crate) fn next_txn_id(&self) -> TxnId {
        TxnId(self.next_txn.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for TpccEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpccEnv")
            .field("scale", &self.scale)
            .field("partitions_per_table", &self.warehouse.len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}
