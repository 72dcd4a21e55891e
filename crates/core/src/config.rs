//! Engine configuration
//!
//! Configuration can be assembled in code or loaded from TOML:
//!
//! ```toml
//! partitions_per_table = 4
//! workers_per_partition = 1
//! keys_touched_threshold = 10000
//! lock_wait_timeout_ms = 100
//!
//! [cpu]
//! starting = 2
//! range = 8
//! step_tables = 16
//! step_partitions = 2
//! ```
//!
//! Missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{PartitionId, TableId};

/// Minimum number of distinct keys a lock table touches before it is cleared
pub const DEFAULT_KEYS_TOUCHED_THRESHOLD: usize = 10_000;

/// Objects pre-allocated per action/RVP cache
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// Deterministic CPU assignment for partition workers
///
/// `cpu(table, part) = (starting + table * step_tables + (part * step_partitions) % range) % ncpus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuPlacement {
    /// First CPU handed out
    pub starting: usize,
    /// CPUs available to the partitions of one table
    pub range: usize,
    /// Distance between the first CPUs of consecutive tables
    pub step_tables: usize,
    /// Distance between consecutive partitions of one table
    pub step_partitions: usize,
}

impl Default for CpuPlacement {
    fn default() -> Self {
        CpuPlacement {
            starting: 2,
            range: 8,
            step_tables: 16,
            step_partitions: 2,
        }
    }
}

impl CpuPlacement {
    /// CPU for a partition, given the number of CPUs on the machine
    pub fn cpu_for(&self, table: TableId, partition: PartitionId, ncpus: usize) -> usize {
        let range = self.range.max(1);
        let ncpus = ncpus.max(1);
        let within_table = (partition.0 * self.step_partitions) % range;
        (self.starting + table.index() * self.step_tables + within_table) % ncpus
    }
}

/// Configuration for a DoraDB engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoraConfig {
    /// Partitions created for every table
    pub partitions_per_table: usize,
    /// Worker threads serving each partition
    pub workers_per_partition: usize,
    /// Distinct keys a lock table may touch before a bulk clear
    pub keys_touched_threshold: usize,
    /// Lock waits longer than this end the action with a Deadlock decision
    pub lock_wait_timeout_ms: u64,
    /// Actions pre-allocated per action cache
    pub action_cache_size: usize,
    /// RVPs pre-allocated per RVP cache
    pub rvp_cache_size: usize,
    /// Worker CPU placement
    pub cpu: CpuPlacement,
}

impl Default for DoraConfig {
    fn default() -> Self {
        DoraConfig {
            partitions_per_table: 1,
            workers_per_partition: 1,
            keys_touched_threshold: DEFAULT_KEYS_TOUCHED_THRESHOLD,
            lock_wait_timeout_ms: 100,
            action_cache_size: DEFAULT_CACHE_SIZE,
            rvp_cache_size: DEFAULT_CACHE_SIZE,
            cpu: CpuPlacement::default(),
        }
    }
}

impl DoraConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: DoraConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.partitions_per_table == 0 {
            return Err(Error::Config("partitions_per_table must be > 0".into()));
        }
        if self.workers_per_partition == 0 {
            return Err(Error::Config("workers_per_partition must be > 0".into()));
        }
        if self.keys_touched_threshold == 0 {
            return Err(Error::Config("keys_touched_threshold must be > 0".into()));
        }
        Ok(())
    }

    /// Lock wait timeout as a Duration
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}
