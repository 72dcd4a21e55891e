//! Partitions and partitioned tables
//!
//! A [`Partition`] is one independently served shard of a table. It owns:
//! - an enqueue-ordering lock, taken hand-over-hand by
//!   [`enqueue_chain`](crate::enqueue_chain)
//! - a FIFO action queue with a condvar for its workers
//! - a [`LockTable`] plus the release requests posted to it by finalizing
//!   transactions
//! - a monotonically increasing enqueue sequence number
//!
//! # Design
//!
//! The lock table is touched only by the partition's own workers. Other
//! threads that need a lock released (the terminal RVP of a transaction
//! that held it) post a request through [`LockRelease`]; a worker applies
//! it either before its next action or while it waits for a conflicting
//! lock.

use doradb_core::{
    Decision, DoraConfig, EnqueueError, Error, Key, LockMode, PartitionId, Result, TableId, TxnId,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::action::{Action, KeySet};
use crate::cache::Pooled;
use crate::enqueue::abandon;
use crate::lock_table::LockTable;
use crate::rvp::LockRelease;
use crate::worker;

/// Which keys a partition serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionPolicy {
    /// Keys whose leading field lies in `lo..hi`
    Range {
        /// Inclusive lower bound
        lo: u64,
        /// Exclusive upper bound
        hi: u64,
    },
    /// Keys whose leading field modulo the partition count equals the index
    Hash,
}

/// Snapshot of a partition's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    /// Actions accepted by `enqueue`
    pub enqueued: u64,
    /// Actions that ran `trx_exec`
    pub executed: u64,
    /// Local Commit decisions
    pub committed: u64,
    /// Local Abort decisions
    pub aborted: u64,
    /// Lock waits that ran out of time
    pub deadlocked: u64,
    /// Actions skipped because their wave was poisoned
    pub died: u64,
    /// Lock requests that had to wait at least once
    pub lock_waits: u64,
    /// Bulk lock-table clears
    pub lock_clears: u64,
    /// Actions waiting in the queue
    pub queued: usize,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    executed: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    deadlocked: AtomicU64,
    died: AtomicU64,
    lock_waits: AtomicU64,
    lock_clears: AtomicU64,
}

struct QueueState<A: Action> {
    actions: VecDeque<Pooled<A>>,
    closed: bool,
}

struct LockState {
    table: LockTable,
    pending_releases: Vec<(TxnId, SmallVec<[Key; 4]>)>,
}

/// Next thing a worker should do
pub(crate) enum Work<A: Action> {
    /// Run this action
    Run(Pooled<A>),
    /// Apply posted lock releases
    Releases,
    /// Queue closed and drained; exit
    Closed,
}

/// One partition of a table
pub struct Partition<A: Action> {
    table: TableId,
    index: PartitionId,
    policy: PartitionPolicy,
    cpu: usize,
    lock_wait_timeout: Duration,
    enqueue_lock: Mutex<()>,
    queue: Mutex<QueueState<A>>,
    queue_cv: Condvar,
    locks: Mutex<LockState>,
    locks_cv: Condvar,
    releases_posted: AtomicBool,
    seq: AtomicU64,
    counters: Counters,
}

impl<A: Action> Partition<A> {
    /// Create an open partition with an empty queue and lock table
    pub fn new(
        table: TableId,
        index: PartitionId,
        policy: PartitionPolicy,
        config: &DoraConfig,
    ) -> Self {
        let ncpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            table,
            index,
            policy,
            cpu: config.cpu.cpu_for(table, index, ncpus),
            lock_wait_timeout: config.lock_wait_timeout(),
            enqueue_lock: Mutex::new(()),
            queue: Mutex::new(QueueState {
                actions: VecDeque::new(),
                closed: false,
            }),
            queue_cv: Condvar::new(),
            locks: Mutex::new(LockState {
                table: LockTable::new(config.keys_touched_threshold),
                pending_releases: Vec::new(),
            }),
            locks_cv: Condvar::new(),
            releases_posted: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Owning table
    pub fn table_id(&self) -> TableId {
        self.table
    }

    /// Index inside the table
    pub fn index(&self) -> PartitionId {
        self.index
    }

    /// Key-range or hash definition
    pub fn policy(&self) -> &PartitionPolicy {
        &self.policy
    }

    /// CPU assigned by the placement formula
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Has the partition been closed?
    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    fn closed_error(&self) -> EnqueueError {
        EnqueueError::Closed {
            table: self.table,
            partition: self.index,
        }
    }

    /// Take the enqueue-ordering lock
    pub(crate) fn lock_enqueue(&self) -> MutexGuard<'_, ()> {
        self.enqueue_lock.lock()
    }

    /// Append `action` while the caller holds this partition's enqueue lock
    ///
    /// On failure the action is handed back untouched.
    pub(crate) fn push_locked(
        &self,
        _order: &MutexGuard<'_, ()>,
        mut action: Pooled<A>,
    ) -> std::result::Result<u64, (EnqueueError, Pooled<A>)> {
        let mut queue = self.queue.lock();
        if queue.closed {
            return Err((self.closed_error(), action));
        }
        let seq = self.seq.fetch_add(1, Ordering::AcqRel);
        let header = action.header_mut();
        header.partition = self.index;
        header.enqueue_seq = seq;
        let txn = header.txn_id;
        trace!(
            table = %self.table,
            partition = %self.index,
            %txn,
            seq,
            action = action.label(),
            "enqueued"
        );
        queue.actions.push_back(action);
        drop(queue);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.queue_cv.notify_one();
        Ok(seq)
    }

    /// Append one action under the enqueue lock
    ///
    /// Returns the sequence number the action was stamped with. On failure
    /// the action is abandoned: its wave is aborted and it reports Die.
    pub fn enqueue(&self, action: Pooled<A>) -> std::result::Result<u64, EnqueueError> {
        let order = self.lock_enqueue();
        let pushed = self.push_locked(&order, action);
        drop(order);
        pushed.map_err(|(err, action)| {
            abandon(action);
            err
        })
    }

    /// Stop accepting actions and wake every worker
    ///
    /// Actions already queued are still executed.
    pub fn close(&self) {
        let mut queue = self.queue.lock();
        if !queue.closed {
            queue.closed = true;
            debug!(table = %self.table, partition = %self.index, queued = queue.actions.len(), "partition closed");
        }
        drop(queue);
        self.queue_cv.notify_all();
        self.locks_cv.notify_all();
    }

    /// Block until there is something to do
    pub(crate) fn next_work(&self) -> Work<A> {
        let mut queue = self.queue.lock();
        loop {
            if self.releases_posted.load(Ordering::Acquire) {
                return Work::Releases;
            }
            if let Some(action) = queue.actions.pop_front() {
                return Work::Run(action);
            }
            if queue.closed {
                return Work::Closed;
            }
            self.queue_cv.wait(&mut queue);
        }
    }

    fn apply_pending(&self, state: &mut LockState) -> bool {
        self.releases_posted.store(false, Ordering::Release);
        if state.pending_releases.is_empty() {
            return false;
        }
        for (txn, keys) in state.pending_releases.drain(..) {
            state.table.release_all(txn, keys.iter());
        }
        true
    }

    /// Apply every posted release
    pub(crate) fn apply_releases(&self) {
        let mut state = self.locks.lock();
        if self.apply_pending(&mut state) {
            drop(state);
            self.locks_cv.notify_all();
        }
    }

    /// Acquire every lock in `keys` for `txn`
    ///
    /// Either all locks are granted or none is kept: a partial grant is
    /// rolled back before waiting. While waiting, posted releases are
    /// applied. Returns `false` once the lock-wait timeout has passed.
    pub(crate) fn acquire_all(&self, txn: TxnId, keys: &KeySet) -> bool {
        let mut state = self.locks.lock();
        let deadline = Instant::now() + self.lock_wait_timeout;
        let mut waited = false;
        let mut expired = false;
        let mut fresh: SmallVec<[&Key; 4]> = SmallVec::new();

        loop {
            self.apply_pending(&mut state);

            fresh.clear();
            let mut granted = true;
            for (key, mode) in keys.iter() {
                let already = state.table.holds(key, txn);
                if !state.table.acquire(key, *mode, txn) {
                    granted = false;
                    break;
                }
                if !already {
                    fresh.push(key);
                }
            }

            if granted {
                if state.table.maybe_clear() {
                    self.counters.lock_clears.fetch_add(1, Ordering::Relaxed);
                }
                return true;
            }

            for key in fresh.iter() {
                state.table.release(key, txn);
            }

            if expired {
                warn!(
                    table = %self.table,
                    partition = %self.index,
                    %txn,
                    timeout_ms = self.lock_wait_timeout.as_millis() as u64,
                    "lock wait timed out"
                );
                return false;
            }

            if !waited {
                waited = true;
                self.counters.lock_waits.fetch_add(1, Ordering::Relaxed);
            }

            // after a timeout, retry once with whatever was released meanwhile
            expired = self.locks_cv.wait_until(&mut state, deadline).timed_out();
        }
    }

    /// Release `txn`'s locks on `keys` right away
    pub(crate) fn release<'a>(&self, txn: TxnId, keys: impl IntoIterator<Item = &'a Key>) {
        let mut state = self.locks.lock();
        state.table.release_all(txn, keys);
        drop(state);
        self.locks_cv.notify_all();
    }

    pub(crate) fn count_decision(&self, decision: Decision) {
        let counter = match decision {
            Decision::Commit => &self.counters.committed,
            Decision::Abort => &self.counters.aborted,
            Decision::Deadlock => &self.counters.deadlocked,
            Decision::Die => &self.counters.died,
            Decision::Undecided => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if matches!(decision, Decision::Commit | Decision::Abort) {
            self.counters.executed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current mode of `key` in this partition's lock table
    pub fn lock_mode(&self, key: &Key) -> LockMode {
        self.locks.lock().table.mode(key)
    }

    /// Keys with at least one live holder
    pub fn held_keys(&self) -> usize {
        self.locks.lock().table.held_keys()
    }

    /// Counter snapshot
    pub fn stats(&self) -> PartitionStats {
        let c = &self.counters;
        PartitionStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            executed: c.executed.load(Ordering::Relaxed),
            committed: c.committed.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
            deadlocked: c.deadlocked.load(Ordering::Relaxed),
            died: c.died.load(Ordering::Relaxed),
            lock_waits: c.lock_waits.load(Ordering::Relaxed),
            lock_clears: c.lock_clears.load(Ordering::Relaxed),
            queued: self.queue.lock().actions.len(),
        }
    }
}

impl<A: Action> LockRelease for Partition<A> {
    fn post_release(&self, txn: TxnId, keys: SmallVec<[Key; 4]>) {
        {
            let mut state = self.locks.lock();
            state.pending_releases.push((txn, keys));
            self.releases_posted.store(true, Ordering::Release);
        }
        self.locks_cv.notify_all();
        // idle workers sleep on the queue condvar
        let _queue = self.queue.lock();
        self.queue_cv.notify_one();
    }
}

impl<A: Action> std::fmt::Debug for Partition<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("table", &self.table)
            .field("index", &self.index)
            .field("policy", &self.policy)
            .field("cpu", &self.cpu)
            .finish()
    }
}

/// The ordered partitions of one logical table
pub struct Table<A: Action> {
    id: TableId,
    name: &'static str,
    partitions: Vec<Arc<Partition<A>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: Action> Table<A> {
    /// Create `count` hash partitions
    pub fn new(id: TableId, name: &'static str, count: usize, config: &DoraConfig) -> Self {
        let partitions = (0..count.max(1))
            .map(|i| Arc::new(Partition::new(id, PartitionId(i), PartitionPolicy::Hash, config)))
            .collect();
        Self {
            id,
            name,
            partitions,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Create one range partition per entry of `ranges`
    ///
    /// Ranges are matched on the key's leading field; keys outside every
    /// range go to the nearest end partition.
    pub fn with_ranges(
        id: TableId,
        name: &'static str,
        ranges: Vec<Range<u64>>,
        config: &DoraConfig,
    ) -> Result<Self> {
        if ranges.is_empty() {
            return Err(Error::Config(format!("table {} needs at least one range", name)));
        }
        let partitions = ranges
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let policy = PartitionPolicy::Range {
                    lo: r.start,
                    hi: r.end,
                };
                Arc::new(Partition::new(id, PartitionId(i), policy, config))
            })
            .collect();
        Ok(Self {
            id,
            name,
            partitions,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Table id
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Table name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Always false: a table has at least one partition
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// All partitions in index order
    pub fn partitions(&self) -> &[Arc<Partition<A>>] {
        &self.partitions
    }

    /// Look up a partition by index
    pub fn partition(&self, index: PartitionId) -> std::result::Result<&Arc<Partition<A>>, EnqueueError> {
        self.partitions
            .get(index.0)
            .ok_or(EnqueueError::Invalid {
                table: self.id,
                partition: index,
                count: self.partitions.len(),
            })
    }

    /// Partition that serves `key`
    pub fn partition_for(&self, key: &Key) -> PartitionId {
        let leading = key.leading().unwrap_or(0);
        let count = self.partitions.len();
        let first = &self.partitions[0];
        match first.policy() {
            PartitionPolicy::Hash => PartitionId((leading % count as u64) as usize),
            PartitionPolicy::Range { lo, .. } if leading < *lo => PartitionId(0),
            PartitionPolicy::Range { .. } => {
                let found = self.partitions.iter().position(|p| match p.policy() {
                    PartitionPolicy::Range { lo, hi } => (*lo..*hi).contains(&leading),
                    PartitionPolicy::Hash => false,
                });
                PartitionId(found.unwrap_or(count - 1))
            }
        }
    }

    /// Partition that serves `key`, as a handle
    pub fn route(&self, key: &Key) -> &Arc<Partition<A>> {
        &self.partitions[self.partition_for(key).0]
    }

    /// Enqueue a single action into partition `index`
    ///
    /// On failure the action is abandoned (its wave aborts) and the error is
    /// returned to the caller.
    pub fn enqueue(&self, action: Pooled<A>, index: PartitionId) -> std::result::Result<u64, EnqueueError> {
        match self.partition(index) {
            Ok(partition) => partition.enqueue(action),
            Err(err) => {
                abandon(action);
                Err(err)
            }
        }
    }

    /// Spawn the worker threads of every partition
    pub fn start(&self, env: Arc<A::Env>, config: &DoraConfig) -> Result<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Err(Error::Internal(format!("table {} already started", self.name)));
        }
        for partition in &self.partitions {
            for n in 0..config.workers_per_partition {
                let handle = worker::spawn(self.name, Arc::clone(partition), Arc::clone(&env), n)
                    .map_err(|e| Error::Internal(format!("failed to spawn worker: {}", e)))?;
                workers.push(handle);
            }
            info!(
                table = self.name,
                partition = %partition.index(),
                cpu = partition.cpu(),
                workers = config.workers_per_partition,
                "partition started"
            );
        }
        Ok(())
    }

    /// Close every partition
    pub fn close(&self) {
        for partition in &self.partitions {
            partition.close();
        }
    }

    /// Wait for every worker to exit (call after [`Table::close`])
    pub fn join(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let count = workers.len();
        for handle in workers {
            if handle.join().is_err() {
                warn!(table = self.name, "worker panicked");
            }
        }
        if count > 0 {
            info!(table = self.name, workers = count, "table stopped");
        }
    }

    /// Close and join
    pub fn shutdown(&self) {
        self.close();
        self.join();
    }

    /// Counter snapshot of every partition
    pub fn stats(&self) -> Vec<PartitionStats> {
        self.partitions.iter().map(|p| p.stats()).collect()
    }
}

impl<A: Action> std::fmt::Debug for Table<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}
