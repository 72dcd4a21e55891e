//! End-to-end tests of partitions, workers, RVPs and the enqueue chain
//!
//! A scripted action type stands in for real transaction logic: each
//! action locks one key, optionally blocks on a gate or sleeps, records
//! that it ran, and returns the decision it was scripted with.

use doradb_concurrency::{
    Action, ActionHeader, Completion, KeySet, LockPolicy, ObjectCache, Partition, Pooled,
    Recyclable, Rvp, RvpHandle, Table, Wave, WaveOutcome,
};
use doradb_core::{Decision, DoraConfig, EnqueueError, Key, LockMode, PartitionId, TableId, TxnId};
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Scripted action
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Script {
    key: u64,
    decision: Decision,
    hold: bool,
    gate: bool,
    sleep_ms: u64,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            key: 0,
            decision: Decision::Commit,
            hold: false,
            gate: false,
            sleep_ms: 0,
        }
    }
}

fn key(k: u64) -> Script {
    Script {
        key: k,
        ..Script::default()
    }
}

#[derive(Default)]
struct Scripted {
    header: ActionHeader,
    script: Script,
}

impl Recyclable for Scripted {
    fn reset(&mut self) {
        self.header.reset();
        self.script = Script::default();
    }
}

#[derive(Default)]
struct ScriptEnv {
    started: Mutex<Vec<TxnId>>,
    writes: Mutex<Vec<(TxnId, PartitionId, u64)>>,
    gate_open: Mutex<bool>,
    gate: Condvar,
}

impl ScriptEnv {
    fn open_gate(&self) {
        *self.gate_open.lock() = true;
        self.gate.notify_all();
    }

    fn wrote(&self, txn: u64) -> Vec<PartitionId> {
        self.writes
            .lock()
            .iter()
            .filter(|(t, _, _)| *t == TxnId(txn))
            .map(|(_, p, _)| *p)
            .collect()
    }
}

impl Action for Scripted {
    type Env = ScriptEnv;

    fn header(&self) -> &ActionHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ActionHeader {
        &mut self.header
    }

    fn label(&self) -> &'static str {
        "scripted"
    }

    fn calc_keys(&self, keys: &mut KeySet) {
        keys.add(Key::from([self.script.key]), LockMode::Excl);
    }

    fn trx_exec(&mut self, env: &ScriptEnv) -> Decision {
        env.started.lock().push(self.header.txn_id);
        if self.script.gate {
            let mut open = env.gate_open.lock();
            while !*open {
                env.gate.wait(&mut open);
            }
        }
        if self.script.sleep_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.script.sleep_ms));
        }
        env.writes.lock().push((
            self.header.txn_id,
            self.header.partition,
            self.header.enqueue_seq,
        ));
        self.script.decision
    }

    fn lock_policy(&self) -> LockPolicy {
        if self.script.hold {
            LockPolicy::HoldUntilTerminal
        } else {
            LockPolicy::Immediate
        }
    }
}

/// Terminal completion: release held locks (unless told to leak them) and
/// hand the decision back
struct Done {
    tx: Sender<Decision>,
    release: bool,
}

impl Completion for Done {
    fn complete(self, mut outcome: WaveOutcome) {
        if self.release {
            outcome.release_locks();
        }
        let _ = self.tx.send(outcome.decision);
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    table: Table<Scripted>,
    env: Arc<ScriptEnv>,
    actions: ObjectCache<Scripted>,
    rvps: ObjectCache<Rvp<Done>>,
}

impl Harness {
    fn new(config: DoraConfig) -> Self {
        let table = Table::new(TableId(0), "scripted", config.partitions_per_table, &config);
        let env = Arc::new(ScriptEnv::default());
        table.start(Arc::clone(&env), &config).unwrap();
        Harness {
            table,
            env,
            actions: ObjectCache::new("scripted", config.action_cache_size),
            rvps: ObjectCache::new("rvp", config.rvp_cache_size),
        }
    }

    fn partition(&self, p: usize) -> &Arc<Partition<Scripted>> {
        self.table.partition(PartitionId(p)).unwrap()
    }

    fn action(&self, script: Script) -> Pooled<Scripted> {
        let mut action = self.actions.borrow().unwrap();
        action.script = script;
        action
    }

    fn submit_with(&self, txn: u64, steps: Vec<(usize, Script)>, release: bool) -> Receiver<Decision> {
        let (tx, rx) = mpsc::channel();
        let rvp = RvpHandle::new(
            self.rvps.borrow().unwrap(),
            TxnId(txn),
            0,
            Some(steps.len()),
            Done { tx, release },
        );
        let mut wave = Wave::new(rvp);
        for (p, script) in steps {
            wave.add(self.partition(p), self.action(script)).unwrap();
        }
        wave.launch().unwrap();
        rx
    }

    fn submit(&self, txn: u64, steps: Vec<(usize, Script)>) -> Receiver<Decision> {
        self.submit_with(txn, steps, true)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.env.open_gate();
        self.table.shutdown();
    }
}

fn config(partitions: usize, workers: usize, timeout_ms: u64) -> DoraConfig {
    DoraConfig {
        partitions_per_table: partitions,
        workers_per_partition: workers,
        lock_wait_timeout_ms: timeout_ms,
        ..DoraConfig::default()
    }
}

fn result(rx: &Receiver<Decision>) -> Decision {
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// Scenarios
// ============================================================================

mod scenarios {
    use super::*;

    #[test]
    fn test_single_partition_commit_and_abort() {
        let h = Harness::new(config(1, 1, 100));
        assert_eq!(result(&h.submit(1, vec![(0, key(1))])), Decision::Commit);

        let abort = Script {
            decision: Decision::Abort,
            ..key(2)
        };
        assert_eq!(result(&h.submit(2, vec![(0, abort)])), Decision::Abort);
    }

    #[test]
    fn test_two_partition_wave_commits() {
        let h = Harness::new(config(2, 1, 100));
        let rx = h.submit(1, vec![(0, key(1)), (1, key(2))]);
        assert_eq!(result(&rx), Decision::Commit);
        let mut wrote = h.env.wrote(1);
        wrote.sort();
        assert_eq!(wrote, vec![PartitionId(0), PartitionId(1)]);
    }

    #[test]
    fn test_deadlock_kills_siblings_that_have_not_run() {
        let h = Harness::new(config(3, 1, 50));

        // txn 1 keeps key 10 on partition 1 forever
        let held = Script {
            hold: true,
            ..key(10)
        };
        assert_eq!(result(&h.submit_with(1, vec![(1, held)], false)), Decision::Commit);

        // txn 2 parks partition 2's worker
        let parked = Script {
            gate: true,
            ..key(20)
        };
        let rx2 = h.submit(2, vec![(2, parked)]);

        let rx3 = h.submit(3, vec![(0, key(1)), (1, key(10)), (2, key(21))]);
        wait_for("lock timeout", || h.partition(1).stats().deadlocked == 1);
        h.env.open_gate();

        assert_eq!(result(&rx3), Decision::Deadlock);
        assert_eq!(result(&rx2), Decision::Commit);

        let wrote = h.env.wrote(3);
        assert!(!wrote.contains(&PartitionId(1)));
        assert!(!wrote.contains(&PartitionId(2)));
        assert_eq!(h.partition(2).stats().died, 1);
    }

    #[test]
    fn test_dynamic_wave_of_five() {
        let h = Harness::new(config(2, 1, 100));
        let (tx, rx) = mpsc::channel();
        let rvp = RvpHandle::new(
            h.rvps.borrow().unwrap(),
            TxnId(7),
            0,
            None,
            Done { tx, release: true },
        );
        let mut wave = Wave::new(rvp.clone());
        for k in 0..5 {
            wave.add(h.partition(k as usize % 2), h.action(key(k))).unwrap();
        }
        rvp.fix_total(5).unwrap();
        drop(rvp);
        wave.launch().unwrap();

        assert_eq!(result(&rx), Decision::Commit);
        assert_eq!(h.env.wrote(7).len(), 5);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}

// ============================================================================
// Locking
// ============================================================================

mod locking {
    use super::*;

    #[test]
    fn test_second_worker_blocks_until_terminal_release() {
        let h = Harness::new(config(1, 2, 5_000));
        let slow = Script {
            hold: true,
            sleep_ms: 50,
            ..key(5)
        };
        let rx_a = h.submit(1, vec![(0, slow)]);
        wait_for("txn 1 to start", || h.env.started.lock().contains(&TxnId(1)));

        let rx_b = h.submit(2, vec![(0, key(5))]);
        assert_eq!(result(&rx_a), Decision::Commit);
        assert_eq!(result(&rx_b), Decision::Commit);

        let order: Vec<TxnId> = h.env.writes.lock().iter().map(|(t, _, _)| *t).collect();
        assert_eq!(order, vec![TxnId(1), TxnId(2)]);
        assert!(h.partition(0).stats().lock_waits >= 1);
    }

    #[test]
    fn test_held_locks_released_after_terminal() {
        let h = Harness::new(config(2, 1, 100));
        let hold = |k| Script {
            hold: true,
            ..key(k)
        };
        let rx = h.submit(1, vec![(0, hold(1)), (1, hold(2))]);
        assert_eq!(result(&rx), Decision::Commit);
        wait_for("releases to be applied", || {
            h.partition(0).held_keys() == 0 && h.partition(1).held_keys() == 0
        });

        // the same keys are immediately available to another transaction
        let rx = h.submit(2, vec![(0, key(1)), (1, key(2))]);
        assert_eq!(result(&rx), Decision::Commit);
    }

    #[test]
    fn test_lock_table_clears_under_load() {
        let h = Harness::new(DoraConfig {
            keys_touched_threshold: 8,
            ..config(1, 1, 100)
        });
        let receivers: Vec<_> = (0..50).map(|t| h.submit(t, vec![(0, key(t))])).collect();
        for rx in &receivers {
            assert_eq!(result(rx), Decision::Commit);
        }
        assert!(h.partition(0).stats().lock_clears >= 1);
    }
}

// ============================================================================
// Ordering and lifecycle
// ============================================================================

mod ordering {
    use super::*;

    #[test]
    fn test_shared_partitions_see_same_order() {
        let h = Harness::new(config(4, 1, 1_000));
        let receivers: Vec<Receiver<Decision>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6u64)
                .map(|t| {
                    let h = &h;
                    s.spawn(move || {
                        (0..20u64)
                            .map(|i| {
                                let txn = t * 1000 + i;
                                let steps = (0..4).rev().map(|p| (p, key(txn))).collect();
                                h.submit(txn, steps)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        for rx in &receivers {
            assert_eq!(result(rx), Decision::Commit);
        }

        let writes = h.env.writes.lock().clone();
        let order_in = |p: usize| {
            let mut seen: Vec<(u64, TxnId)> = writes
                .iter()
                .filter(|(_, part, _)| *part == PartitionId(p))
                .map(|(t, _, seq)| (*seq, *t))
                .collect();
            seen.sort();
            seen.into_iter().map(|(_, t)| t).collect::<Vec<_>>()
        };
        let first = order_in(0);
        assert_eq!(first.len(), 120);
        for p in 1..4 {
            assert_eq!(order_in(p), first, "partition {} disagrees", p);
        }
    }

    #[test]
    fn test_caches_drain_after_completion() {
        let h = Harness::new(config(2, 1, 100));
        for t in 0..100 {
            let rx = h.submit(t, vec![(0, key(t)), (1, key(t))]);
            assert_eq!(result(&rx), Decision::Commit);
        }
        wait_for("actions returned", || h.actions.live() == 0);
        wait_for("rvps returned", || h.rvps.live() == 0);
        let stats = h.actions.stats();
        assert_eq!(stats.borrowed, 200);
        assert_eq!(stats.borrowed, stats.returned);
    }

    #[test]
    fn test_enqueue_errors() {
        let h = Harness::new(config(2, 1, 100));
        let err = h
            .table
            .enqueue(h.action(key(1)), PartitionId(9))
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Invalid { count: 2, .. }));

        h.table.shutdown();
        let err = h.table.enqueue(h.action(key(1)), PartitionId(0)).unwrap_err();
        assert!(matches!(err, EnqueueError::Closed { .. }));

        let (tx, rx) = mpsc::channel();
        let rvp = RvpHandle::new(
            h.rvps.borrow().unwrap(),
            TxnId(3),
            0,
            Some(1),
            Done { tx, release: true },
        );
        let mut wave = Wave::new(rvp);
        assert!(wave.add(h.partition(0), h.action(key(1))).unwrap_err().is_enqueue());
        drop(wave);
        assert_eq!(result(&rx), Decision::Abort);
    }
}

// ============================================================================
// Thread-safety guarantees
// ============================================================================

mod guarantees {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Partition<Scripted>: Send, Sync);
    assert_impl_all!(Table<Scripted>: Send, Sync);
    assert_impl_all!(ObjectCache<Scripted>: Send, Sync, Clone);
    assert_impl_all!(Pooled<Scripted>: Send);
    assert_impl_all!(RvpHandle<Done>: Send, Sync, Clone);
}
