//! Partition worker threads
//!
//! Each worker owns a [`WorkerContext`] built when the thread starts and
//! dropped when it exits. The loop is:
//!
//! ```text
//! pop -> calc_keys -> should_die? -> lock (or Deadlock) -> begin_run?
//!     -> trx_exec -> release or hold -> report -> giveback
//! ```

use doradb_core::Decision;
use smallvec::SmallVec;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use tracing::{debug, error, trace};

use crate::action::{Action, ActionState, KeySet, LockPolicy};
use crate::cache::Pooled;
use crate::partition::{Partition, Work};
use crate::rvp::{HeldLocks, LockRelease};

/// Spawn worker `n` of `partition`
pub(crate) fn spawn<A: Action>(
    table_name: &'static str,
    partition: Arc<Partition<A>>,
    env: Arc<A::Env>,
    n: usize,
) -> std::io::Result<JoinHandle<()>> {
    let name = format!("dora-{}-{}-{}", table_name, partition.index().0, n);
    Builder::new().name(name).spawn(move || {
        let ctx = WorkerContext::new(partition, env);
        ctx.run();
    })
}

/// Per-thread state of one worker
pub(crate) struct WorkerContext<A: Action> {
    partition: Arc<Partition<A>>,
    env: Arc<A::Env>,
    keys: KeySet,
    served: u64,
}

impl<A: Action> WorkerContext<A> {
    pub(crate) fn new(partition: Arc<Partition<A>>, env: Arc<A::Env>) -> Self {
        Self {
            partition,
            env,
            keys: KeySet::new(),
            served: 0,
        }
    }

    pub(crate) fn run(mut self) {
        debug!(
            table = %self.partition.table_id(),
            partition = %self.partition.index(),
            cpu = self.partition.cpu(),
            "worker started"
        );
        loop {
            match self.partition.next_work() {
                Work::Run(action) => self.serve(action),
                Work::Releases => self.partition.apply_releases(),
                Work::Closed => break,
            }
        }
        // releases posted by the last transactions
        self.partition.apply_releases();
        debug!(
            table = %self.partition.table_id(),
            partition = %self.partition.index(),
            served = self.served,
            "worker stopped"
        );
    }

    /// Execute one action and report its decision
    pub(crate) fn serve(&mut self, mut action: Pooled<A>) {
        self.served += 1;
        let Some(rvp) = action.header().rvp().cloned() else {
            error!(
                partition = %self.partition.index(),
                action = action.label(),
                "action enqueued without a rendezvous point"
            );
            return;
        };
        let ticket = action.header().ticket();
        let txn = action.header().txn_id;
        action.header_mut().state = ActionState::Running;

        self.keys.clear();
        action.calc_keys(&mut self.keys);

        let decision = if rvp.should_die(ticket) {
            Decision::Die
        } else if !self.partition.acquire_all(txn, &self.keys) {
            Decision::Deadlock
        } else if !rvp.begin_run(ticket) {
            self.partition.release(txn, self.keys.keys());
            Decision::Die
        } else {
            let decision = self.execute(&mut action);
            match action.lock_policy() {
                LockPolicy::Immediate => self.partition.release(txn, self.keys.keys()),
                LockPolicy::HoldUntilTerminal => {
                    let keys: SmallVec<[_; 4]> = self.keys.keys().cloned().collect();
                    let sink: Arc<dyn LockRelease> = self.partition.clone();
                    rvp.record_locks(ticket, HeldLocks::new(sink, txn, keys));
                }
            }
            decision
        };

        trace!(
            partition = %self.partition.index(),
            %txn,
            seq = action.header().enqueue_seq,
            action = action.label(),
            %decision,
            "served"
        );
        self.partition.count_decision(decision);

        let header = action.header_mut();
        header.decision = Some(decision);
        header.state = ActionState::Reported;
        rvp.report(ticket, decision);
        drop(rvp);
        action.giveback();
    }
}

impl<A: Action> WorkerContext<A> {
    /// Run `trx_exec`; a panicking action aborts instead of killing the worker
    fn execute(&self, action: &mut Pooled<A>) -> Decision {
        let env = &self.env;
        match panic::catch_unwind(AssertUnwindSafe(|| action.trx_exec(env))) {
            Ok(decision) => decision,
            Err(cause) => {
                let reason = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!(
                    partition = %self.partition.index(),
                    txn = %action.header().txn_id,
                    action = action.label(),
                    %reason,
                    "action panicked, aborting"
                );
                Decision::Abort
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionHeader;
    use crate::cache::{ObjectCache, Recyclable};
    use crate::rvp::{Completion, Rvp, RvpHandle, WaveOutcome};
    use doradb_core::{DoraConfig, Key, LockMode, PartitionId, TableId, TxnId};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
    }

    #[derive(Default)]
    struct Bump {
        header: ActionHeader,
        key: u64,
        outcome: Option<Decision>,
        policy: LockPolicy,
        explode: bool,
    }

    impl Recyclable for Bump {
        fn reset(&mut self) {
            self.header.reset();
            self.outcome = None;
            self.explode = false;
        }
    }

    impl Action for Bump {
        type Env = Counter;

        fn header(&self) -> &ActionHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut ActionHeader {
            &mut self.header
        }

        fn label(&self) -> &'static str {
            "bump"
        }

        fn calc_keys(&self, keys: &mut KeySet) {
            keys.add(Key::from([self.key]), LockMode::Excl);
        }

        fn trx_exec(&mut self, env: &Counter) -> Decision {
            env.runs.fetch_add(1, Ordering::SeqCst);
            if self.explode {
                panic!("bump overflowed");
            }
            self.outcome.unwrap_or(Decision::Commit)
        }

        fn lock_policy(&self) -> LockPolicy {
            self.policy
        }
    }

    struct Capture(Arc<Mutex<Option<WaveOutcome>>>);

    impl Completion for Capture {
        fn complete(self, outcome: WaveOutcome) {
            *self.0.lock() = Some(outcome);
        }
    }

    fn setup() -> (Arc<Partition<Bump>>, WorkerContext<Bump>, Arc<Counter>) {
        let partition = Arc::new(Partition::new(
            TableId(0),
            PartitionId(0),
            crate::PartitionPolicy::Hash,
            &DoraConfig {
                lock_wait_timeout_ms: 10,
                ..DoraConfig::default()
            },
        ));
        let env = Arc::new(Counter::default());
        let ctx = WorkerContext::new(Arc::clone(&partition), Arc::clone(&env));
        (partition, ctx, env)
    }

    fn bound(
        actions: &ObjectCache<Bump>,
        rvps: &ObjectCache<Rvp<Capture>>,
        txn: u64,
        key: u64,
        policy: LockPolicy,
    ) -> (Pooled<Bump>, Arc<Mutex<Option<WaveOutcome>>>) {
        let slot = Arc::new(Mutex::new(None));
        let rvp = RvpHandle::new(
            rvps.borrow().unwrap(),
            TxnId(txn),
            0,
            Some(1),
            Capture(Arc::clone(&slot)),
        );
        let mut action = actions.borrow().unwrap();
        action.key = key;
        action.policy = policy;
        rvp.add_action(&mut *action).unwrap();
        (action, slot)
    }

    #[test]
    fn test_serve_commit_releases_immediately() {
        let (partition, mut ctx, env) = setup();
        let actions = ObjectCache::<Bump>::new("bump", 1);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);

        let (action, slot) = bound(&actions, &rvps, 1, 7, LockPolicy::Immediate);
        ctx.serve(action);

        assert_eq!(env.runs.load(Ordering::SeqCst), 1);
        let outcome = slot.lock().take().unwrap();
        assert_eq!(outcome.decision, Decision::Commit);
        assert!(outcome.held.is_empty());
        assert_eq!(partition.lock_mode(&Key::from([7])), LockMode::NoLock);
        assert_eq!(actions.live(), 0);
        assert_eq!(rvps.live(), 0);
    }

    #[test]
    fn test_serve_hold_until_terminal_keeps_lock() {
        let (partition, mut ctx, _env) = setup();
        let actions = ObjectCache::<Bump>::new("bump", 1);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);

        let (action, slot) = bound(&actions, &rvps, 1, 7, LockPolicy::HoldUntilTerminal);
        ctx.serve(action);
        assert_eq!(partition.lock_mode(&Key::from([7])), LockMode::Excl);

        let mut outcome = slot.lock().take().unwrap();
        assert_eq!(outcome.held.len(), 1);
        outcome.release_locks();
        partition.apply_releases();
        assert_eq!(partition.lock_mode(&Key::from([7])), LockMode::NoLock);
    }

    #[test]
    fn test_serve_lock_conflict_is_deadlock() {
        let (partition, mut ctx, env) = setup();
        let actions = ObjectCache::<Bump>::new("bump", 2);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 2);

        let (first, _) = bound(&actions, &rvps, 1, 7, LockPolicy::HoldUntilTerminal);
        ctx.serve(first);
        let (second, slot) = bound(&actions, &rvps, 2, 7, LockPolicy::Immediate);
        ctx.serve(second);

        assert_eq!(env.runs.load(Ordering::SeqCst), 1);
        assert_eq!(slot.lock().as_ref().unwrap().decision, Decision::Deadlock);
        assert_eq!(partition.stats().deadlocked, 1);
    }

    #[test]
    fn test_serve_abort_reported() {
        let (_partition, mut ctx, _env) = setup();
        let actions = ObjectCache::<Bump>::new("bump", 1);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);

        let (mut action, slot) = bound(&actions, &rvps, 1, 3, LockPolicy::Immediate);
        action.outcome = Some(Decision::Abort);
        ctx.serve(action);
        assert_eq!(slot.lock().as_ref().unwrap().decision, Decision::Abort);
    }

    #[test]
    fn test_panicking_action_aborts_and_worker_survives() {
        let (partition, mut ctx, env) = setup();
        let actions = ObjectCache::<Bump>::new("bump", 2);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 2);

        let (mut bad, slot) = bound(&actions, &rvps, 1, 5, LockPolicy::Immediate);
        bad.explode = true;
        ctx.serve(bad);
        assert_eq!(slot.lock().as_ref().unwrap().decision, Decision::Abort);
        assert_eq!(partition.lock_mode(&Key::from([5])), LockMode::NoLock);
        assert_eq!(actions.live(), 0);

        let (good, slot) = bound(&actions, &rvps, 2, 5, LockPolicy::Immediate);
        ctx.serve(good);
        assert_eq!(slot.lock().as_ref().unwrap().decision, Decision::Commit);
        assert_eq!(env.runs.load(Ordering::SeqCst), 2);
        assert_eq!(partition.stats().aborted, 1);
    }

    #[test]
    fn test_unbound_action_is_dropped() {
        let (partition, mut ctx, env) = setup();
        let actions = ObjectCache::<Bump>::new("bump", 1);
        ctx.serve(actions.borrow().unwrap());
        assert_eq!(env.runs.load(Ordering::SeqCst), 0);
        assert_eq!(actions.live(), 0);
        assert_eq!(partition.stats().executed, 0);
    }
}
