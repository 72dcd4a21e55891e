//! Multi-partition enqueue
//!
//! A wave that spans several partitions is enqueued with lock chaining:
//! take partition 1's enqueue lock and push; take partition 2's lock, drop
//! partition 1's, push; and so on. At most two enqueue locks are held at any
//! time.
//!
//! The route is sorted by `(table, partition)` before chaining, so every
//! chain takes enqueue locks in the same global order. Two chains can then
//! never wait on each other in a cycle, and two transactions whose routes
//! share a run of consecutive partitions see the same relative order in all
//! of them.

use doradb_core::{Decision, EnqueueError, Error, Result};
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::debug;

use crate::action::Action;
use crate::cache::Pooled;
use crate::partition::Partition;
use crate::rvp::{Completion, RvpHandle};

/// A chain that stopped halfway
pub struct ChainError<A: Action> {
    /// Why the chain stopped
    pub error: EnqueueError,
    /// Actions that never reached a queue, in route order
    pub unsent: Vec<Pooled<A>>,
}

impl<A: Action> ChainError<A> {
    /// Abandon every unsent action and keep the error
    pub fn cancel(self) -> EnqueueError {
        for action in self.unsent {
            abandon(action);
        }
        self.error
    }
}

impl<A: Action> std::fmt::Debug for ChainError<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainError")
            .field("error", &self.error)
            .field("unsent", &self.unsent.len())
            .finish()
    }
}

/// Report Die for an action that will never be enqueued
///
/// The action's wave is aborted. Unbound actions just go back to their
/// cache.
pub(crate) fn abandon<A: Action>(action: Pooled<A>) {
    if let Some(rvp) = action.header().rvp() {
        rvp.abandon(action.header().ticket());
    }
    action.giveback();
}

/// Enqueue `steps` with hand-over-hand enqueue locks
///
/// Returns the sequence number each action received, in route order (that
/// is, sorted by table then partition). Consecutive steps into the same
/// partition share one lock acquisition. On failure nothing is cancelled;
/// the unsent actions are handed back in the error.
pub fn enqueue_chain<A: Action>(
    mut steps: Vec<(Arc<Partition<A>>, Pooled<A>)>,
) -> std::result::Result<Vec<u64>, ChainError<A>> {
    steps.sort_by_key(|(p, _)| (p.table_id(), p.index()));
    let (route, actions): (Vec<_>, Vec<_>) = steps.into_iter().unzip();

    let mut seqs = Vec::with_capacity(route.len());
    let mut current: Option<(&Arc<Partition<A>>, MutexGuard<'_, ()>)> = None;
    let mut pending = actions.into_iter();

    for partition in route.iter() {
        let Some(action) = pending.next() else {
            break;
        };
        let guard = match current.take() {
            Some((held, guard)) if Arc::ptr_eq(held, partition) => guard,
            previous => {
                let guard = partition.lock_enqueue();
                drop(previous);
                guard
            }
        };
        match partition.push_locked(&guard, action) {
            Ok(seq) => seqs.push(seq),
            Err((error, action)) => {
                drop(guard);
                let mut unsent = vec![action];
                unsent.extend(pending);
                debug!(%error, unsent = unsent.len(), "enqueue chain stopped");
                return Err(ChainError { error, unsent });
            }
        }
        current = Some((partition, guard));
    }
    Ok(seqs)
}

/// One wave under construction
///
/// Register actions with [`Wave::add`], then [`Wave::launch`] them. A wave
/// dropped before it is launched, or whose launch fails, cancels itself:
/// the RVP is poisoned with Abort and every action that did not reach a
/// queue reports Die, so the RVP still completes exactly once.
pub struct Wave<A: Action, C: Completion> {
    rvp: RvpHandle<C>,
    steps: Vec<(Arc<Partition<A>>, Pooled<A>)>,
    launched: bool,
}

impl<A: Action, C: Completion> Wave<A, C> {
    /// Start a wave on `rvp`
    pub fn new(rvp: RvpHandle<C>) -> Self {
        Self {
            rvp,
            steps: Vec::new(),
            launched: false,
        }
    }

    /// The wave's RVP
    pub fn rvp(&self) -> &RvpHandle<C> {
        &self.rvp
    }

    /// Actions registered so far
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if no action has been registered
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Register `action` with the RVP, targeting `partition`
    ///
    /// Fails when the partition is closed or the wave is already full.
    pub fn add(&mut self, partition: &Arc<Partition<A>>, mut action: Pooled<A>) -> Result<()> {
        if partition.is_closed() {
            return Err(EnqueueError::Closed {
                table: partition.table_id(),
                partition: partition.index(),
            }
            .into());
        }
        self.rvp.add_action(&mut *action)?;
        self.steps.push((Arc::clone(partition), action));
        Ok(())
    }

    /// Enqueue every registered action
    ///
    /// The RVP must be sized (static size reached or dynamic size fixed).
    pub fn launch(mut self) -> Result<Vec<u64>> {
        if !self.rvp.is_sized() {
            return Err(Error::Internal(format!(
                "wave {} of {} launched before it was sized",
                self.rvp.wave(),
                self.rvp.txn_id()
            )));
        }
        self.launched = true;
        let steps = std::mem::take(&mut self.steps);
        enqueue_chain(steps).map_err(|e| Error::Enqueue(e.cancel()))
    }
}

impl<A: Action, C: Completion> Drop for Wave<A, C> {
    fn drop(&mut self) {
        if self.launched {
            return;
        }
        debug!(
            txn = %self.rvp.txn_id(),
            wave = self.rvp.wave(),
            actions = self.steps.len(),
            "wave cancelled before launch"
        );
        self.rvp.poison(Decision::Abort);
        self.rvp.seal();
        for (_, action) in self.steps.drain(..) {
            abandon(action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionHeader, KeySet};
    use crate::cache::{ObjectCache, Recyclable};
    use crate::partition::{PartitionPolicy, Work};
    use crate::rvp::{Rvp, WaveOutcome};
    use doradb_core::{DoraConfig, PartitionId, TableId, TxnId};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Step {
        header: ActionHeader,
    }

    impl Recyclable for Step {
        fn reset(&mut self) {
            self.header.reset();
        }
    }

    impl Action for Step {
        type Env = ();

        fn header(&self) -> &ActionHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut ActionHeader {
            &mut self.header
        }

        fn label(&self) -> &'static str {
            "step"
        }

        fn calc_keys(&self, _keys: &mut KeySet) {}

        fn trx_exec(&mut self, _env: &()) -> Decision {
            Decision::Commit
        }
    }

    struct Capture(Arc<Mutex<Option<Decision>>>);

    impl Completion for Capture {
        fn complete(self, outcome: WaveOutcome) {
            *self.0.lock() = Some(outcome.decision);
        }
    }

    fn partitions(n: usize) -> Vec<Arc<Partition<Step>>> {
        (0..n)
            .map(|i| {
                Arc::new(Partition::new(
                    TableId(0),
                    PartitionId(i),
                    PartitionPolicy::Hash,
                    &DoraConfig::default(),
                ))
            })
            .collect()
    }

    fn wave(
        rvps: &ObjectCache<Rvp<Capture>>,
        txn: u64,
        total: Option<usize>,
    ) -> (Wave<Step, Capture>, Arc<Mutex<Option<Decision>>>) {
        let slot = Arc::new(Mutex::new(None));
        let rvp = RvpHandle::new(
            rvps.borrow().unwrap(),
            TxnId(txn),
            0,
            total,
            Capture(Arc::clone(&slot)),
        );
        (Wave::new(rvp), slot)
    }

    fn drain(partition: &Partition<Step>) -> Vec<(TxnId, u64)> {
        partition.close();
        let mut seen = Vec::new();
        while let Work::Run(action) = partition.next_work() {
            seen.push((action.header().txn_id, action.header().enqueue_seq));
        }
        seen
    }

    #[test]
    fn test_chain_sorts_route_and_stamps_sequences() {
        let parts = partitions(3);
        let actions = ObjectCache::<Step>::new("step", 4);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);
        let (mut w, _) = wave(&rvps, 1, Some(3));
        w.add(&parts[2], actions.borrow().unwrap()).unwrap();
        w.add(&parts[0], actions.borrow().unwrap()).unwrap();
        w.add(&parts[1], actions.borrow().unwrap()).unwrap();
        let seqs = w.launch().unwrap();
        assert_eq!(seqs, vec![0, 0, 0]);
        for p in &parts {
            assert_eq!(p.stats().enqueued, 1);
        }
    }

    #[test]
    fn test_same_partition_twice_shares_lock() {
        let parts = partitions(1);
        let actions = ObjectCache::<Step>::new("step", 2);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);
        let (mut w, _) = wave(&rvps, 1, Some(2));
        w.add(&parts[0], actions.borrow().unwrap()).unwrap();
        w.add(&parts[0], actions.borrow().unwrap()).unwrap();
        assert_eq!(w.launch().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_concurrent_chains_agree_on_order() {
        let parts = partitions(4);
        let actions = ObjectCache::<Step>::new("step", 64);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 16);

        std::thread::scope(|s| {
            for t in 0..8u64 {
                let parts = &parts;
                let actions = &actions;
                let rvps = &rvps;
                s.spawn(move || {
                    for i in 0..25u64 {
                        let (mut w, _) = wave(rvps, t * 100 + i, Some(4));
                        for p in parts.iter().rev() {
                            w.add(p, actions.borrow().unwrap()).unwrap();
                        }
                        w.launch().unwrap();
                    }
                });
            }
        });

        let orders: Vec<Vec<TxnId>> = parts
            .iter()
            .map(|p| drain(p).into_iter().map(|(txn, _)| txn).collect())
            .collect();
        assert_eq!(orders[0].len(), 200);
        for order in &orders[1..] {
            assert_eq!(order, &orders[0]);
        }
    }

    #[test]
    fn test_closed_partition_mid_chain_cancels_rest() {
        let parts = partitions(3);
        let actions = ObjectCache::<Step>::new("step", 4);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);
        let (mut w, slot) = wave(&rvps, 9, Some(3));
        for p in &parts {
            w.add(p, actions.borrow().unwrap()).unwrap();
        }
        parts[1].close();

        let err = w.launch().unwrap_err();
        assert!(err.is_enqueue());
        // the action that made it into partition 0 is still queued, dead
        assert_eq!(parts[0].stats().queued, 1);
        assert_eq!(*slot.lock(), None);

        let queued = match parts[0].next_work() {
            Work::Run(action) => action,
            _ => panic!("expected the sent action"),
        };
        let rv = queued.header().rvp().unwrap().clone();
        let ticket = queued.header().ticket();
        assert!(rv.should_die(ticket));
        rv.report(ticket, Decision::Die);
        assert_eq!(*slot.lock(), Some(Decision::Abort));
    }

    #[test]
    fn test_dropped_wave_aborts_its_rvp() {
        let parts = partitions(2);
        let actions = ObjectCache::<Step>::new("step", 2);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);
        let (mut w, slot) = wave(&rvps, 3, Some(2));
        w.add(&parts[0], actions.borrow().unwrap()).unwrap();
        drop(w);
        assert_eq!(*slot.lock(), Some(Decision::Abort));
        assert_eq!(actions.live(), 0);
        assert_eq!(rvps.live(), 0);
    }

    #[test]
    fn test_unsized_wave_refuses_launch() {
        let parts = partitions(1);
        let actions = ObjectCache::<Step>::new("step", 1);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);
        let (mut w, slot) = wave(&rvps, 4, None);
        w.add(&parts[0], actions.borrow().unwrap()).unwrap();
        assert!(matches!(w.launch(), Err(Error::Internal(_))));
        assert_eq!(*slot.lock(), Some(Decision::Abort));
        assert_eq!(parts[0].stats().enqueued, 0);
    }

    #[test]
    fn test_add_to_closed_partition_fails() {
        let parts = partitions(1);
        parts[0].close();
        let actions = ObjectCache::<Step>::new("step", 1);
        let rvps = ObjectCache::<Rvp<Capture>>::new("rvp", 1);
        let (mut w, slot) = wave(&rvps, 5, Some(1));
        let err = w.add(&parts[0], actions.borrow().unwrap()).unwrap_err();
        assert!(err.is_enqueue());
        drop(w);
        assert_eq!(*slot.lock(), Some(Decision::Abort));
    }
}
