//! Actions: one partition's slice of a transaction
//!
//! An action is borrowed from a cache, bound to an RVP with
//! [`RvpHandle::add_action`](crate::RvpHandle::add_action), enqueued into
//! exactly one partition, executed at most once by that partition's worker,
//! reports exactly once, and is given back to its cache.
//!
//! ```text
//! borrow -> set(input) -> add_action(rvp) -> enqueue -> calc_keys -> lock
//!        -> trx_exec | Die -> report -> giveback
//! ```

use doradb_core::{Decision, Key, LockMode, PartitionId, TxnId};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::cache::Recyclable;
use crate::rvp::{Rendezvous, TicketId};

/// When an action's locks are released
///
/// Each action type declares one policy:
/// - `Immediate`: right after `trx_exec`, before reporting
/// - `HoldUntilTerminal`: after the transaction's terminal RVP has
///   committed or aborted in the storage manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Release as soon as the action has executed
    #[default]
    Immediate,
    /// Release when the transaction finalizes
    HoldUntilTerminal,
}

/// Lifecycle of one action instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionState {
    /// Bound and waiting in a queue
    #[default]
    Pending,
    /// Popped by a worker
    Running,
    /// Decision handed to the RVP
    Reported,
}

/// Exact set of keys (and modes) an action will lock
///
/// Duplicate keys collapse into one request with the strongest mode, so a
/// key set never asks for an upgrade halfway through execution.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    requests: SmallVec<[(Key, LockMode); 4]>,
}

impl KeySet {
    /// Create an empty key set
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `mode` on `key`
    pub fn add(&mut self, key: Key, mode: LockMode) {
        match self.requests.iter_mut().find(|(k, _)| *k == key) {
            Some((_, held)) => *held = held.stronger(mode),
            None => self.requests.push((key, mode)),
        }
    }

    /// Requests in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &(Key, LockMode)> {
        self.requests.iter()
    }

    /// Keys only
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.requests.iter().map(|(k, _)| k)
    }

    /// Number of requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if no locks are requested
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Remove every request, keeping capacity
    pub fn clear(&mut self) {
        self.requests.clear();
    }
}

/// State shared by every action type
#[derive(Default)]
pub struct ActionHeader {
    /// Owning transaction
    pub txn_id: TxnId,
    /// Wave (intra-transaction sequence number)
    pub wave: u32,
    /// Target partition
    pub partition: PartitionId,
    /// Sequence number assigned by the target partition at enqueue
    pub enqueue_seq: u64,
    /// Lifecycle state
    pub state: ActionState,
    /// Decision reported to the RVP
    pub decision: Option<Decision>,
    rvp: Option<Arc<dyn Rendezvous>>,
    ticket: TicketId,
}

impl ActionHeader {
    /// Attach the action to an RVP under `ticket`
    pub(crate) fn bind(&mut self, rvp: Arc<dyn Rendezvous>, ticket: TicketId) {
        self.txn_id = rvp.txn_id();
        self.wave = rvp.wave();
        self.rvp = Some(rvp);
        self.ticket = ticket;
        self.state = ActionState::Pending;
        self.decision = None;
    }

    /// RVP this action reports to, if bound
    pub fn rvp(&self) -> Option<&Arc<dyn Rendezvous>> {
        self.rvp.as_ref()
    }

    /// Ticket of this action inside its RVP
    pub fn ticket(&self) -> TicketId {
        self.ticket
    }

    /// Forget the RVP and per-use state
    pub fn reset(&mut self) {
        self.rvp = None;
        self.ticket = TicketId::default();
        self.state = ActionState::Pending;
        self.decision = None;
        self.enqueue_seq = 0;
        self.wave = 0;
        self.partition = PartitionId::default();
        self.txn_id = TxnId::default();
    }
}

impl std::fmt::Debug for ActionHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHeader")
            .field("txn_id", &self.txn_id)
            .field("wave", &self.wave)
            .field("partition", &self.partition)
            .field("enqueue_seq", &self.enqueue_seq)
            .field("state", &self.state)
            .field("decision", &self.decision)
            .field("bound", &self.rvp.is_some())
            .finish()
    }
}

/// A typed unit of per-partition transactional work
///
/// Implementations are usually a closed enum over the transaction types an
/// engine supports, so one partition queue can carry all of them.
pub trait Action: Recyclable {
    /// Whatever `trx_exec` needs (storage manager, tables, ...)
    type Env: Send + Sync + 'static;

    /// Common header
    fn header(&self) -> &ActionHeader;

    /// Common header, mutable
    fn header_mut(&mut self) -> &mut ActionHeader;

    /// Short static name for logs and stats
    fn label(&self) -> &'static str;

    /// Keys (and modes) to lock, computed from the input only
    fn calc_keys(&self, keys: &mut KeySet);

    /// Execute this partition's slice of the transaction
    ///
    /// Storage failures must be turned into [`Decision::Abort`].
    fn trx_exec(&mut self, env: &Self::Env) -> Decision;

    /// When locks taken for this action are released
    fn lock_policy(&self) -> LockPolicy {
        LockPolicy::Immediate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_set_collapses_duplicates_to_strongest_mode() {
        let mut ks = KeySet::new();
        ks.add(Key::from([1]), LockMode::Shared);
        ks.add(Key::from([2]), LockMode::Shared);
        ks.add(Key::from([1]), LockMode::Excl);
        ks.add(Key::from([1]), LockMode::Shared);
        assert_eq!(ks.len(), 2);
        let first = ks.iter().next().unwrap();
        assert_eq!(first, &(Key::from([1]), LockMode::Excl));
    }

    #[test]
    fn test_header_reset() {
        let mut h = ActionHeader::default();
        h.enqueue_seq = 9;
        h.state = ActionState::Reported;
        h.decision = Some(Decision::Commit);
        h.reset();
        assert_eq!(h.enqueue_seq, 0);
        assert_eq!(h.state, ActionState::Pending);
        assert!(h.rvp().is_none());
    }
}
