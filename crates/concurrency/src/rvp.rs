//! Rendezvous points
//!
//! An RVP is the barrier at the end of one wave of a transaction. Every
//! action of the wave holds a ticket in it and reports exactly once; the
//! report that brings the remaining count to zero runs the RVP's
//! [`Completion`], which either launches the next wave or finalizes the
//! transaction.
//!
//! # Design
//!
//! - `remaining` is an atomic counter and the only thing deciding who
//!   completes. It starts at 1 (the "sizing hold"), every registered action
//!   adds 1, and the hold is dropped when the wave size is known, so a zero
//!   crossing before sizing is impossible.
//! - The aggregate decision is an [`AtomicDecision`]; the first Abort or
//!   Deadlock wins.
//! - Per-action tickets live behind a small mutex. They drive the Die
//!   cascade: poisoning the aggregate marks every ticket still `Pending`
//!   as `Die`, and a worker only runs an action whose ticket it can move
//!   from `Pending` to `Running`.
//! - RVPs come from an [`ObjectCache`](crate::ObjectCache) and are shared as
//!   `Arc<Pooled<Rvp<C>>>`. The slot goes back to the cache when the last
//!   action drops its reference, so no action can outlive its RVP.

use doradb_core::{AtomicDecision, Decision, Error, Key, Result, TxnId};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::action::Action;
use crate::cache::{Pooled, Recyclable};

/// Index of an action inside its RVP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TicketId(u32);

impl TicketId {
    /// Position in the RVP's registration order
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TicketState {
    Pending,
    Running,
    Reported,
    Die,
}

#[derive(Debug)]
struct Ticket {
    state: TicketState,
    held: Option<HeldLocks>,
}

/// Somewhere lock release requests can be posted to
///
/// Implemented by partitions: the request is queued and applied by the
/// partition's own worker, which is the only thread allowed to touch its
/// lock table.
pub trait LockRelease: Send + Sync {
    /// Ask for `keys` held by `txn` to be released
    fn post_release(&self, txn: TxnId, keys: SmallVec<[Key; 4]>);
}

/// Locks one action left held for its transaction
pub struct HeldLocks {
    sink: Arc<dyn LockRelease>,
    txn: TxnId,
    keys: SmallVec<[Key; 4]>,
}

impl HeldLocks {
    /// Record `keys` held by `txn` in the partition behind `sink`
    pub fn new(sink: Arc<dyn LockRelease>, txn: TxnId, keys: SmallVec<[Key; 4]>) -> Self {
        Self { sink, txn, keys }
    }

    /// Holding transaction
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    /// Held keys
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Post the release to the owning partition
    pub fn release(self) {
        self.sink.post_release(self.txn, self.keys);
    }
}

impl std::fmt::Debug for HeldLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldLocks")
            .field("txn", &self.txn)
            .field("keys", &self.keys)
            .finish()
    }
}

/// What a completed wave hands to its [`Completion`]
#[derive(Debug)]
pub struct WaveOutcome {
    /// Owning transaction
    pub txn_id: TxnId,
    /// Wave number
    pub wave: u32,
    /// Resolved aggregate: Commit, Abort or Deadlock
    pub decision: Decision,
    /// Locks still held by this wave and every wave it inherited from
    pub held: Vec<HeldLocks>,
    /// Number of actions that reported
    pub registered: usize,
}

impl WaveOutcome {
    /// Did every action of the wave commit locally?
    pub fn is_commit(&self) -> bool {
        self.decision == Decision::Commit
    }

    /// Post every held lock back to its partition
    pub fn release_locks(&mut self) {
        let count = self.held.len();
        for held in self.held.drain(..) {
            held.release();
        }
        if count > 0 {
            trace!(txn = %self.txn_id, partitions = count, "posted lock releases");
        }
    }
}

/// The work an RVP runs once, when its wave is complete
///
/// A midway completion builds and launches the next wave, a terminal one
/// commits or aborts in the storage manager and signals the caller.
pub trait Completion: Send + 'static {
    /// Consume the completion with the wave's outcome
    fn complete(self, outcome: WaveOutcome);
}

/// The face of an RVP that actions and workers see
pub trait Rendezvous: Send + Sync {
    /// Owning transaction
    fn txn_id(&self) -> TxnId;

    /// Wave number
    fn wave(&self) -> u32;

    /// Has the ticket been told to die?
    fn should_die(&self, ticket: TicketId) -> bool;

    /// Move the ticket from Pending to Running
    ///
    /// Returns `false` when the ticket was marked Die first; the caller must
    /// then skip execution and report Die.
    fn begin_run(&self, ticket: TicketId) -> bool;

    /// Keep the ticket's locks until the transaction finalizes
    fn record_locks(&self, ticket: TicketId, held: HeldLocks);

    /// Report the ticket's decision; exactly once per ticket
    fn report(&self, ticket: TicketId, decision: Decision);

    /// Give up on a ticket whose action will never reach a partition
    ///
    /// Poisons the wave with Abort, closes it at its current size and
    /// reports Die for the ticket.
    fn abandon(&self, ticket: TicketId);
}

#[derive(Debug, Default)]
struct Book {
    tickets: Vec<Ticket>,
    inherited: Vec<HeldLocks>,
    total: Option<usize>,
}

impl Book {
    fn registered(&self) -> usize {
        self.tickets.len()
    }

    fn is_sized(&self) -> bool {
        self.total == Some(self.tickets.len())
    }

    fn kill_pending(&mut self) -> usize {
        let mut killed = 0;
        for ticket in self.tickets.iter_mut() {
            if ticket.state == TicketState::Pending {
                ticket.state = TicketState::Die;
                killed += 1;
            }
        }
        killed
    }
}

/// Rendezvous point for one wave of one transaction
pub struct Rvp<C: Completion> {
    txn_id: TxnId,
    wave: u32,
    remaining: AtomicIsize,
    decision: AtomicDecision,
    book: Mutex<Book>,
    completion: Mutex<Option<C>>,
}

impl<C: Completion> Default for Rvp<C> {
    fn default() -> Self {
        Self {
            txn_id: TxnId::default(),
            wave: 0,
            remaining: AtomicIsize::new(1),
            decision: AtomicDecision::new(),
            book: Mutex::new(Book::default()),
            completion: Mutex::new(None),
        }
    }
}

impl<C: Completion> Recyclable for Rvp<C> {
    fn reset(&mut self) {
        self.txn_id = TxnId::default();
        self.wave = 0;
        *self.remaining.get_mut() = 1;
        self.decision.reset();
        let book = self.book.get_mut();
        book.tickets.clear();
        book.inherited.clear();
        book.total = None;
        *self.completion.get_mut() = None;
    }
}

impl<C: Completion> Rvp<C> {
    /// Bind a freshly borrowed RVP to a transaction wave
    ///
    /// `total` is the wave size when known up front; `None` makes a dynamic
    /// RVP that must be sized later with [`RvpHandle::fix_total`].
    pub fn set(&mut self, txn_id: TxnId, wave: u32, total: Option<usize>, completion: C) {
        self.txn_id = txn_id;
        self.wave = wave;
        *self.remaining.get_mut() = 1;
        self.decision.reset();
        let book = self.book.get_mut();
        book.tickets.clear();
        book.inherited.clear();
        book.total = total;
        *self.completion.get_mut() = Some(completion);
    }

    /// Drop the sizing hold; finalizes if every action already reported
    fn drop_hold(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finalize();
        }
    }

    fn finalize(&self) {
        let decision = self.decision.resolve();
        let (held, registered) = {
            let mut book = self.book.lock();
            let mut held = std::mem::take(&mut book.inherited);
            held.extend(book.tickets.iter_mut().filter_map(|t| t.held.take()));
            (held, book.registered())
        };

        debug!(txn = %self.txn_id, wave = self.wave, %decision, registered, "wave complete");

        let completion = self.completion.lock().take();
        match completion {
            Some(completion) => completion.complete(WaveOutcome {
                txn_id: self.txn_id,
                wave: self.wave,
                decision,
                held,
                registered,
            }),
            None => {
                error!(txn = %self.txn_id, wave = self.wave, "rendezvous point finalized twice");
                for h in held {
                    h.release();
                }
            }
        }
    }

    fn seal(&self) {
        {
            let mut book = self.book.lock();
            if book.total.is_some_and(|total| total <= book.registered()) {
                return;
            }
            book.total = Some(book.registered());
        }
        self.drop_hold();
    }

    fn poison(&self, decision: Decision) -> bool {
        if !self.decision.merge(decision) {
            return false;
        }
        let killed = self.book.lock().kill_pending();
        debug!(txn = %self.txn_id, wave = self.wave, %decision, killed, "wave poisoned");
        true
    }
}

impl<C: Completion> Rendezvous for Rvp<C> {
    fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    fn wave(&self) -> u32 {
        self.wave
    }

    fn should_die(&self, ticket: TicketId) -> bool {
        self.book
            .lock()
            .tickets
            .get(ticket.index())
            .is_some_and(|t| t.state == TicketState::Die)
    }

    fn begin_run(&self, ticket: TicketId) -> bool {
        let mut book = self.book.lock();
        match book.tickets.get_mut(ticket.index()) {
            Some(t) if t.state == TicketState::Pending => {
                t.state = TicketState::Running;
                true
            }
            Some(t) if t.state == TicketState::Die => false,
            other => {
                let state = other.map(|t| t.state);
                error!(txn = %self.txn_id, ticket = ticket.index(), ?state, "ticket cannot start");
                false
            }
        }
    }

    fn record_locks(&self, ticket: TicketId, held: HeldLocks) {
        let mut book = self.book.lock();
        if let Some(t) = book.tickets.get_mut(ticket.index()) {
            t.held = Some(held);
            return;
        }
        drop(book);
        held.release();
    }

    fn report(&self, ticket: TicketId, decision: Decision) {
        trace!(txn = %self.txn_id, wave = self.wave, ticket = ticket.index(), %decision, "report");
        self.poison(decision);
        if let Some(t) = self.book.lock().tickets.get_mut(ticket.index()) {
            t.state = TicketState::Reported;
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finalize();
        }
    }

    fn abandon(&self, ticket: TicketId) {
        self.poison(Decision::Abort);
        self.seal();
        self.report(ticket, Decision::Die);
    }
}

impl<T: Rendezvous + Recyclable> Rendezvous for Pooled<T> {
    fn txn_id(&self) -> TxnId {
        (**self).txn_id()
    }

    fn wave(&self) -> u32 {
        (**self).wave()
    }

    fn should_die(&self, ticket: TicketId) -> bool {
        (**self).should_die(ticket)
    }

    fn begin_run(&self, ticket: TicketId) -> bool {
        (**self).begin_run(ticket)
    }

    fn record_locks(&self, ticket: TicketId, held: HeldLocks) {
        (**self).record_locks(ticket, held)
    }

    fn report(&self, ticket: TicketId, decision: Decision) {
        (**self).report(ticket, decision)
    }

    fn abandon(&self, ticket: TicketId) {
        (**self).abandon(ticket)
    }
}

/// Shared handle to a bound RVP
///
/// The coordinator registers actions through it; actions keep their own
/// reference as `Arc<dyn Rendezvous>`.
pub struct RvpHandle<C: Completion> {
    inner: Arc<Pooled<Rvp<C>>>,
}

impl<C: Completion> Clone for RvpHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Completion> RvpHandle<C> {
    /// Bind a borrowed RVP and start sharing it
    pub fn new(
        mut rvp: Pooled<Rvp<C>>,
        txn_id: TxnId,
        wave: u32,
        total: Option<usize>,
        completion: C,
    ) -> Self {
        rvp.set(txn_id, wave, total, completion);
        Self {
            inner: Arc::new(rvp),
        }
    }

    fn rvp(&self) -> &Rvp<C> {
        &self.inner
    }

    /// Owning transaction
    pub fn txn_id(&self) -> TxnId {
        self.rvp().txn_id
    }

    /// Wave number
    pub fn wave(&self) -> u32 {
        self.rvp().wave
    }

    /// Register `action` with this wave and bind it to the RVP
    ///
    /// Must happen before the action is enqueued. Fails with
    /// [`Error::WaveOverflow`] once the declared wave size is reached. An
    /// action registered after the wave was poisoned starts out as Die.
    pub fn add_action<A: Action>(&self, action: &mut A) -> Result<TicketId> {
        let rvp = self.rvp();
        let ticket = {
            let mut book = rvp.book.lock();
            if let Some(total) = book.total {
                if book.registered() >= total {
                    return Err(Error::WaveOverflow {
                        txn: rvp.txn_id,
                        total,
                    });
                }
            }
            let state = if rvp.decision.is_poisoned() {
                TicketState::Die
            } else {
                TicketState::Pending
            };
            let ticket = TicketId(book.registered() as u32);
            book.tickets.push(Ticket { state, held: None });
            rvp.remaining.fetch_add(1, Ordering::AcqRel);
            if book.is_sized() {
                // the new action cannot have reported yet, so this never
                // reaches zero
                rvp.remaining.fetch_sub(1, Ordering::AcqRel);
            }
            ticket
        };
        let shared: Arc<dyn Rendezvous> = self.inner.clone();
        action.header_mut().bind(shared, ticket);
        Ok(ticket)
    }

    /// Fix the size of a dynamic RVP
    ///
    /// Allowed exactly once, and only on an RVP created without a size.
    /// If every registered action already reported, the wave completes
    /// here, on the caller's thread.
    pub fn fix_total(&self, total: usize) -> Result<()> {
        let rvp = self.rvp();
        let sized = {
            let mut book = rvp.book.lock();
            if book.total.is_some() {
                return Err(Error::AlreadySized { txn: rvp.txn_id });
            }
            if book.registered() > total {
                return Err(Error::WaveOverflow {
                    txn: rvp.txn_id,
                    total,
                });
            }
            book.total = Some(total);
            book.is_sized()
        };
        if sized {
            rvp.drop_hold();
        }
        Ok(())
    }

    /// Close the wave at whatever has been registered so far
    ///
    /// Used when a wave is abandoned halfway through being built.
    pub fn seal(&self) {
        self.rvp().seal()
    }

    /// Poison the wave as if an action had reported `decision`
    pub fn poison(&self, decision: Decision) -> bool {
        self.rvp().poison(decision)
    }

    /// Take over the held locks of an earlier wave
    pub fn inherit(&self, held: Vec<HeldLocks>) {
        self.rvp().book.lock().inherited.extend(held);
    }

    /// Has the wave size been reached?
    pub fn is_sized(&self) -> bool {
        self.rvp().book.lock().is_sized()
    }

    /// Number of registered actions
    pub fn registered(&self) -> usize {
        self.rvp().book.lock().registered()
    }

    /// Reports still expected (including the sizing hold while unsized)
    pub fn remaining(&self) -> isize {
        self.rvp().remaining.load(Ordering::Acquire)
    }

    /// Current aggregate
    pub fn decision(&self) -> Decision {
        self.rvp().decision.load()
    }

    /// This RVP as seen by actions
    pub fn rendezvous(&self) -> Arc<dyn Rendezvous> {
        self.inner.clone()
    }
}

impl<C: Completion> std::fmt::Debug for RvpHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RvpHandle")
            .field("txn_id", &self.txn_id())
            .field("wave", &self.wave())
            .field("remaining", &self.remaining())
            .field("decision", &self.decision())
            .finish()
    }
}
