//! What RVPs do when their wave completes
//!
//! - [`Terminal`]: commit or abort in the storage manager, release every
//!   held lock, count the outcome and hand the result to the caller.
//! - [`PaymentMidway`]: end of Payment's first wave. Launches the history
//!   insert under a terminal RVP, or goes straight to the terminal abort
//!   when the wave was poisoned.

use doradb_concurrency::{Completion, WaveOutcome};
use doradb_core::{TrxResult, TrxStatus};
use doradb_storage::{StorageManager, TxnHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::action::{PaymentNames, Store};
use crate::env::TpccEnv;
use crate::input::PaymentInput;
use crate::stats::{StatsBoard, TrxKind};

/// Finalizes a transaction
pub struct Terminal {
    kind: TrxKind,
    sm: TxnHandle,
    store: Arc<Store>,
    stats: Arc<StatsBoard>,
    reply: oneshot::Sender<TrxResult>,
}

impl Terminal {
    pub(crate) fn new(
        kind: TrxKind,
        sm: TxnHandle,
        store: Arc<Store>,
        stats: Arc<StatsBoard>,
        reply: oneshot::Sender<TrxResult>,
    ) -> Self {
        Terminal {
            kind,
            sm,
            store,
            stats,
            reply,
        }
    }

    /// Storage transaction being finalized
    pub fn sm(&self) -> TxnHandle {
        self.sm
    }
}

impl Completion for Terminal {
    fn complete(self, mut outcome: WaveOutcome) {
        let txn = outcome.txn_id;
        let status = if outcome.is_commit() {
            match self.store.commit(self.sm) {
                Ok(()) => TrxStatus::Committed,
                Err(e) => {
                    error!(%txn, sm = %self.sm, error = %e, "commit failed after every action committed");
                    TrxStatus::Aborted
                }
            }
        } else {
            if let Err(e) = self.store.abort(self.sm) {
                warn!(%txn, sm = %self.sm, error = %e, "abort failed");
            }
            TrxStatus::from_decision(outcome.decision)
        };

        // storage writes are settled, other transactions may see the rows
        outcome.release_locks();
        self.stats.record(self.kind, status);
        debug!(%txn, kind = %self.kind, ?status, "transaction finalized");

        if self.reply.send(TrxResult { status, txn_id: txn }).is_err() {
            trace!(%txn, "caller stopped waiting");
        }
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("kind", &self.kind)
            .field("sm", &self.sm)
            .finish()
    }
}

/// End of Payment's first wave
pub struct PaymentMidway {
    env: Arc<TpccEnv>,
    input: PaymentInput,
    names: Arc<Mutex<PaymentNames>>,
    terminal: Terminal,
}

impl PaymentMidway {
    pub(crate) fn new(
        env: Arc<TpccEnv>,
        input: PaymentInput,
        names: Arc<Mutex<PaymentNames>>,
        terminal: Terminal,
    ) -> Self {
        PaymentMidway {
            env,
            input,
            names,
            terminal,
        }
    }
}

impl Completion for PaymentMidway {
    fn complete(self, outcome: WaveOutcome) {
        if !outcome.is_commit() {
            return self.terminal.complete(outcome);
        }
        let data = self.names.lock().history_data();
        self.env
            .launch_payment_history(outcome, self.input, data, self.terminal);
    }
}

impl std::fmt::Debug for PaymentMidway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentMidway")
            .field("input", &self.input)
            .field("terminal", &self.terminal)
            .finish()
    }
}
