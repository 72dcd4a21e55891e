//! Coordinators: one entry point per transaction type
//!
//! Every entry point follows the same steps:
//!
//! 1. resolve the target partitions; an unknown warehouse or a closed
//!    partition fails here and the transaction never starts
//! 2. borrow the RVP and the actions from their caches
//! 3. begin the storage transaction and build the terminal completion
//! 4. register every action with the RVP, then launch the wave through the
//!    hand-over-hand enqueue chain
//!
//! A failure after step 3 cancels the wave, which rolls the storage
//! transaction back through the terminal completion before the error is
//! returned.
//!
//! | type     | waves                                           | locks              |
//! |----------|-------------------------------------------------|--------------------|
//! | Payment  | wh + dist + cust (midway), history (terminal)   | hold until final   |
//! | NewOrder | dist + one per line (terminal, sized late)      | hold until final   |
//! | Mbench   | one row (terminal)                              | release after exec |

use doradb_concurrency::{Completion, Partition, RvpHandle, Table, Wave, WaveOutcome};
use doradb_core::{Decision, EnqueueError, Result, TxnId};
use doradb_storage::{StorageManager, TxnHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::action::{ActionBody, ActionKind, PaymentNames, TpccAction};
use crate::completion::{PaymentMidway, Terminal};
use crate::env::TpccEnv;
use crate::future::TrxFuture;
use crate::input::{MbenchInput, NewOrderInput, PaymentInput};
use crate::stats::TrxKind;

fn ensure_open(partitions: &[&Arc<Partition<TpccAction>>]) -> Result<()> {
    for p in partitions {
        if p.is_closed() {
            return Err(EnqueueError::Closed {
                table: p.table_id(),
                partition: p.index(),
            }
            .into());
        }
    }
    Ok(())
}

impl TpccEnv {
    fn begin(&self, kind: TrxKind) -> (TxnId, TxnHandle, Terminal, TrxFuture) {
        let txn = self.next_txn_id();
        let sm = self.store.begin_transaction();
        self.stats.attempt(kind);
        let (tx, rx) = oneshot::channel();
        let terminal = Terminal::new(
            kind,
            sm,
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
            tx,
        );
        debug!(%txn, %sm, %kind, "transaction begun");
        (txn, sm, terminal, TrxFuture::new(txn, kind, rx))
    }

    /// Submit a Payment
    ///
    /// The first wave updates warehouse, district and customer under a
    /// midway RVP; the second inserts the history row.
    pub fn submit_payment(self: &Arc<Self>, input: PaymentInput) -> Result<TrxFuture> {
        input.validate()?;
        let (c_w, _) = input.customer_location();
        let wh_part = self.route(&self.warehouse, input.home_wh)?;
        let dist_part = self.route(&self.district, input.home_wh)?;
        let cust_part = self.route(&self.customer, c_w)?;
        ensure_open(&[&wh_part, &dist_part, &cust_part])?;

        let slot = self.midway_rvps.borrow()?;
        let mut wh = self.actions.borrow(ActionKind::PayUpdWarehouse)?;
        let mut dist = self.actions.borrow(ActionKind::PayUpdDistrict)?;
        let mut cust = self.actions.borrow(ActionKind::PayUpdCustomer)?;

        let (txn, sm, terminal, future) = self.begin(TrxKind::Payment);
        let names = Arc::new(Mutex::new(PaymentNames::default()));
        wh.set(
            sm,
            ActionBody::PayUpdWarehouse {
                input,
                names: Arc::clone(&names),
            },
        );
        dist.set(
            sm,
            ActionBody::PayUpdDistrict {
                input,
                names: Arc::clone(&names),
            },
        );
        cust.set(sm, ActionBody::PayUpdCustomer { input });

        let midway = PaymentMidway::new(Arc::clone(self), input, names, terminal);
        let mut wave = Wave::new(RvpHandle::new(slot, txn, 0, Some(3), midway));
        wave.add(&wh_part, wh)?;
        wave.add(&dist_part, dist)?;
        wave.add(&cust_part, cust)?;
        wave.launch()?;
        Ok(future)
    }

    /// Second wave of a Payment, run by the midway completion
    pub(crate) fn launch_payment_history(
        &self,
        mut outcome: WaveOutcome,
        input: PaymentInput,
        data: String,
        terminal: Terminal,
    ) {
        let txn = outcome.txn_id;
        let sm = terminal.sm();
        let prepared = self.route(&self.history, input.home_wh).and_then(|part| {
            let slot = self.terminal_rvps.borrow()?;
            let action = self.actions.borrow(ActionKind::PayInsHistory)?;
            Ok((part, slot, action))
        });
        let (part, slot, mut action) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(%txn, error = %e, "cannot build the history wave, aborting");
                outcome.decision = Decision::Abort;
                return terminal.complete(outcome);
            }
        };

        action.set(sm, ActionBody::PayInsHistory { input, data });
        let rvp = RvpHandle::new(slot, txn, 1, Some(1), terminal);
        rvp.inherit(std::mem::take(&mut outcome.held));
        let mut wave = Wave::new(rvp);
        if let Err(e) = wave.add(&part, action) {
            warn!(%txn, error = %e, "history wave not registered, aborting");
            return;
        }
        if let Err(e) = wave.launch() {
            warn!(%txn, error = %e, "history wave not enqueued, aborting");
        }
    }

    /// Submit a NewOrder
    ///
    /// One wave under a dynamic terminal RVP: the district update plus one
    /// stock update per line. The wave size is fixed once every line is
    /// registered.
    pub fn submit_new_order(self: &Arc<Self>, input: NewOrderInput) -> Result<TrxFuture> {
        input.validate()?;
        let dist_part = self.route(&self.district, input.wh)?;
        let stock_parts = input
            .lines
            .iter()
            .map(|line| self.route(&self.stock, line.supply_wh))
            .collect::<Result<Vec<_>>>()?;
        let mut targets: Vec<_> = stock_parts.iter().collect();
        targets.push(&dist_part);
        ensure_open(&targets)?;

        let slot = self.terminal_rvps.borrow()?;
        let mut dist = self.actions.borrow(ActionKind::NoUpdDistrict)?;
        let stocks = input
            .lines
            .iter()
            .map(|_| self.actions.borrow(ActionKind::NoUpdStock))
            .collect::<Result<Vec<_>>>()?;

        let (txn, sm, terminal, future) = self.begin(TrxKind::NewOrder);
        let mut wave = Wave::new(RvpHandle::new(slot, txn, 0, None, terminal));

        dist.set(
            sm,
            ActionBody::NoUpdDistrict {
                wh: input.wh,
                d: input.d,
            },
        );
        wave.add(&dist_part, dist)?;
        for ((line, part), mut action) in input.lines.iter().zip(&stock_parts).zip(stocks) {
            action.set(
                sm,
                ActionBody::NoUpdStock {
                    home_wh: input.wh,
                    line: *line,
                },
            );
            wave.add(part, action)?;
        }
        wave.rvp().fix_total(wave.len())?;
        wave.launch()?;
        Ok(future)
    }

    /// Submit a single-row warehouse update
    pub fn submit_mbench_wh(self: &Arc<Self>, input: MbenchInput) -> Result<TrxFuture> {
        self.submit_single(
            TrxKind::MbenchWarehouse,
            &self.warehouse,
            ActionKind::MbWarehouse,
            input,
            |input| ActionBody::MbWarehouse { input },
        )
    }

    /// Submit a single-row customer update
    pub fn submit_mbench_cust(self: &Arc<Self>, input: MbenchInput) -> Result<TrxFuture> {
        self.submit_single(
            TrxKind::MbenchCustomer,
            &self.customer,
            ActionKind::MbCustomer,
            input,
            |input| ActionBody::MbCustomer { input },
        )
    }

    fn submit_single(
        &self,
        kind: TrxKind,
        table: &Table<TpccAction>,
        action_kind: ActionKind,
        input: MbenchInput,
        body: fn(MbenchInput) -> ActionBody,
    ) -> Result<TrxFuture> {
        input.validate()?;
        let part = self.route(table, input.wh)?;
        ensure_open(&[&part])?;
        let slot = self.terminal_rvps.borrow()?;
        let mut action = self.actions.borrow(action_kind)?;

        let (txn, sm, terminal, future) = self.begin(kind);
        action.set(sm, body(input));
        let mut wave = Wave::new(RvpHandle::new(slot, txn, 0, Some(1), terminal));
        wave.add(&part, action)?;
        wave.launch()?;
        Ok(future)
    }
}
