//! TPC-C actions
//!
//! One action type, [`TpccAction`], carries every per-partition slice of
//! every transaction kind as a variant of [`ActionBody`]. All tables'
//! partitions queue the same type, and each variant is borrowed from its
//! own cache.
//!
//! Every action locks the one row it touches in Excl mode. Payment and
//! NewOrder actions keep their locks until the transaction finalizes; the
//! micro-benchmarks release right after executing.

use doradb_concurrency::{Action, ActionHeader, KeySet, LockPolicy, Recyclable};
use doradb_core::{Decision, Key, LockMode, StorageError, TableId, TxnId};
use doradb_storage::{MemoryStorage, StorageManager, TxnHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::input::{MbenchInput, OrderLine, PaymentInput};
use crate::schema::{
    keys, truncate_data, Credit, History, Tuple, CUSTOMER, CUSTOMER_DATA_LEN, DISTRICT, HISTORY,
    STOCK, WAREHOUSE,
};

/// The storage manager actions run against
pub type Store = MemoryStorage<Tuple>;

/// Names read by Payment's first wave for the history row
#[derive(Debug, Default)]
pub struct PaymentNames {
    /// W_NAME of the home warehouse
    pub warehouse: String,
    /// D_NAME of the home district
    pub district: String,
}

impl PaymentNames {
    /// H_DATA built from the two names
    pub fn history_data(&self) -> String {
        format!("{}   {}", self.warehouse, self.district)
    }
}

/// Action variants, one cache each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Payment: warehouse YTD
    PayUpdWarehouse,
    /// Payment: district YTD
    PayUpdDistrict,
    /// Payment: customer balance
    PayUpdCustomer,
    /// Payment: history insert
    PayInsHistory,
    /// NewOrder: district next order id
    NoUpdDistrict,
    /// NewOrder: one stock line
    NoUpdStock,
    /// Micro-benchmark: warehouse
    MbWarehouse,
    /// Micro-benchmark: customer
    MbCustomer,
}

impl ActionKind {
    /// Every kind, in cache order
    pub const ALL: [ActionKind; 8] = [
        ActionKind::PayUpdWarehouse,
        ActionKind::PayUpdDistrict,
        ActionKind::PayUpdCustomer,
        ActionKind::PayInsHistory,
        ActionKind::NoUpdDistrict,
        ActionKind::NoUpdStock,
        ActionKind::MbWarehouse,
        ActionKind::MbCustomer,
    ];

    /// Short name used for caches and logs
    pub fn label(self) -> &'static str {
        match self {
            ActionKind::PayUpdWarehouse => "pay-upd-wh",
            ActionKind::PayUpdDistrict => "pay-upd-dist",
            ActionKind::PayUpdCustomer => "pay-upd-cust",
            ActionKind::PayInsHistory => "pay-ins-hist",
            ActionKind::NoUpdDistrict => "no-upd-dist",
            ActionKind::NoUpdStock => "no-upd-stock",
            ActionKind::MbWarehouse => "mb-upd-wh",
            ActionKind::MbCustomer => "mb-upd-cust",
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

/// Input of one action
#[derive(Debug, Clone, Default)]
pub enum ActionBody {
    /// Not bound to a transaction
    #[default]
    Idle,
    /// Add the payment to the home warehouse's YTD
    PayUpdWarehouse {
        /// Payment input
        input: PaymentInput,
        /// Where the warehouse name goes
        names: Arc<Mutex<PaymentNames>>,
    },
    /// Add the payment to the home district's YTD
    PayUpdDistrict {
        /// Payment input
        input: PaymentInput,
        /// Where the district name goes
        names: Arc<Mutex<PaymentNames>>,
    },
    /// Charge the customer
    PayUpdCustomer {
        /// Payment input
        input: PaymentInput,
    },
    /// Record the payment in the history table
    PayInsHistory {
        /// Payment input
        input: PaymentInput,
        /// H_DATA
        data: String,
    },
    /// Take the district's next order id
    NoUpdDistrict {
        /// Warehouse
        wh: u64,
        /// District
        d: u64,
    },
    /// Take stock for one order line
    NoUpdStock {
        /// Warehouse the order is placed at
        home_wh: u64,
        /// The line
        line: OrderLine,
    },
    /// Add to a warehouse's YTD
    MbWarehouse {
        /// Benchmark input
        input: MbenchInput,
    },
    /// Charge a customer
    MbCustomer {
        /// Benchmark input
        input: MbenchInput,
    },
}

impl ActionBody {
    /// Variant, or `None` when idle
    pub fn kind(&self) -> Option<ActionKind> {
        let kind = match self {
            ActionBody::Idle => return None,
            ActionBody::PayUpdWarehouse { .. } => ActionKind::PayUpdWarehouse,
            ActionBody::PayUpdDistrict { .. } => ActionKind::PayUpdDistrict,
            ActionBody::PayUpdCustomer { .. } => ActionKind::PayUpdCustomer,
            ActionBody::PayInsHistory { .. } => ActionKind::PayInsHistory,
            ActionBody::NoUpdDistrict { .. } => ActionKind::NoUpdDistrict,
            ActionBody::NoUpdStock { .. } => ActionKind::NoUpdStock,
            ActionBody::MbWarehouse { .. } => ActionKind::MbWarehouse,
            ActionBody::MbCustomer { .. } => ActionKind::MbCustomer,
        };
        Some(kind)
    }

    /// Table and key of the row the action touches
    pub fn row(&self, txn: TxnId) -> Option<(TableId, Key)> {
        let row = match self {
            ActionBody::Idle => return None,
            ActionBody::PayUpdWarehouse { input, .. } => {
                (WAREHOUSE, keys::warehouse(input.home_wh))
            }
            ActionBody::PayUpdDistrict { input, .. } => {
                (DISTRICT, keys::district(input.home_wh, input.home_d))
            }
            ActionBody::PayUpdCustomer { input } => {
                let (c_w, c_d) = input.customer_location();
                (CUSTOMER, keys::customer(c_w, c_d, input.c_id))
            }
            ActionBody::PayInsHistory { input, .. } => {
                (HISTORY, keys::history(input.home_wh, input.home_d, txn.as_u64()))
            }
            ActionBody::NoUpdDistrict { wh, d } => (DISTRICT, keys::district(*wh, *d)),
            ActionBody::NoUpdStock { line, .. } => (STOCK, keys::stock(line.supply_wh, line.item)),
            ActionBody::MbWarehouse { input } => (WAREHOUSE, keys::warehouse(input.wh)),
            ActionBody::MbCustomer { input } => {
                (CUSTOMER, keys::customer(input.wh, input.d, input.c_id))
            }
        };
        Some(row)
    }
}

#[derive(Debug, Error)]
enum ExecError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("row {key} of {table} has an unexpected shape")]
    Shape { table: TableId, key: Key },

    #[error("{0}")]
    Rule(String),
}

type ExecResult<T> = std::result::Result<T, ExecError>;

fn overflow(what: &str, key: &Key) -> ExecError {
    ExecError::Rule(format!("{} of {} out of range", what, key))
}

fn fetch<T>(
    store: &Store,
    sm: TxnHandle,
    table: TableId,
    key: &Key,
    shape: fn(Tuple) -> Option<T>,
) -> ExecResult<T> {
    let tuple = store.fetch(sm, table, key)?;
    shape(tuple).ok_or_else(|| ExecError::Shape {
        table,
        key: key.clone(),
    })
}

/// A per-partition slice of a TPC-C transaction
#[derive(Debug, Default)]
pub struct TpccAction {
    header: ActionHeader,
    sm: Option<TxnHandle>,
    body: ActionBody,
}

impl TpccAction {
    /// Bind the action to a storage transaction and an input
    pub fn set(&mut self, sm: TxnHandle, body: ActionBody) {
        self.sm = Some(sm);
        self.body = body;
    }

    /// Current input
    pub fn body(&self) -> &ActionBody {
        &self.body
    }

    /// Storage transaction the action writes in
    pub fn sm(&self) -> Option<TxnHandle> {
        self.sm
    }

    fn execute(&self, store: &Store, sm: TxnHandle) -> ExecResult<()> {
        let txn = self.header.txn_id;
        match &self.body {
            ActionBody::Idle => return Err(ExecError::Rule("action has no input".into())),

            ActionBody::PayUpdWarehouse { input, names } => {
                let key = keys::warehouse(input.home_wh);
                let mut wh = fetch(store, sm, WAREHOUSE, &key, Tuple::into_warehouse)?;
                wh.ytd = wh
                    .ytd
                    .checked_add(input.amount)
                    .ok_or_else(|| overflow("ytd", &key))?;
                names.lock().warehouse = wh.name.clone();
                store.put(sm, WAREHOUSE, key, Tuple::Warehouse(wh))?;
            }

            ActionBody::PayUpdDistrict { input, names } => {
                let key = keys::district(input.home_wh, input.home_d);
                let mut d = fetch(store, sm, DISTRICT, &key, Tuple::into_district)?;
                d.ytd = d
                    .ytd
                    .checked_add(input.amount)
                    .ok_or_else(|| overflow("ytd", &key))?;
                names.lock().district = d.name.clone();
                store.put(sm, DISTRICT, key, Tuple::District(d))?;
            }

            ActionBody::PayUpdCustomer { input } => {
                let (c_w, c_d) = input.customer_location();
                let key = keys::customer(c_w, c_d, input.c_id);
                let mut c = fetch(store, sm, CUSTOMER, &key, Tuple::into_customer)?;
                let balance = c
                    .balance
                    .checked_sub(input.amount)
                    .ok_or_else(|| overflow("balance", &key))?;
                if balance < -c.credit_lim {
                    return Err(ExecError::Rule(format!(
                        "customer {} would exceed its credit limit",
                        key
                    )));
                }
                c.balance = balance;
                c.ytd_payment = c
                    .ytd_payment
                    .checked_add(input.amount)
                    .ok_or_else(|| overflow("ytd payment", &key))?;
                c.payment_cnt = c
                    .payment_cnt
                    .checked_add(1)
                    .ok_or_else(|| overflow("payment count", &key))?;
                if c.credit == Credit::Bad {
                    let mut data = format!(
                        "{},{},{},{},{},{}.{:02}|",
                        input.c_id,
                        c_d,
                        c_w,
                        input.home_d,
                        input.home_wh,
                        input.amount / 100,
                        input.amount % 100
                    );
                    data.push_str(&c.data);
                    truncate_data(&mut data, CUSTOMER_DATA_LEN);
                    c.data = data;
                }
                store.put(sm, CUSTOMER, key, Tuple::Customer(c))?;
            }

            ActionBody::PayInsHistory { input, data } => {
                let (c_w, c_d) = input.customer_location();
                let row = History {
                    c_id: input.c_id,
                    c_d,
                    c_w,
                    d: input.home_d,
                    w: input.home_wh,
                    amount: input.amount,
                    data: data.clone(),
                };
                let key = keys::history(input.home_wh, input.home_d, txn.as_u64());
                store.insert(sm, HISTORY, key, Tuple::History(row))?;
            }

            ActionBody::NoUpdDistrict { wh, d } => {
                let key = keys::district(*wh, *d);
                let mut district = fetch(store, sm, DISTRICT, &key, Tuple::into_district)?;
                district.next_o_id = district
                    .next_o_id
                    .checked_add(1)
                    .ok_or_else(|| overflow("next order id", &key))?;
                store.put(sm, DISTRICT, key, Tuple::District(district))?;
            }

            ActionBody::NoUpdStock { home_wh, line } => {
                let key = keys::stock(line.supply_wh, line.item);
                let Some(tuple) = store.get(sm, STOCK, &key)? else {
                    return Err(ExecError::Rule(format!("unknown item {}", line.item)));
                };
                let mut s = tuple.into_stock().ok_or_else(|| ExecError::Shape {
                    table: STOCK,
                    key: key.clone(),
                })?;
                let left = s
                    .quantity
                    .checked_sub(line.quantity)
                    .ok_or_else(|| overflow("quantity", &key))?;
                s.quantity = if left >= 10 {
                    left
                } else {
                    left.checked_add(91).ok_or_else(|| overflow("quantity", &key))?
                };
                s.ytd = s
                    .ytd
                    .checked_add(line.quantity)
                    .ok_or_else(|| overflow("ytd", &key))?;
                s.order_cnt = s
                    .order_cnt
                    .checked_add(1)
                    .ok_or_else(|| overflow("order count", &key))?;
                if line.supply_wh != *home_wh {
                    s.remote_cnt = s
                        .remote_cnt
                        .checked_add(1)
                        .ok_or_else(|| overflow("remote count", &key))?;
                }
                store.put(sm, STOCK, key, Tuple::Stock(s))?;
            }

            ActionBody::MbWarehouse { input } => {
                let key = keys::warehouse(input.wh);
                let mut wh = fetch(store, sm, WAREHOUSE, &key, Tuple::into_warehouse)?;
                wh.ytd = wh
                    .ytd
                    .checked_add(input.amount)
                    .ok_or_else(|| overflow("ytd", &key))?;
                store.put(sm, WAREHOUSE, key, Tuple::Warehouse(wh))?;
            }

            ActionBody::MbCustomer { input } => {
                let key = keys::customer(input.wh, input.d, input.c_id);
                let mut c = fetch(store, sm, CUSTOMER, &key, Tuple::into_customer)?;
                c.balance = c
                    .balance
                    .checked_sub(input.amount)
                    .ok_or_else(|| overflow("balance", &key))?;
                c.ytd_payment = c
                    .ytd_payment
                    .checked_add(input.amount)
                    .ok_or_else(|| overflow("ytd payment", &key))?;
                c.payment_cnt = c
                    .payment_cnt
                    .checked_add(1)
                    .ok_or_else(|| overflow("payment count", &key))?;
                store.put(sm, CUSTOMER, key, Tuple::Customer(c))?;
            }
        }
        Ok(())
    }
}

impl Recyclable for TpccAction {
    fn reset(&mut self) {
        self.header.reset();
        self.sm = None;
        self.body = ActionBody::Idle;
    }
}

impl Action for TpccAction {
    type Env = Store;

    fn header(&self) -> &ActionHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ActionHeader {
        &mut self.header
    }

    fn label(&self) -> &'static str {
        self.body.kind().map(ActionKind::label).unwrap_or("idle")
    }

    fn calc_keys(&self, keys: &mut KeySet) {
        if let Some((_, key)) = self.body.row(self.header.txn_id) {
            keys.add(key, LockMode::Excl);
        }
    }

    fn trx_exec(&mut self, store: &Store) -> Decision {
        let txn = self.header.txn_id;
        let Some(sm) = self.sm else {
            error!(%txn, action = self.label(), "action has no storage transaction");
            return Decision::Abort;
        };
        match self.execute(store, sm) {
            Ok(()) => Decision::Commit,
            Err(ExecError::Rule(reason)) => {
                debug!(%txn, action = self.label(), %reason, "aborted by business rule");
                Decision::Abort
            }
            Err(e) => {
                warn!(%txn, action = self.label(), error = %e, "storage failure, aborting");
                Decision::Abort
            }
        }
    }

    fn lock_policy(&self) -> LockPolicy {
        match self.body {
            ActionBody::MbWarehouse { .. } | ActionBody::MbCustomer { .. } => LockPolicy::Immediate,
            _ => LockPolicy::HoldUntilTerminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::populate::{populate, CUSTOMER_BALANCE, WAREHOUSE_YTD};
    use crate::schema::TpccScale;

    fn store() -> Store {
        let store = Store::new();
        populate(&store, &TpccScale::tiny(2));
        store
    }

    fn action(txn: u64, sm: TxnHandle, body: ActionBody) -> TpccAction {
        let mut a = TpccAction::default();
        a.header_mut().txn_id = TxnId(txn);
        a.set(sm, body);
        a
    }

    fn names() -> Arc<Mutex<PaymentNames>> {
        Arc::new(Mutex::new(PaymentNames::default()))
    }

    #[test]
    fn test_payment_warehouse_and_district() {
        let store = store();
        let sm = store.begin_transaction();
        let input = PaymentInput::local(1, 2, 3, 1_234);
        let shared = names();

        let mut wh = action(1, sm, ActionBody::PayUpdWarehouse {
            input,
            names: Arc::clone(&shared),
        });
        let mut d = action(1, sm, ActionBody::PayUpdDistrict {
            input,
            names: Arc::clone(&shared),
        });
        assert_eq!(wh.trx_exec(&store), Decision::Commit);
        assert_eq!(d.trx_exec(&store), Decision::Commit);
        store.commit(sm).unwrap();

        let row = store
            .peek(WAREHOUSE, &keys::warehouse(1))
            .and_then(Tuple::into_warehouse)
            .unwrap();
        assert_eq!(row.ytd, WAREHOUSE_YTD + 1_234);
        assert_eq!(shared.lock().history_data(), "W0001   D0001-02");
    }

    #[test]
    fn test_payment_customer_credit_limit() {
        let store = store();
        let sm = store.begin_transaction();
        let input = PaymentInput::local(1, 1, 1, 10_000_000);
        let mut c = action(1, sm, ActionBody::PayUpdCustomer { input });

        assert_eq!(c.trx_exec(&store), Decision::Abort);
        store.abort(sm).unwrap();
        let row = store
            .peek(CUSTOMER, &keys::customer(1, 1, 1))
            .and_then(Tuple::into_customer)
            .unwrap();
        assert_eq!(row.balance, CUSTOMER_BALANCE);
        assert_eq!(row.payment_cnt, 1);
    }

    #[test]
    fn test_bad_credit_customer_logs_payment() {
        let store = store();
        let sm = store.begin_transaction();
        let input = PaymentInput::local(2, 1, 10, 2_550);
        let mut c = action(1, sm, ActionBody::PayUpdCustomer { input });

        assert_eq!(c.trx_exec(&store), Decision::Commit);
        let row = store
            .peek(CUSTOMER, &keys::customer(2, 1, 10))
            .and_then(Tuple::into_customer)
            .unwrap();
        assert_eq!(row.balance, CUSTOMER_BALANCE - 2_550);
        assert_eq!(row.payment_cnt, 2);
        assert_eq!(row.data, "10,1,2,1,2,25.50|");
    }

    #[test]
    fn test_history_insert_is_keyed_by_transaction() {
        let store = store();
        let sm = store.begin_transaction();
        let input = PaymentInput::local(1, 1, 4, 500);
        let body = ActionBody::PayInsHistory {
            input,
            data: "W   D".into(),
        };

        let mut first = action(9, sm, body.clone());
        assert_eq!(first.trx_exec(&store), Decision::Commit);
        let mut again = action(9, sm, body);
        assert_eq!(again.trx_exec(&store), Decision::Abort);

        let row = store
            .peek(HISTORY, &keys::history(1, 1, 9))
            .and_then(Tuple::into_history)
            .unwrap();
        assert_eq!(row.c_id, 4);
        assert_eq!(row.data, "W   D");
    }

    #[test]
    fn test_stock_update_and_unknown_item() {
        let store = store();
        let sm = store.begin_transaction();
        let before = store
            .peek(STOCK, &keys::stock(2, 5))
            .and_then(Tuple::into_stock)
            .unwrap();

        let line = OrderLine {
            item: 5,
            supply_wh: 2,
            quantity: 3,
        };
        let mut a = action(1, sm, ActionBody::NoUpdStock { home_wh: 1, line });
        assert_eq!(a.trx_exec(&store), Decision::Commit);

        let after = store
            .peek(STOCK, &keys::stock(2, 5))
            .and_then(Tuple::into_stock)
            .unwrap();
        let expected = if before.quantity >= 13 {
            before.quantity - 3
        } else {
            before.quantity - 3 + 91
        };
        assert_eq!(after.quantity, expected);
        assert_eq!(after.ytd, 3);
        assert_eq!(after.remote_cnt, 1);

        let missing = OrderLine {
            item: 999,
            supply_wh: 1,
            quantity: 1,
        };
        let mut b = action(1, sm, ActionBody::NoUpdStock {
            home_wh: 1,
            line: missing,
        });
        assert_eq!(b.trx_exec(&store), Decision::Abort);
    }

    #[test]
    fn test_storage_failure_is_abort() {
        let store = store();
        let sm = store.begin_transaction();
        store.fail_writes_on(WAREHOUSE);
        let input = MbenchInput {
            wh: 1,
            d: 1,
            c_id: 1,
            amount: 10,
        };
        let mut a = action(1, sm, ActionBody::MbWarehouse { input });
        assert_eq!(a.trx_exec(&store), Decision::Abort);

        let mut unbound = TpccAction::default();
        assert_eq!(unbound.trx_exec(&store), Decision::Abort);
    }

    #[test]
    fn test_out_of_range_arithmetic_is_abort() {
        let store = store();
        let sm = store.begin_transaction();
        let input = MbenchInput {
            wh: 1,
            d: 1,
            c_id: 1,
            amount: i64::MAX,
        };
        let mut wh = action(1, sm, ActionBody::MbWarehouse { input });
        let mut c = action(1, sm, ActionBody::MbCustomer { input });
        assert_eq!(wh.trx_exec(&store), Decision::Abort);
        assert_eq!(c.trx_exec(&store), Decision::Abort);

        let line = OrderLine {
            item: 1,
            supply_wh: 1,
            quantity: i64::MIN,
        };
        let mut s = action(1, sm, ActionBody::NoUpdStock { home_wh: 1, line });
        assert_eq!(s.trx_exec(&store), Decision::Abort);
        store.abort(sm).unwrap();

        let row = store
            .peek(WAREHOUSE, &keys::warehouse(1))
            .and_then(Tuple::into_warehouse)
            .unwrap();
        assert_eq!(row.ytd, WAREHOUSE_YTD);
        let row = store
            .peek(CUSTOMER, &keys::customer(1, 1, 1))
            .and_then(Tuple::into_customer)
            .unwrap();
        assert_eq!(row.balance, CUSTOMER_BALANCE);
    }

    #[test]
    fn test_keys_and_policy() {
        let sm = TxnHandle(1);
        let input = PaymentInput::local(3, 2, 7, 100);
        let a = action(42, sm, ActionBody::PayInsHistory {
            input,
            data: String::new(),
        });
        let mut ks = KeySet::new();
        a.calc_keys(&mut ks);
        let locked: Vec<_> = ks.iter().cloned().collect();
        assert_eq!(locked, vec![(keys::history(3, 2, 42), LockMode::Excl)]);
        assert_eq!(a.lock_policy(), LockPolicy::HoldUntilTerminal);
        assert_eq!(a.label(), "pay-ins-hist");

        let mb = action(1, sm, ActionBody::MbCustomer {
            input: MbenchInput {
                wh: 1,
                d: 1,
                c_id: 1,
                amount: 1,
            },
        });
        assert_eq!(mb.lock_policy(), LockPolicy::Immediate);
    }

    #[test]
    fn test_reset_forgets_input() {
        let mut a = action(5, TxnHandle(3), ActionBody::NoUpdDistrict { wh: 1, d: 1 });
        a.reset();
        assert!(a.sm().is_none());
        assert!(a.body().kind().is_none());
        assert_eq!(a.header().txn_id, TxnId::default());
        assert_eq!(a.label(), "idle");
    }
}
