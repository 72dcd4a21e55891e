//! Transaction inputs and the TPC-C input builder
//!
//! Inputs are plain `Clone` values copied into actions. The builder draws
//! them with the TPC-C random functions:
//!
//! ```text
//! URand(x, y)      uniform in [x, y]
//! NURand(A, x, y)  (((URand(0, A) | URand(x, y)) + C) % (y - x + 1)) + x
//! ```
//!
//! where `C` is a per-run constant picked when the builder is created.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use doradb_core::{Error, Result};

use crate::schema::TpccScale;

/// Payment selection threshold: above it the customer is the home one
pub const HOME_CUSTOMER_THRESHOLD: u32 = 85;

/// Payment amount bounds, in cents
pub const MIN_PAYMENT: i64 = 100;
/// Upper payment amount bound, in cents
pub const MAX_PAYMENT: i64 = 500_000;

/// Largest amount the engine accepts, in cents
pub const MAX_AMOUNT: i64 = 100_000_000_000;
/// Largest quantity of one order line
pub const MAX_QUANTITY: i64 = 10;

fn check_amount(amount: i64) -> Result<()> {
    if amount <= 0 || amount > MAX_AMOUNT {
        return Err(Error::InvalidInput(format!(
            "amount {} outside 1..={}",
            amount, MAX_AMOUNT
        )));
    }
    Ok(())
}

/// Input of one Payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInput {
    /// Warehouse receiving the payment
    pub home_wh: u64,
    /// District receiving the payment
    pub home_d: u64,
    /// 1..=100, picks home or remote customer
    pub cust_wh_selection: u32,
    /// Warehouse of a remote customer
    pub remote_wh: u64,
    /// District of a remote customer
    pub remote_d: u64,
    /// Customer id
    pub c_id: u64,
    /// Amount paid, in cents
    pub amount: i64,
}

impl PaymentInput {
    /// A payment by a customer of the home district
    pub fn local(wh: u64, d: u64, c_id: u64, amount: i64) -> Self {
        PaymentInput {
            home_wh: wh,
            home_d: d,
            cust_wh_selection: 100,
            remote_wh: wh,
            remote_d: d,
            c_id,
            amount,
        }
    }

    /// Reject amounts the engine cannot apply
    pub fn validate(&self) -> Result<()> {
        check_amount(self.amount)
    }

    /// `(warehouse, district)` of the paying customer
    pub fn customer_location(&self) -> (u64, u64) {
        if self.cust_wh_selection > HOME_CUSTOMER_THRESHOLD {
            (self.home_wh, self.home_d)
        } else {
            (self.remote_wh, self.remote_d)
        }
    }
}

/// One line of a NewOrder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Item id; ids beyond the catalogue make the order roll back
    pub item: u64,
    /// Supplying warehouse
    pub supply_wh: u64,
    /// Quantity ordered
    pub quantity: i64,
}

/// Input of one NewOrder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderInput {
    /// Home warehouse
    pub wh: u64,
    /// District
    pub d: u64,
    /// Ordering customer
    pub c_id: u64,
    /// Order lines
    pub lines: Vec<OrderLine>,
}

impl NewOrderInput {
    /// Does any line come from another warehouse?
    pub fn is_remote(&self) -> bool {
        self.lines.iter().any(|l| l.supply_wh != self.wh)
    }

    /// Reject empty orders and out-of-range quantities
    pub fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(Error::InvalidInput("order without lines".into()));
        }
        if let Some(line) = self
            .lines
            .iter()
            .find(|l| !(1..=MAX_QUANTITY).contains(&l.quantity))
        {
            return Err(Error::InvalidInput(format!(
                "quantity {} of item {} outside 1..={}",
                line.quantity, line.item, MAX_QUANTITY
            )));
        }
        Ok(())
    }
}

/// Input of the single-row micro-benchmarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbenchInput {
    /// Warehouse
    pub wh: u64,
    /// District (customer benchmark only)
    pub d: u64,
    /// Customer (customer benchmark only)
    pub c_id: u64,
    /// Amount, in cents
    pub amount: i64,
}

impl MbenchInput {
    /// Reject amounts the engine cannot apply
    pub fn validate(&self) -> Result<()> {
        check_amount(self.amount)
    }
}

/// Draws TPC-C inputs for a database of a given scale
#[derive(Debug)]
pub struct TpccInputBuilder<R: Rng = StdRng> {
    rng: R,
    scale: TpccScale,
    c_customer: u64,
    c_item: u64,
}

impl TpccInputBuilder<StdRng> {
    /// Builder seeded from the OS
    pub fn new(scale: TpccScale) -> Self {
        Self::from_rng(scale, StdRng::from_entropy())
    }

    /// Reproducible builder
    pub fn seeded(scale: TpccScale, seed: u64) -> Self {
        Self::from_rng(scale, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> TpccInputBuilder<R> {
    /// Builder drawing from `rng`
    pub fn from_rng(scale: TpccScale, mut rng: R) -> Self {
        let c_customer = rng.gen_range(0..=1023);
        let c_item = rng.gen_range(0..=8191);
        TpccInputBuilder {
            rng,
            scale,
            c_customer,
            c_item,
        }
    }

    /// Scale the inputs are drawn for
    pub fn scale(&self) -> &TpccScale {
        &self.scale
    }

    /// URand(lo, hi)
    pub fn urand(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }

    /// NURand(a, lo, hi) with the builder's constant for `a`
    pub fn nurand(&mut self, a: u64, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        let c = match a {
            1023 => self.c_customer,
            8191 => self.c_item,
            _ => 0,
        };
        let skewed = self.urand(0, a) | self.urand(lo, hi);
        ((skewed + c) % (hi - lo + 1)) + lo
    }

    fn warehouse(&mut self, specific: Option<u64>) -> u64 {
        match specific {
            Some(w) => w,
            None => self.urand(1, self.scale.warehouses),
        }
    }

    /// A warehouse other than `home` (or `home` when there is only one)
    fn other_warehouse(&mut self, home: u64) -> u64 {
        let count = self.scale.warehouses;
        if count <= 1 {
            return home;
        }
        let pick = self.urand(1, count - 1);
        if pick >= home {
            pick + 1
        } else {
            pick
        }
    }

    fn customer(&mut self) -> u64 {
        self.nurand(1023, 1, self.scale.customers_per_district)
    }

    fn district(&mut self) -> u64 {
        self.urand(1, self.scale.districts_per_warehouse)
    }

    /// Payment input, at `specific` warehouse or a random one
    pub fn payment(&mut self, specific: Option<u64>) -> PaymentInput {
        let home_wh = self.warehouse(specific);
        let home_d = self.district();
        let cust_wh_selection = self.urand(1, 100) as u32;
        let remote_wh = self.other_warehouse(home_wh);
        let remote_d = self.district();
        let c_id = self.customer();
        let amount = self.urand(MIN_PAYMENT as u64, MAX_PAYMENT as u64) as i64;
        PaymentInput {
            home_wh,
            home_d,
            cust_wh_selection,
            remote_wh,
            remote_d,
            c_id,
            amount,
        }
    }

    /// NewOrder input, at `specific` warehouse or a random one
    ///
    /// Items of one order are distinct. About 1% of orders carry an item
    /// id past the catalogue in their last line and roll back.
    pub fn new_order(&mut self, specific: Option<u64>) -> NewOrderInput {
        let wh = self.warehouse(specific);
        let d = self.district();
        let c_id = self.customer();
        let items = self.scale.items.max(1);
        let count = self.urand(5, 15).min(items) as usize;

        let mut lines: Vec<OrderLine> = Vec::with_capacity(count);
        while lines.len() < count {
            let mut item = self.nurand(8191, 1, items);
            let mut attempts = 0;
            while lines.iter().any(|l| l.item == item) {
                attempts += 1;
                item = if attempts < 64 {
                    self.nurand(8191, 1, items)
                } else {
                    // dense catalogue: take the first unused id
                    (1..=items)
                        .find(|i| lines.iter().all(|l| l.item != *i))
                        .unwrap_or(item)
                };
            }
            let supply_wh = if self.urand(1, 100) > 1 {
                wh
            } else {
                self.other_warehouse(wh)
            };
            let quantity = self.urand(1, MAX_QUANTITY as u64) as i64;
            lines.push(OrderLine {
                item,
                supply_wh,
                quantity,
            });
        }

        if self.urand(1, 100) == 1 {
            if let Some(last) = lines.last_mut() {
                last.item = items + 1;
            }
        }

        NewOrderInput { wh, d, c_id, lines }
    }

    /// Micro-benchmark input, at `specific` warehouse or a random one
    pub fn mbench(&mut self, specific: Option<u64>) -> MbenchInput {
        let wh = self.warehouse(specific);
        let d = self.district();
        let c_id = self.customer();
        let amount = self.urand(MIN_PAYMENT as u64, MAX_PAYMENT as u64) as i64;
        MbenchInput { wh, d, c_id, amount }
    }
}
