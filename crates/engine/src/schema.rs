//! TPC-C flavoured schema
//!
//! Five tables, every key leading with a warehouse id so that all of them
//! can be range-partitioned by warehouse:
//!
//! | table     | key                          |
//! |-----------|------------------------------|
//! | warehouse | `(w)`                        |
//! | district  | `(w, d)`                     |
//! | customer  | `(w, d, c)`                  |
//! | history   | `(w, d, txn)`                |
//! | stock     | `(w, i)`                     |
//!
//! Money is kept in cents.

use doradb_core::{Key, TableId};
use serde::{Deserialize, Serialize};

/// Warehouse table
pub const WAREHOUSE: TableId = TableId(0);
/// District table
pub const DISTRICT: TableId = TableId(1);
/// Customer table
pub const CUSTOMER: TableId = TableId(2);
/// History table
pub const HISTORY: TableId = TableId(3);
/// Stock table
pub const STOCK: TableId = TableId(4);

/// Longest customer data string kept
pub const CUSTOMER_DATA_LEN: usize = 500;

/// Size of a TPC-C database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpccScale {
    /// Warehouses (the scale factor)
    pub warehouses: u64,
    /// Districts per warehouse
    pub districts_per_warehouse: u64,
    /// Customers per district
    pub customers_per_district: u64,
    /// Items (and stock rows per warehouse)
    pub items: u64,
}

impl Default for TpccScale {
    fn default() -> Self {
        TpccScale {
            warehouses: 1,
            districts_per_warehouse: 10,
            customers_per_district: 3000,
            items: 100_000,
        }
    }
}

impl TpccScale {
    /// Full-size rows for `warehouses` warehouses
    pub fn with_warehouses(warehouses: u64) -> Self {
        TpccScale {
            warehouses,
            ..TpccScale::default()
        }
    }

    /// A tiny database, for tests
    pub fn tiny(warehouses: u64) -> Self {
        TpccScale {
            warehouses,
            districts_per_warehouse: 2,
            customers_per_district: 10,
            items: 20,
        }
    }
}

/// Customer credit rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credit {
    /// "GC"
    Good,
    /// "BC": payments are logged into the customer's data field
    Bad,
}

/// Warehouse row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    /// W_NAME
    pub name: String,
    /// W_YTD
    pub ytd: i64,
}

/// District row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct District {
    /// D_NAME
    pub name: String,
    /// D_YTD
    pub ytd: i64,
    /// D_NEXT_O_ID
    pub next_o_id: u64,
}

/// Customer row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// C_LAST
    pub last: String,
    /// C_CREDIT
    pub credit: Credit,
    /// C_CREDIT_LIM
    pub credit_lim: i64,
    /// C_BALANCE
    pub balance: i64,
    /// C_YTD_PAYMENT
    pub ytd_payment: i64,
    /// C_PAYMENT_CNT
    pub payment_cnt: u32,
    /// C_DATA
    pub data: String,
}

/// History row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// H_C_ID
    pub c_id: u64,
    /// H_C_D_ID
    pub c_d: u64,
    /// H_C_W_ID
    pub c_w: u64,
    /// H_D_ID
    pub d: u64,
    /// H_W_ID
    pub w: u64,
    /// H_AMOUNT
    pub amount: i64,
    /// H_DATA: warehouse and district names
    pub data: String,
}

/// Stock row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    /// S_QUANTITY
    pub quantity: i64,
    /// S_YTD
    pub ytd: i64,
    /// S_ORDER_CNT
    pub order_cnt: u32,
    /// S_REMOTE_CNT
    pub remote_cnt: u32,
}

/// Any row of the schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tuple {
    /// Warehouse row
    Warehouse(Warehouse),
    /// District row
    District(District),
    /// Customer row
    Customer(Customer),
    /// History row
    History(History),
    /// Stock row
    Stock(Stock),
}

impl Tuple {
    /// Table the row belongs to
    pub fn table(&self) -> TableId {
        match self {
            Tuple::Warehouse(_) => WAREHOUSE,
            Tuple::District(_) => DISTRICT,
            Tuple::Customer(_) => CUSTOMER,
            Tuple::History(_) => HISTORY,
            Tuple::Stock(_) => STOCK,
        }
    }

    /// Warehouse row, if it is one
    pub fn into_warehouse(self) -> Option<Warehouse> {
        match self {
            Tuple::Warehouse(w) => Some(w),
            _ => None,
        }
    }

    /// District row, if it is one
    pub fn into_district(self) -> Option<District> {
        match self {
            Tuple::District(d) => Some(d),
            _ => None,
        }
    }

    /// Customer row, if it is one
    pub fn into_customer(self) -> Option<Customer> {
        match self {
            Tuple::Customer(c) => Some(c),
            _ => None,
        }
    }

    /// History row, if it is one
    pub fn into_history(self) -> Option<History> {
        match self {
            Tuple::History(h) => Some(h),
            _ => None,
        }
    }

    /// Stock row, if it is one
    pub fn into_stock(self) -> Option<Stock> {
        match self {
            Tuple::Stock(s) => Some(s),
            _ => None,
        }
    }
}

/// Key constructors
pub mod keys {
    use super::Key;

    /// `(w)`
    pub fn warehouse(w: u64) -> Key {
        Key::from([w])
    }

    /// `(w, d)`
    pub fn district(w: u64, d: u64) -> Key {
        Key::from([w, d])
    }

    /// `(w, d, c)`
    pub fn customer(w: u64, d: u64, c: u64) -> Key {
        Key::from([w, d, c])
    }

    /// `(w, d, txn)`
    pub fn history(w: u64, d: u64, txn: u64) -> Key {
        Key::from([w, d, txn])
    }

    /// `(w, i)`
    pub fn stock(w: u64, item: u64) -> Key {
        Key::from([w, item])
    }
}

/// Cut `data` down to at most `max` bytes on a char boundary
pub(crate) fn truncate_data(data: &mut String, max: usize) {
    if data.len() <= max {
        return;
    }
    let mut end = max;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    data.truncate(end);
}
