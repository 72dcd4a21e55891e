//! Initial database load
//!
//! Values follow the TPC-C initial state where the schema has them: every
//! warehouse starts with a YTD of 300,000.00, every district with 30,000.00
//! and a next order id of 3001, every customer with a balance of -10.00 and
//! one payment of 10.00. One customer in ten has bad credit. Rows are
//! derived from their ids so two loads of the same scale are identical.

use doradb_storage::MemoryStorage;
use tracing::info;

use crate::schema::{
    keys, Credit, Customer, District, Stock, TpccScale, Tuple, Warehouse, CUSTOMER, DISTRICT,
    STOCK, WAREHOUSE,
};

/// Initial warehouse YTD, in cents
pub const WAREHOUSE_YTD: i64 = 30_000_000;
/// Initial district YTD, in cents
pub const DISTRICT_YTD: i64 = 3_000_000;
/// Initial next order id of a district
pub const FIRST_ORDER_ID: u64 = 3001;
/// Initial customer balance, in cents
pub const CUSTOMER_BALANCE: i64 = -1_000;
/// Customer credit limit, in cents
pub const CREDIT_LIMIT: i64 = 5_000_000;

/// Rows loaded per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateStats {
    /// Warehouse rows
    pub warehouses: usize,
    /// District rows
    pub districts: usize,
    /// Customer rows
    pub customers: usize,
    /// Stock rows
    pub stock: usize,
}

/// Load the initial database for `scale` into `store`
pub fn populate(store: &MemoryStorage<Tuple>, scale: &TpccScale) -> PopulateStats {
    let mut stats = PopulateStats::default();
    for w in 1..=scale.warehouses {
        store.load(
            WAREHOUSE,
            keys::warehouse(w),
            Tuple::Warehouse(Warehouse {
                name: format!("W{:04}", w),
                ytd: WAREHOUSE_YTD,
            }),
        );
        stats.warehouses += 1;

        for d in 1..=scale.districts_per_warehouse {
            store.load(
                DISTRICT,
                keys::district(w, d),
                Tuple::District(District {
                    name: format!("D{:04}-{:02}", w, d),
                    ytd: DISTRICT_YTD,
                    next_o_id: FIRST_ORDER_ID,
                }),
            );
            stats.districts += 1;

            for c in 1..=scale.customers_per_district {
                store.load(CUSTOMER, keys::customer(w, d, c), Tuple::Customer(customer(c)));
                stats.customers += 1;
            }
        }

        for i in 1..=scale.items {
            store.load(
                STOCK,
                keys::stock(w, i),
                Tuple::Stock(Stock {
                    quantity: 10 + ((w * 31 + i * 17) % 91) as i64,
                    ytd: 0,
                    order_cnt: 0,
                    remote_cnt: 0,
                }),
            );
            stats.stock += 1;
        }
    }
    info!(
        warehouses = stats.warehouses,
        districts = stats.districts,
        customers = stats.customers,
        stock = stats.stock,
        "database populated"
    );
    stats
}

fn customer(c: u64) -> Customer {
    Customer {
        last: format!("CUST{:04}", c),
        credit: if c % 10 == 0 { Credit::Bad } else { Credit::Good },
        credit_lim: CREDIT_LIMIT,
        balance: CUSTOMER_BALANCE,
        ytd_payment: -CUSTOMER_BALANCE,
        payment_cnt: 1,
        data: String::new(),
    }
}
