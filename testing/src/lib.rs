//! # Stock Ledger Testing
//!
//! Test doubles for the stock ledger engine:
//!
//! - [`InMemoryStockStore`]: a full [`StockStore`](stock_ledger_core::StockStore)
//!   implementation with staged-copy transactions, commit fault injection,
//!   and back doors for planting the storage defects the reconciler exists
//!   to repair.
//! - [`FixedClock`] / [`SteppingClock`]: deterministic time, so dedup
//!   windows can be crossed without sleeping.
//! - [`fixtures`]: seeded store builders for scenario tests.

pub mod clock;
pub mod fixtures;
pub mod store;

pub use clock::{FixedClock, SteppingClock, test_clock};
pub use store::{InMemoryStockStore, InMemoryTx};
