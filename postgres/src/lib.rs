//! `PostgreSQL` persistence for the stock ledger.
//!
//! This crate provides the production implementation of the
//! `StockStore`/`StockTx` traits from `stock-ledger-core`. Every unit of
//! work maps to one database transaction, and product/carrier rows are
//! taken with `SELECT ... FOR UPDATE`, which gives the per-product
//! single-writer discipline the store contract requires.
//!
//! # Example
//!
//! ```ignore
//! use stock_ledger_postgres::PostgresStockStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStockStore::connect("postgres://localhost/stock").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod store;

pub use store::{PostgresStockStore, PostgresStockTx};
