//! # Stock Ledger Core
//!
//! Domain types, error taxonomy, and storage abstractions for the inventory
//! ledger consistency engine.
//!
//! ## Core Concepts
//!
//! - **Movement Ledger**: append-only, immutable record of every
//!   stock-affecting event. Source of truth.
//! - **Unit Carrier**: a physical barcode label representing a fixed number
//!   of inventory units, with an explicit stock-contribution state.
//! - **Aggregate views**: two redundant cached representations of per-product
//!   stock (the product's cached aggregate and the inventory snapshot),
//!   always written together from a single delta.
//! - **Scan Gate**: idempotency and validity filter applied before a scan is
//!   allowed to produce a ledger entry.
//! - **Reconciliation**: detecting and correcting drift between the cached
//!   views and the carrier/ledger-derived truth.
//!
//! ## Invariants
//!
//! After every committed operation:
//!
//! 1. A product's cached aggregate equals the sum of `units_assigned` over
//!    its stocked-in carriers.
//! 2. The inventory snapshot equals the cached aggregate.
//! 3. Both equal the signed sum of the product's ledger entries.
//! 4. No carrier is stocked in with zero units assigned (a repairable
//!    defect, never a valid state).
//! 5. Aggregate stock never goes negative.
//!
//! The traits in [`store`] define the unit-of-work boundary that makes these
//! invariants enforceable: every movement commits the carrier transition,
//! the ledger append, and both view updates as one transaction.

pub mod clock;
pub mod error;
pub mod notify;
pub mod store;
pub mod types;

pub use chrono::{DateTime, Utc};

pub use clock::{Clock, SystemClock};
pub use error::{EngineError, Rejection, StorageError};
pub use notify::StockNotification;
pub use store::{MovementFilter, StockStore, StockTx};
pub use types::{
    Admission, CarrierId, CarrierState, ConsistencyReport, Direction, EntryId, InventorySnapshot,
    LedgerEntry, LedgerEntryDraft, Movement, NewCarrier, NewProduct, ProductId, ProductRecord,
    UnitCarrier,
};
