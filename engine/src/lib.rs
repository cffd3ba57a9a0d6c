//! # Stock Ledger Engine
//!
//! The stock consistency and idempotent scan-processing core: turns a
//! barcode scan into a durable, correctly ordered stock movement while
//! keeping the cached aggregate views in agreement with the ledger and the
//! carrier registry.
//!
//! ## Data flow
//!
//! ```text
//! scan ──► Scan Gate ──► Stock Transaction Processor
//!          (dedup,        │  one unit of work:
//!           validity)     │  carrier transition + ledger append
//!                         │  + both cached views (projector)
//!                         ▼
//!                      commit ──► notifications (stock_changed,
//!                         │        movement_recorded)
//!                         ▼
//!                 post-commit audit (verify, repair on drift)
//! ```
//!
//! The projector writes both cached views synchronously inside the movement
//! transaction, so drift cannot be introduced by the engine itself; the
//! [`reconciler`] is an auditing pass that catches externally mutated data
//! and crash remnants from weaker-isolation deployments.
//!
//! ## Entry point
//!
//! [`InventoryService`] is the facade consumed by the (out-of-scope) scan
//! API layer: [`InventoryService::submit_scan`],
//! [`InventoryService::submit_adjustment`],
//! [`InventoryService::get_aggregate`], and
//! [`InventoryService::subscribe`] for real-time refresh notifications.

pub mod carrier;
pub mod config;
pub mod gate;
pub mod processor;
pub mod projector;
pub mod reconciler;
pub mod service;

pub use config::EngineConfig;
pub use gate::ScanGate;
pub use service::{AdjustmentRequest, InventoryService, ScanRequest};
