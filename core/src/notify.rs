//! Outbound notifications emitted after committed state changes.
//!
//! These are the typed counterpart of the real-time UI refresh events: a
//! stock level change, the full ledger entry for history display, and a
//! reconciliation report for operational monitoring. Delivery is in-process
//! fan-out; subscribers that fall behind lose old notifications, never the
//! committed state itself (the ledger is the source of truth).

use crate::types::{ConsistencyReport, Direction, LedgerEntry, ProductId};
use serde::{Deserialize, Serialize};

/// A committed change observable by out-of-scope collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockNotification {
    /// A product's stock level changed.
    StockChanged {
        /// Affected product.
        product_id: ProductId,
        /// Aggregate stock after the movement.
        new_quantity: i64,
        /// Movement direction.
        direction: Direction,
        /// Unsigned units moved.
        quantity_delta: i64,
    },

    /// A ledger entry was committed, for transaction-history display.
    MovementRecorded {
        /// The committed entry.
        entry: LedgerEntry,
    },

    /// The reconciler detected drift and repaired it.
    DriftRepaired {
        /// The verification report that triggered the repair.
        report: ConsistencyReport,
    },
}

impl StockNotification {
    /// The product this notification concerns.
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        match self {
            Self::StockChanged { product_id, .. } => *product_id,
            Self::MovementRecorded { entry } => entry.product_id,
            Self::DriftRepaired { report } => report.product_id,
        }
    }
}
