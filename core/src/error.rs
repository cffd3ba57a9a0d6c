//! Error taxonomy for the ledger engine.
//!
//! Three kinds of failure, kept strictly apart:
//!
//! - [`Rejection`]: the scan or adjustment is invalid or disallowed by
//!   business state. Always surfaced to the caller with enough structure to
//!   render a specific message; never silently dropped.
//! - Integrity defects: drift between cached and derived truth. Handled by
//!   the reconciler and observable only via logs and notifications, never on
//!   the request path.
//! - [`StorageError`]: the datastore failed. Retryable; nothing was
//!   committed.
//!
//! Callers dispatch on variants, never on message text.

use crate::types::{CarrierId, ProductId};
use thiserror::Error;

/// A scan or adjustment that is invalid or disallowed by business state.
///
/// Each variant maps to a distinct operator-facing message so "already done"
/// is distinguishable from "invalid item" and "insufficient stock".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The scanned code does not belong to any system-issued carrier.
    #[error("Barcode '{code}' not found; only system-issued barcodes are accepted")]
    UnknownBarcode {
        /// The code that was scanned.
        code: String,
    },

    /// Stock-in scan for a carrier that is already stocked in.
    #[error("Carrier {carrier_id} is already stocked in")]
    AlreadyStockedIn {
        /// The carrier that was scanned.
        carrier_id: CarrierId,
    },

    /// Stock-out scan for a carrier that is not currently stocked in.
    #[error("Cannot stock out carrier {carrier_id}: it is not currently stocked in")]
    NeverStockedIn {
        /// The carrier that was scanned.
        carrier_id: CarrierId,
    },

    /// The same carrier and direction were accepted within the cooldown
    /// window.
    #[error("Duplicate operation: the same movement for carrier {carrier_id} was accepted recently")]
    DuplicateOperation {
        /// The carrier that was scanned.
        carrier_id: CarrierId,
    },

    /// The immediately preceding accepted scan used the identical code.
    #[error("Barcode '{code}' was just scanned; scan a different barcode or wait a moment")]
    ImmediateRepeat {
        /// The repeated code.
        code: String,
    },

    /// An OUT movement would drive the aggregate below zero.
    #[error("Insufficient stock: available {available}, required {required}, shortfall {shortfall}")]
    InsufficientStock {
        /// Units currently available.
        available: i64,
        /// Units the movement requires.
        required: i64,
        /// How many units are missing.
        shortfall: i64,
    },

    /// The ledger entry draft violates an input constraint.
    #[error("Invalid ledger entry: {reason}")]
    InvalidEntry {
        /// Which constraint was violated.
        reason: String,
    },

    /// The referenced product does not exist.
    #[error("Product {product_id} not found")]
    UnknownProduct {
        /// The missing product.
        product_id: ProductId,
    },
}

impl Rejection {
    /// Stable machine-readable kind, for metrics labels and structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownBarcode { .. } => "unknown_barcode",
            Self::AlreadyStockedIn { .. } => "already_stocked_in",
            Self::NeverStockedIn { .. } => "never_stocked_in",
            Self::DuplicateOperation { .. } => "duplicate_operation",
            Self::ImmediateRepeat { .. } => "immediate_repeat",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidEntry { .. } => "invalid_entry",
            Self::UnknownProduct { .. } => "unknown_product",
        }
    }
}

/// Datastore failure. The operation committed nothing and may be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The datastore could not be reached or the statement failed.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A row the operation depends on is missing or malformed.
    #[error("Storage corrupt: {0}")]
    Corrupt(String),

    /// The unit of work lost a locking or serialization conflict.
    #[error("Storage conflict: {0}")]
    Conflict(String),
}

/// Failure surfaced at the engine's external interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Business rejection; see [`Rejection`].
    #[error(transparent)]
    Rejection(#[from] Rejection),

    /// Infrastructure failure; see [`StorageError`].
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Whether retrying the identical request can succeed without any state
    /// change in between. True only for infrastructure failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_carries_shortfall() {
        let rejection = Rejection::InsufficientStock {
            available: 5,
            required: 10,
            shortfall: 5,
        };
        let message = rejection.to_string();
        assert!(message.contains("available 5"));
        assert!(message.contains("required 10"));
        assert!(message.contains("shortfall 5"));
    }

    #[test]
    fn rejection_is_not_retryable() {
        let err = EngineError::from(Rejection::UnknownBarcode {
            code: "XYZ".to_string(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn storage_failure_is_retryable() {
        let err = EngineError::from(StorageError::Unavailable("connection refused".to_string()));
        assert!(err.is_retryable());
    }

    #[test]
    fn distinct_messages_per_rejection_kind() {
        let already = Rejection::AlreadyStockedIn {
            carrier_id: CarrierId::new(1),
        }
        .to_string();
        let never = Rejection::NeverStockedIn {
            carrier_id: CarrierId::new(1),
        }
        .to_string();
        assert_ne!(already, never);
    }
}
