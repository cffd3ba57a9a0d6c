//! Domain types for the stock ledger.
//!
//! Identifiers are newtypes over the datastore's integer keys so that a
//! product id can never be passed where a carrier id is expected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(i64);

/// Unique identifier for a unit carrier (a physical barcode label).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CarrierId(i64);

/// Unique identifier for a ledger entry. Strictly increasing in commit order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(i64);

macro_rules! id_impls {
    ($name:ident) => {
        impl $name {
            /// Create an id from its raw datastore value.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw datastore value.
            #[must_use]
            pub const fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_impls!(ProductId);
id_impls!(CarrierId);
id_impls!(EntryId);

/// Direction of a stock movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Stock enters the warehouse.
    In,
    /// Stock leaves the warehouse.
    Out,
}

impl Direction {
    /// Sign applied to a quantity when summing ledger deltas.
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::In => 1,
            Self::Out => -1,
        }
    }

    /// Stable string form used in storage and notifications.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stock-contribution state of a unit carrier.
///
/// A carrier contributes its `units_assigned` to the aggregate only while
/// `StockedIn`. `StockedOut` is distinct from `Unassigned`: it records that
/// the carrier has been through a full in/out cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierState {
    /// Issued but never stocked in; not counted.
    Unassigned,
    /// Counted in the aggregate.
    StockedIn,
    /// Previously stocked in, currently not counted.
    StockedOut,
}

impl CarrierState {
    /// Whether a carrier in this state contributes units to the aggregate.
    #[must_use]
    pub const fn is_stocked_in(self) -> bool {
        matches!(self, Self::StockedIn)
    }
}

/// A physical barcode label carrying a fixed number of inventory units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCarrier {
    /// Carrier identity.
    pub id: CarrierId,
    /// Owning product.
    pub product_id: ProductId,
    /// Unique scannable code. Only system-issued codes exist.
    pub code: String,
    /// Units represented by this one label. Always >= 0.
    pub units_assigned: i64,
    /// Current stock-contribution state.
    pub state: CarrierState,
}

impl UnitCarrier {
    /// Units this carrier moves per scan: `units_assigned`, defaulting to 1
    /// when unset at issuance time.
    #[must_use]
    pub const fn units_per_scan(&self) -> i64 {
        if self.units_assigned > 0 {
            self.units_assigned
        } else {
            1
        }
    }
}

/// A carrier to be inserted by the registry at issuance time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCarrier {
    /// Owning product.
    pub product_id: ProductId,
    /// Unique scannable code.
    pub code: String,
    /// Units this label will carry.
    pub units_assigned: i64,
}

/// Catalog-owned product row, as seen by the ledger engine.
///
/// The engine only reads `sku`/`price` and reads/writes `aggregate_stock`;
/// everything else about a product belongs to the (out-of-scope) catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Product identity.
    pub id: ProductId,
    /// Unique stock-keeping unit.
    pub sku: String,
    /// Price in minor currency units.
    pub price: i64,
    /// Cached aggregate stock, derived from the ledger and carrier states.
    pub aggregate_stock: i64,
}

/// A product to be inserted into the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewProduct {
    /// Unique stock-keeping unit.
    pub sku: String,
    /// Price in minor currency units.
    pub price: i64,
}

/// Materialized per-product stock cache, redundant with
/// [`ProductRecord::aggregate_stock`] and required to always equal it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Product this snapshot caches.
    pub product_id: ProductId,
    /// Cached quantity.
    pub quantity: i64,
    /// When the snapshot row was last written.
    pub last_updated: DateTime<Utc>,
}

/// A stock-affecting event to be appended to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntryDraft {
    /// Product whose stock is affected.
    pub product_id: ProductId,
    /// Carrier that triggered the movement; `None` for manual adjustments.
    pub carrier_id: Option<CarrierId>,
    /// Movement direction.
    pub direction: Direction,
    /// Units moved. Always > 0; the direction carries the sign.
    pub quantity: i64,
    /// Who performed the operation.
    pub actor: String,
    /// Free-form note.
    pub note: String,
    /// External reference tag.
    pub reference: String,
}

/// An immutable, committed ledger entry. Never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Strictly increasing entry id, assigned at commit.
    pub id: EntryId,
    /// Product whose stock was affected.
    pub product_id: ProductId,
    /// Carrier that triggered the movement; `None` for manual adjustments.
    pub carrier_id: Option<CarrierId>,
    /// Movement direction.
    pub direction: Direction,
    /// Units moved. Always > 0.
    pub quantity: i64,
    /// Who performed the operation.
    pub actor: String,
    /// Free-form note.
    pub note: String,
    /// External reference tag.
    pub reference: String,
    /// Commit timestamp, monotonic within a product.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed contribution of this entry to the product's aggregate.
    #[must_use]
    pub const fn signed_quantity(&self) -> i64 {
        self.direction.sign() * self.quantity
    }
}

/// Result of an accepted scan passing the Scan Gate.
///
/// Carries everything the processor needs to build the ledger entry without
/// re-resolving the code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admission {
    /// Resolved product.
    pub product_id: ProductId,
    /// Resolved carrier.
    pub carrier_id: CarrierId,
    /// The admitted code, echoed back for gate release on failure.
    pub code: String,
    /// Units to move for this scan.
    pub units: i64,
    /// Admitted direction.
    pub direction: Direction,
}

/// Outcome of a committed stock movement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// The ledger entry created by this movement.
    pub entry: LedgerEntry,
    /// The product's aggregate stock after the movement.
    pub new_aggregate: i64,
}

/// Result of a reconciliation verify pass for one product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Product that was verified.
    pub product_id: ProductId,
    /// Whether both cached views agree with the carrier-derived truth.
    pub is_consistent: bool,
    /// Sum of `units_assigned` over stocked-in carriers.
    pub truth_from_carriers: i64,
    /// Cached `aggregate_stock` on the product row.
    pub cached_product_value: i64,
    /// Cached snapshot quantity, if a snapshot row exists.
    pub cached_snapshot_value: Option<i64>,
    /// Signed sum of the product's ledger entries.
    pub truth_from_ledger: i64,
    /// Set when the carrier truth and the ledger truth disagree, which
    /// indicates a ledger/carrier desync rather than simple cache drift.
    pub ledger_carrier_mismatch: bool,
    /// Carriers found stocked in with zero units assigned.
    pub defective_carriers: u32,
}

impl ConsistencyReport {
    /// Whether any repair action is warranted for this product.
    #[must_use]
    pub const fn needs_repair(&self) -> bool {
        !self.is_consistent
    }
}
