//! Seeded store builders for scenario tests.

use crate::store::InMemoryStockStore;
use std::sync::Arc;
use stock_ledger_core::{
    CarrierState, Clock, NewCarrier, NewProduct, ProductRecord, StockStore, StorageError,
    UnitCarrier,
};

/// A store seeded with one product and one unassigned carrier, the smallest
/// setup a scan scenario needs.
pub struct SeededStore {
    /// The seeded store.
    pub store: InMemoryStockStore,
    /// The seeded product (aggregate stock 0).
    pub product: ProductRecord,
    /// The seeded carrier, in `Unassigned` state.
    pub carrier: UnitCarrier,
}

/// Seed a store with one product and one carrier carrying `units` units.
///
/// # Errors
///
/// Returns [`StorageError`] if seeding fails, which indicates a broken test
/// setup rather than behavior under test.
pub async fn store_with_carrier(
    clock: Arc<dyn Clock>,
    units: i64,
) -> Result<SeededStore, StorageError> {
    let store = InMemoryStockStore::new(clock);
    let product = store
        .insert_product(&NewProduct {
            sku: "SKU-TEST-1".to_string(),
            price: 1500,
        })
        .await?;
    let carrier = store
        .seed_carrier(
            &NewCarrier {
                product_id: product.id,
                code: format!("WH-{:04}-00001", product.id.value()),
                units_assigned: units,
            },
            CarrierState::Unassigned,
        )
        .await;
    Ok(SeededStore {
        store,
        product,
        carrier,
    })
}
