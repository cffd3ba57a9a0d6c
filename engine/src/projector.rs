//! Aggregate projector: keeps both cached views equal to the ledger-derived
//! truth, inside the caller's transaction.
//!
//! Both views (the product's cached aggregate and the inventory snapshot)
//! are written from one signed delta. They are never computed independently
//! per view, which is what made the original dual-write a drift hazard.

use stock_ledger_core::{ProductId, StockTx, StorageError};

/// Add `signed_delta` (positive for IN, negative for OUT) to both cached
/// views and return the new aggregate.
///
/// The sufficiency check has already run under the product row lock, so a
/// negative result here means the views were mutated outside the engine
/// mid-transaction; the unit of work is aborted rather than committing a
/// negative aggregate.
///
/// # Errors
///
/// Returns [`StorageError::Conflict`] if the delta would drive the aggregate
/// negative, or any storage failure from the underlying writes.
pub async fn apply<T: StockTx>(
    tx: &mut T,
    product_id: ProductId,
    signed_delta: i64,
) -> Result<i64, StorageError> {
    let new_aggregate = tx.apply_aggregate(product_id, signed_delta).await?;
    if new_aggregate < 0 {
        return Err(StorageError::Conflict(format!(
            "aggregate for product {product_id} would become {new_aggregate}"
        )));
    }
    Ok(new_aggregate)
}

/// Overwrite both cached views with an absolute quantity (repair path) and
/// return it.
///
/// # Errors
///
/// Returns [`StorageError`] on datastore failure.
pub async fn overwrite<T: StockTx>(
    tx: &mut T,
    product_id: ProductId,
    quantity: i64,
) -> Result<i64, StorageError> {
    tx.overwrite_aggregate(product_id, quantity.max(0)).await
}
