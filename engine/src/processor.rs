//! Stock transaction processor: one movement, end to end, atomically.
//!
//! Every movement commits the carrier transition, the ledger append, and
//! both cached-view updates as one unit of work. On any failure the whole
//! unit rolls back; no partial ledger entry, partial state transition, or
//! aggregate drift is observable to any other reader.
//!
//! The product row is locked first. Everything that depends on the current
//! aggregate (the OUT sufficiency check, the projector delta) runs under
//! that lock, so two concurrent OUTs competing for the same stock cannot
//! both succeed.

use crate::{carrier, projector};
use stock_ledger_core::{
    Admission, Direction, EngineError, LedgerEntryDraft, Movement, ProductId, Rejection,
    StockStore, StockTx,
};
use tracing::info;

/// A manual stock adjustment, bypassing the scan gate.
#[derive(Clone, Debug)]
pub struct Adjustment {
    /// Product to adjust.
    pub product_id: ProductId,
    /// Movement direction.
    pub direction: Direction,
    /// Units to move. Must be > 0.
    pub quantity: i64,
    /// Who performed the adjustment.
    pub actor: String,
    /// Operator note.
    pub note: String,
    /// External reference tag.
    pub reference: String,
}

/// Process an admitted scan into a committed movement.
///
/// Re-validates the carrier state on the row-locked carrier; a scan that
/// lost a race since gate admission is rejected here with the same error the
/// gate would have produced.
///
/// # Errors
///
/// Returns a [`Rejection`] if the locked state no longer permits the
/// transition or stock is insufficient, or [`EngineError::Storage`] if the
/// unit of work cannot be committed (nothing is then observable).
pub async fn process_scan<S: StockStore>(
    store: &S,
    admission: &Admission,
    actor: &str,
    note: &str,
) -> Result<Movement, EngineError> {
    let mut tx = store.begin().await?;

    let product = tx.lock_product(admission.product_id).await?;
    let mut locked = tx.lock_carrier(admission.carrier_id).await?;

    let transition = match admission.direction {
        Direction::In => carrier::scan_in(&mut locked),
        Direction::Out => carrier::scan_out(&mut locked),
    };
    if let Err(rejection) = transition {
        tx.rollback().await?;
        return Err(rejection.into());
    }

    // The locked row is authoritative for the unit count, not the admission
    // snapshot taken before the lock.
    let units = locked.units_assigned.max(1);

    if admission.direction == Direction::Out && units > product.aggregate_stock {
        tx.rollback().await?;
        return Err(Rejection::InsufficientStock {
            available: product.aggregate_stock,
            required: units,
            shortfall: units - product.aggregate_stock,
        }
        .into());
    }

    tx.update_carrier(&locked).await?;

    let draft = LedgerEntryDraft {
        product_id: admission.product_id,
        carrier_id: Some(admission.carrier_id),
        direction: admission.direction,
        quantity: units,
        actor: actor.to_string(),
        note: note.to_string(),
        reference: String::new(),
    };
    let entry = tx.append_entry(&draft).await?;
    let new_aggregate = projector::apply(&mut tx, admission.product_id, entry.signed_quantity()).await?;

    tx.commit().await?;

    info!(
        product_id = %admission.product_id,
        carrier_id = %admission.carrier_id,
        direction = %admission.direction,
        units,
        new_aggregate,
        "committed scan movement"
    );

    Ok(Movement {
        entry,
        new_aggregate,
    })
}

/// Process a manual adjustment into a committed movement.
///
/// Skips gate admission but follows the same unit of work, including the
/// OUT sufficiency check.
///
/// # Errors
///
/// Returns [`Rejection::InvalidEntry`] for a non-positive quantity,
/// [`Rejection::UnknownProduct`] if the product does not exist,
/// [`Rejection::InsufficientStock`] for an OUT exceeding the aggregate, or
/// [`EngineError::Storage`] on datastore failure.
pub async fn process_adjustment<S: StockStore>(
    store: &S,
    adjustment: &Adjustment,
) -> Result<Movement, EngineError> {
    if adjustment.quantity <= 0 {
        return Err(Rejection::InvalidEntry {
            reason: format!("quantity must be positive, got {}", adjustment.quantity),
        }
        .into());
    }
    if store.product(adjustment.product_id).await?.is_none() {
        return Err(Rejection::UnknownProduct {
            product_id: adjustment.product_id,
        }
        .into());
    }

    let mut tx = store.begin().await?;
    let product = tx.lock_product(adjustment.product_id).await?;

    if adjustment.direction == Direction::Out && adjustment.quantity > product.aggregate_stock {
        tx.rollback().await?;
        return Err(Rejection::InsufficientStock {
            available: product.aggregate_stock,
            required: adjustment.quantity,
            shortfall: adjustment.quantity - product.aggregate_stock,
        }
        .into());
    }

    let draft = LedgerEntryDraft {
        product_id: adjustment.product_id,
        carrier_id: None,
        direction: adjustment.direction,
        quantity: adjustment.quantity,
        actor: adjustment.actor.clone(),
        note: adjustment.note.clone(),
        reference: adjustment.reference.clone(),
    };
    let entry = tx.append_entry(&draft).await?;
    let new_aggregate =
        projector::apply(&mut tx, adjustment.product_id, entry.signed_quantity()).await?;

    tx.commit().await?;

    info!(
        product_id = %adjustment.product_id,
        direction = %adjustment.direction,
        quantity = adjustment.quantity,
        new_aggregate,
        "committed manual adjustment"
    );

    Ok(Movement {
        entry,
        new_aggregate,
    })
}
