//! Consistency reconciler: detects and repairs drift between the cached
//! views and the carrier-derived truth.
//!
//! The projector keeps the views transactionally in step with the ledger,
//! so through engine paths drift cannot occur; this module is the safety
//! net for externally mutated rows and crash remnants from
//! weaker-isolation deployments.
//!
//! Two independent truths are compared:
//!
//! - **carrier truth**: sum of `units_assigned` over stocked-in carriers,
//!   the recomputation target for repair;
//! - **ledger truth**: signed sum of ledger entries since inception.
//!
//! Disagreement between the two is a ledger/carrier desync, surfaced as the
//! `ledger_carrier_mismatch` alarm and logged, never silently repaired:
//! repair overwrites caches, it does not rewrite history. Manual
//! adjustments have no carrier, so they raise this alarm by construction;
//! operators confirm whether the divergence is expected.

use crate::{carrier, projector};
use stock_ledger_core::{ConsistencyReport, EngineError, ProductId, Rejection, StockStore, StockTx};
use tracing::{info, warn};

/// Verify one product's cached views against the carrier-derived truth.
///
/// Read-only; takes no locks and never repairs. `is_consistent` covers
/// cache drift (either view diverging from carrier truth) and zero-unit
/// defects; the ledger cross-check is reported separately.
///
/// # Errors
///
/// Returns [`Rejection::UnknownProduct`] if the product does not exist, or
/// [`EngineError::Storage`] on datastore failure.
pub async fn verify<S: StockStore>(
    store: &S,
    product_id: ProductId,
) -> Result<ConsistencyReport, EngineError> {
    let product = store
        .product(product_id)
        .await?
        .ok_or(Rejection::UnknownProduct { product_id })?;

    let truth_from_carriers = store.carrier_truth(product_id).await?;
    let truth_from_ledger = store.ledger_truth(product_id).await?;
    let cached_snapshot_value = store.snapshot(product_id).await?.map(|s| s.quantity);
    let defective = store.defective_carriers(product_id).await?;

    let views_agree = product.aggregate_stock == truth_from_carriers
        && cached_snapshot_value.is_none_or(|quantity| quantity == truth_from_carriers);

    let report = ConsistencyReport {
        product_id,
        is_consistent: views_agree && defective.is_empty(),
        truth_from_carriers,
        cached_product_value: product.aggregate_stock,
        cached_snapshot_value,
        truth_from_ledger,
        ledger_carrier_mismatch: truth_from_carriers != truth_from_ledger,
        defective_carriers: u32::try_from(defective.len()).unwrap_or(u32::MAX),
    };

    if report.ledger_carrier_mismatch {
        warn!(
            %product_id,
            carrier_truth = truth_from_carriers,
            ledger_truth = truth_from_ledger,
            "ledger/carrier mismatch; caches follow carrier truth, history left untouched"
        );
    }

    Ok(report)
}

/// Repair one product: normalize defective carriers, recompute the carrier
/// truth, and overwrite both cached views to match, as one unit of work.
///
/// Safe to call concurrently with in-flight movements: the product and
/// carrier row locks serialize repair against any transaction updating the
/// same rows. Returns the corrected aggregate.
///
/// # Errors
///
/// Returns [`EngineError::Storage`] on datastore failure (nothing is then
/// committed).
pub async fn repair<S: StockStore>(
    store: &S,
    product_id: ProductId,
    default_units: i64,
) -> Result<i64, EngineError> {
    let mut tx = store.begin().await?;
    tx.lock_product(product_id).await?;

    let mut normalized = 0u32;
    for mut unit in tx.carriers_for_product(product_id).await? {
        if carrier::normalize_units(&mut unit, default_units) {
            tx.update_carrier(&unit).await?;
            normalized += 1;
        }
    }

    let truth = tx.carrier_truth(product_id).await?;
    let corrected = projector::overwrite(&mut tx, product_id, truth).await?;
    tx.commit().await?;

    info!(%product_id, corrected, normalized, "repaired cached stock views");
    metrics::counter!("reconcile.repairs").increment(1);
    if normalized > 0 {
        metrics::counter!("reconcile.normalized_carriers").increment(u64::from(normalized));
    }

    Ok(corrected)
}

/// One full verification pass over every known product, repairing any
/// product found inconsistent. Returns the reports of the products that
/// needed repair.
///
/// # Errors
///
/// Returns [`EngineError::Storage`] on datastore failure; products verified
/// before the failure stay repaired.
pub async fn sweep<S: StockStore>(
    store: &S,
    default_units: i64,
) -> Result<Vec<ConsistencyReport>, EngineError> {
    let mut repaired = Vec::new();
    for product_id in store.product_ids().await? {
        let report = verify(store, product_id).await?;
        if report.needs_repair() {
            warn!(%product_id, ?report, "drift detected during sweep");
            repair(store, product_id, default_units).await?;
            repaired.push(report);
        }
    }
    Ok(repaired)
}
