//! Inventory service facade.
//!
//! The single entry point consumed by the (out-of-scope) scanning UI/API
//! layer: scans, manual adjustments, aggregate reads, carrier issuance,
//! administrative restates, ledger history, and the notification feed.
//!
//! Scan counters are process-scoped [`metrics`] counters with explicit
//! names, not ambient globals: `scan.accepted`, `scan.rejected` (labelled
//! by reason), `movement.committed` (labelled by direction),
//! `reconcile.repairs`.

use crate::config::EngineConfig;
use crate::gate::ScanGate;
use crate::processor::{self, Adjustment};
use crate::{projector, reconciler};
use std::sync::Arc;
use stock_ledger_core::{
    CarrierState, Clock, ConsistencyReport, Direction, EngineError, LedgerEntry,
    LedgerEntryDraft, Movement, MovementFilter, NewCarrier, ProductId, Rejection,
    StockNotification, StockStore, StockTx, SystemClock, UnitCarrier,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Buffered notifications per subscriber before lagging ones lose messages.
const NOTIFY_CAPACITY: usize = 256;

/// A scan submitted by the scanning UI/API layer.
#[derive(Clone, Debug)]
pub struct ScanRequest {
    /// The scanned code.
    pub code: String,
    /// Movement direction selected on the scanner.
    pub direction: Direction,
    /// Operator identity.
    pub actor: String,
    /// Optional operator note.
    pub note: Option<String>,
}

/// A manual stock change, bypassing the scan gate.
#[derive(Clone, Debug)]
pub struct AdjustmentRequest {
    /// Product to adjust.
    pub product_id: ProductId,
    /// Movement direction.
    pub direction: Direction,
    /// Units to move. Must be > 0.
    pub quantity: i64,
    /// Operator identity.
    pub actor: String,
    /// Operator note.
    pub note: String,
    /// Optional external reference; generated when absent.
    pub reference: Option<String>,
}

struct ServiceInner<S> {
    store: S,
    gate: ScanGate,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    notifications: broadcast::Sender<StockNotification>,
}

/// The inventory ledger consistency engine's external interface.
pub struct InventoryService<S> {
    inner: Arc<ServiceInner<S>>,
}

impl<S> Clone for InventoryService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StockStore> InventoryService<S> {
    /// Create a service over the given store with the system clock.
    #[must_use]
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a service with an injected clock (tests drive the dedup
    /// windows through this).
    #[must_use]
    pub fn with_clock(store: S, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFY_CAPACITY);
        let gate = ScanGate::new(&config, Arc::clone(&clock));
        Self {
            inner: Arc::new(ServiceInner {
                store,
                gate,
                config,
                clock,
                notifications,
            }),
        }
    }

    /// Subscribe to committed-change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StockNotification> {
        self.inner.notifications.subscribe()
    }

    /// Direct access to the underlying store, for collaborators that only
    /// read already-consistent aggregates.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Process a barcode scan into a committed stock movement.
    ///
    /// # Errors
    ///
    /// Propagates the scan gate's [`Rejection`]s unchanged, plus
    /// [`EngineError::Storage`] when the datastore fails (nothing committed,
    /// retryable).
    pub async fn submit_scan(&self, request: ScanRequest) -> Result<Movement, EngineError> {
        let inner = &self.inner;
        let admission = match inner
            .gate
            .admit(&inner.store, &request.code, request.direction)
            .await
        {
            Ok(admission) => admission,
            Err(err) => {
                if let EngineError::Rejection(rejection) = &err {
                    debug!(code = %request.code, reason = rejection.kind(), "scan rejected");
                    metrics::counter!("scan.rejected", "reason" => rejection.kind()).increment(1);
                }
                return Err(err);
            }
        };

        let note = request.note.unwrap_or_else(|| match request.direction {
            Direction::In => "Stock in via barcode scan".to_string(),
            Direction::Out => "Stock out via barcode scan".to_string(),
        });

        match processor::process_scan(&inner.store, &admission, &request.actor, &note).await {
            Ok(movement) => {
                metrics::counter!("scan.accepted").increment(1);
                metrics::counter!("movement.committed", "direction" => request.direction.as_str())
                    .increment(1);
                self.notify_movement(&movement, request.direction);
                self.audit_after_movement(admission.product_id).await;
                Ok(movement)
            }
            Err(err) => {
                // The gate must not keep a failed scan recorded as "used".
                inner.gate.release(&admission.code);
                if let EngineError::Rejection(rejection) = &err {
                    metrics::counter!("scan.rejected", "reason" => rejection.kind()).increment(1);
                }
                Err(err)
            }
        }
    }

    /// Apply a manual stock adjustment.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::InvalidEntry`], [`Rejection::UnknownProduct`],
    /// or [`Rejection::InsufficientStock`] on invalid requests, and
    /// [`EngineError::Storage`] on datastore failure.
    pub async fn submit_adjustment(
        &self,
        request: AdjustmentRequest,
    ) -> Result<Movement, EngineError> {
        let reference = request.reference.unwrap_or_else(|| {
            format!("MANUAL-{}", self.inner.clock.now().timestamp_millis())
        });
        let adjustment = Adjustment {
            product_id: request.product_id,
            direction: request.direction,
            quantity: request.quantity,
            actor: request.actor,
            note: request.note,
            reference,
        };

        let movement = processor::process_adjustment(&self.inner.store, &adjustment).await?;
        metrics::counter!("movement.committed", "direction" => request.direction.as_str())
            .increment(1);
        self.notify_movement(&movement, request.direction);
        Ok(movement)
    }

    /// Current aggregate stock for a product.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::UnknownProduct`] if the product does not exist,
    /// or [`EngineError::Storage`] on datastore failure.
    pub async fn get_aggregate(&self, product_id: ProductId) -> Result<i64, EngineError> {
        let product = self
            .inner
            .store
            .product(product_id)
            .await?
            .ok_or(Rejection::UnknownProduct { product_id })?;
        Ok(product.aggregate_stock)
    }

    /// Paged ledger history, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] on datastore failure.
    pub async fn movements(
        &self,
        filter: &MovementFilter,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        Ok(self.inner.store.movements(filter).await?)
    }

    /// Issue `count` new carriers for a product, each carrying
    /// `units_per_carrier` units, in `Unassigned` state.
    ///
    /// Codes are system-generated and unique; only codes issued here are
    /// ever accepted by the scan gate.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::UnknownProduct`] if the product does not exist,
    /// [`Rejection::InvalidEntry`] for a non-positive unit count, or
    /// [`EngineError::Storage`] on datastore failure.
    pub async fn issue_carriers(
        &self,
        product_id: ProductId,
        count: u32,
        units_per_carrier: i64,
    ) -> Result<Vec<UnitCarrier>, EngineError> {
        if units_per_carrier <= 0 {
            return Err(Rejection::InvalidEntry {
                reason: format!("units per carrier must be positive, got {units_per_carrier}"),
            }
            .into());
        }
        if self.inner.store.product(product_id).await?.is_none() {
            return Err(Rejection::UnknownProduct { product_id }.into());
        }

        let mut tx = self.inner.store.begin().await?;
        tx.lock_product(product_id).await?;
        let serial_base = tx.carriers_for_product(product_id).await?.len();

        let mut issued = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let code = format!(
                "WH-{:04}-{:05}",
                product_id.value(),
                serial_base + offset as usize + 1
            );
            let inserted = tx
                .insert_carrier(&NewCarrier {
                    product_id,
                    code,
                    units_assigned: units_per_carrier,
                })
                .await?;
            issued.push(inserted);
        }
        tx.commit().await?;
        Ok(issued)
    }

    /// Administrative restate: mark every carrier of the product stocked in
    /// with one unit each, record the resulting delta in the ledger, and
    /// rewrite both cached views. Returns the new aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::UnknownProduct`] or [`EngineError::Storage`].
    pub async fn stock_in_all(
        &self,
        product_id: ProductId,
        actor: &str,
    ) -> Result<i64, EngineError> {
        self.restate(product_id, actor, "Restate: stock in all carriers", |units| {
            for unit in units.iter_mut() {
                unit.state = CarrierState::StockedIn;
                unit.units_assigned = 1;
            }
        })
        .await
    }

    /// Administrative restate: exactly the first `stocked_in_count` carriers
    /// (by id order) stocked in, the rest not counted. Returns the new
    /// aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::UnknownProduct`] or [`EngineError::Storage`].
    pub async fn set_counts(
        &self,
        product_id: ProductId,
        stocked_in_count: u32,
        actor: &str,
    ) -> Result<i64, EngineError> {
        self.restate(product_id, actor, "Restate: set stocked-in count", |units| {
            for (index, unit) in units.iter_mut().enumerate() {
                if index < stocked_in_count as usize {
                    unit.state = CarrierState::StockedIn;
                    if unit.units_assigned == 0 {
                        unit.units_assigned = 1;
                    }
                } else if unit.state == CarrierState::StockedIn {
                    unit.state = CarrierState::StockedOut;
                }
            }
        })
        .await
    }

    /// Verify one product's consistency without repairing.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::UnknownProduct`] or [`EngineError::Storage`].
    pub async fn verify(&self, product_id: ProductId) -> Result<ConsistencyReport, EngineError> {
        reconciler::verify(&self.inner.store, product_id).await
    }

    /// Repair one product's cached views against the carrier-derived truth.
    /// Returns the corrected aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] on datastore failure.
    pub async fn repair(&self, product_id: ProductId) -> Result<i64, EngineError> {
        reconciler::repair(
            &self.inner.store,
            product_id,
            self.inner.config.repair_units_default,
        )
        .await
    }

    /// One reconciliation pass over every product, repairing and notifying
    /// on any drift found.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] on datastore failure.
    pub async fn reconciliation_pass(&self) -> Result<(), EngineError> {
        let repaired =
            reconciler::sweep(&self.inner.store, self.inner.config.repair_units_default).await?;
        for report in repaired {
            let _ = self
                .inner
                .notifications
                .send(StockNotification::DriftRepaired { report });
        }
        Ok(())
    }

    /// Drive periodic reconciliation sweeps forever. Callers typically
    /// spawn this on its own task.
    pub async fn run_periodic_reconciliation(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.reconcile_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.reconciliation_pass().await {
                warn!(error = %err, "reconciliation sweep failed; will retry next interval");
            }
        }
    }

    /// Shared restate shell: lock, rewrite carrier states via `apply`,
    /// ledger the delta, overwrite both views.
    async fn restate(
        &self,
        product_id: ProductId,
        actor: &str,
        note: &str,
        apply: impl FnOnce(&mut Vec<UnitCarrier>),
    ) -> Result<i64, EngineError> {
        if self.inner.store.product(product_id).await?.is_none() {
            return Err(Rejection::UnknownProduct { product_id }.into());
        }

        let mut tx = self.inner.store.begin().await?;
        let product = tx.lock_product(product_id).await?;

        let before = tx.carriers_for_product(product_id).await?;
        let mut after = before.clone();
        apply(&mut after);
        for (old, new) in before.iter().zip(after.iter()) {
            if old != new {
                tx.update_carrier(new).await?;
            }
        }

        let truth = tx.carrier_truth(product_id).await?;
        let delta = truth - product.aggregate_stock;
        let mut recorded = None;
        if delta != 0 {
            let draft = LedgerEntryDraft {
                product_id,
                carrier_id: None,
                direction: if delta > 0 { Direction::In } else { Direction::Out },
                quantity: delta.abs(),
                actor: actor.to_string(),
                note: note.to_string(),
                reference: format!("RESTATE-{}", self.inner.clock.now().timestamp_millis()),
            };
            recorded = Some(tx.append_entry(&draft).await?);
        }
        let new_aggregate = projector::overwrite(&mut tx, product_id, truth).await?;
        tx.commit().await?;

        if let Some(entry) = recorded {
            let direction = entry.direction;
            let quantity = entry.quantity;
            let _ = self
                .inner
                .notifications
                .send(StockNotification::MovementRecorded { entry });
            let _ = self.inner.notifications.send(StockNotification::StockChanged {
                product_id,
                new_quantity: new_aggregate,
                direction,
                quantity_delta: quantity,
            });
        }
        Ok(new_aggregate)
    }

    /// Post-commit audit: verify the moved product and repair on drift.
    /// Runs off the request's critical path semantics: its failures are
    /// logged, never surfaced to the scan that triggered it.
    async fn audit_after_movement(&self, product_id: ProductId) {
        match reconciler::verify(&self.inner.store, product_id).await {
            Ok(report) if report.needs_repair() => {
                warn!(%product_id, ?report, "drift detected after movement; repairing");
                match reconciler::repair(
                    &self.inner.store,
                    product_id,
                    self.inner.config.repair_units_default,
                )
                .await
                {
                    Ok(_) => {
                        let _ = self
                            .inner
                            .notifications
                            .send(StockNotification::DriftRepaired { report });
                    }
                    Err(err) => warn!(%product_id, error = %err, "post-movement repair failed"),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%product_id, error = %err, "post-movement verify failed"),
        }
    }

    fn notify_movement(&self, movement: &Movement, direction: Direction) {
        // A send error only means no subscriber is currently listening.
        let _ = self.inner.notifications.send(StockNotification::StockChanged {
            product_id: movement.entry.product_id,
            new_quantity: movement.new_aggregate,
            direction,
            quantity_delta: movement.entry.quantity,
        });
        let _ = self
            .inner
            .notifications
            .send(StockNotification::MovementRecorded {
                entry: movement.entry.clone(),
            });
    }
}

impl<S> std::fmt::Debug for InventoryService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryService")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
