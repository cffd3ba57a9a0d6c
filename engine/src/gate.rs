//! Scan gate: idempotency and validity filter in front of the ledger.
//!
//! A burst of duplicate scans (operator double-scan, scanner echo, network
//! retry) must not double-count stock. The gate applies three checks before
//! a scan may produce a ledger entry:
//!
//! 1. **Immediate-repeat suppression** — if the immediately preceding
//!    accepted scan used the identical code, reject, regardless of
//!    direction. The tracker is global across the gate, cleared by a
//!    different code or after a short grace window.
//! 2. **State validity** — IN requires the carrier not already stocked in;
//!    OUT requires it currently stocked in.
//! 3. **Cooldown dedup** — the same carrier and direction are not accepted
//!    twice within the cooldown window, checked against the ledger.
//!
//! Admission tentatively records the code in the repeat tracker. If the
//! downstream commit fails, the processor calls [`ScanGate::release`] so a
//! retry of the same legitimate scan is not blocked. The authoritative
//! duplicate defense remains the in-transaction carrier state re-check; the
//! gate exists to reject cheap and early.

use crate::config::EngineConfig;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};
use stock_ledger_core::{Admission, Clock, Direction, EngineError, Rejection, StockStore};

/// The last accepted scan, for immediate-repeat suppression.
#[derive(Clone, Debug)]
struct LastScan {
    code: String,
    at: DateTime<Utc>,
}

/// Idempotency and ordering filter for scan-triggered operations.
pub struct ScanGate {
    clock: Arc<dyn Clock>,
    repeat_window: TimeDelta,
    cooldown: TimeDelta,
    // Sole shared mutable in-process state of the engine (single-writer
    // tracker per the concurrency model). Never held across an await.
    last_accepted: Mutex<Option<LastScan>>,
}

impl ScanGate {
    /// Create a gate with the given windows and clock.
    #[must_use]
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            repeat_window: config.immediate_repeat_window(),
            cooldown: config.duplicate_cooldown(),
            last_accepted: Mutex::new(None),
        }
    }

    /// Decide whether a scan may proceed to the ledger.
    ///
    /// On acceptance, returns the [`Admission`] the processor uses to build
    /// the ledger entry, and records the code in the repeat tracker.
    ///
    /// # Errors
    ///
    /// - [`Rejection::ImmediateRepeat`] if the previous accepted scan used
    ///   the identical code within the grace window.
    /// - [`Rejection::UnknownBarcode`] if no carrier has this code.
    /// - [`Rejection::AlreadyStockedIn`] / [`Rejection::NeverStockedIn`] on
    ///   state-invalid scans.
    /// - [`Rejection::DuplicateOperation`] if the same carrier and direction
    ///   were accepted within the cooldown window.
    /// - [`EngineError::Storage`] if the datastore cannot be read.
    pub async fn admit<S: StockStore>(
        &self,
        store: &S,
        code: &str,
        direction: Direction,
    ) -> Result<Admission, EngineError> {
        let now = self.clock.now();
        self.check_immediate_repeat(code, now)?;

        let carrier = store
            .carrier_by_code(code)
            .await?
            .ok_or_else(|| Rejection::UnknownBarcode {
                code: code.to_string(),
            })?;

        match direction {
            Direction::In if carrier.state.is_stocked_in() => {
                return Err(Rejection::AlreadyStockedIn {
                    carrier_id: carrier.id,
                }
                .into());
            }
            Direction::Out if !carrier.state.is_stocked_in() => {
                return Err(Rejection::NeverStockedIn {
                    carrier_id: carrier.id,
                }
                .into());
            }
            Direction::In | Direction::Out => {}
        }

        if let Some(last) = store.last_movement(carrier.id, direction).await? {
            if now - last < self.cooldown {
                return Err(Rejection::DuplicateOperation {
                    carrier_id: carrier.id,
                }
                .into());
            }
        }

        self.record(code, now);

        Ok(Admission {
            product_id: carrier.product_id,
            carrier_id: carrier.id,
            code: code.to_string(),
            units: carrier.units_per_scan(),
            direction,
        })
    }

    /// Forget a tentatively recorded code after a failed downstream commit,
    /// so the same legitimate scan can be retried.
    pub fn release(&self, code: &str) {
        if let Ok(mut guard) = self.last_accepted.lock() {
            if guard.as_ref().is_some_and(|last| last.code == code) {
                *guard = None;
            }
        }
    }

    fn check_immediate_repeat(&self, code: &str, now: DateTime<Utc>) -> Result<(), Rejection> {
        let Ok(guard) = self.last_accepted.lock() else {
            // A poisoned tracker must not take scanning down; the
            // in-transaction state check still rejects true duplicates.
            return Ok(());
        };
        if let Some(last) = guard.as_ref() {
            if last.code == code && now - last.at < self.repeat_window {
                return Err(Rejection::ImmediateRepeat {
                    code: code.to_string(),
                });
            }
        }
        Ok(())
    }

    fn record(&self, code: &str, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_accepted.lock() {
            *guard = Some(LastScan {
                code: code.to_string(),
                at: now,
            });
        }
    }
}

impl std::fmt::Debug for ScanGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanGate")
            .field("repeat_window", &self.repeat_window)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code unwraps for clear failure locations

    use super::*;
    use stock_ledger_core::{CarrierState, LedgerEntryDraft, NewCarrier, StockTx};
    use stock_ledger_testing::fixtures::{SeededStore, store_with_carrier};
    use stock_ledger_testing::{SteppingClock, test_clock};

    async fn setup() -> (ScanGate, SeededStore, SteppingClock) {
        let clock = SteppingClock::new(test_clock().now());
        let seeded = store_with_carrier(Arc::new(clock.clone()), 2).await.unwrap();
        let gate = ScanGate::new(&EngineConfig::default(), Arc::new(clock.clone()));
        (gate, seeded, clock)
    }

    fn is_rejection(err: &EngineError, kind: &str) -> bool {
        matches!(err, EngineError::Rejection(r) if r.kind() == kind)
    }

    #[tokio::test]
    async fn identical_code_is_suppressed_within_the_grace_window() {
        let (gate, seeded, clock) = setup().await;
        let code = &seeded.carrier.code;

        let admission = gate.admit(&seeded.store, code, Direction::In).await.unwrap();
        assert_eq!(admission.units, 2);

        let err = gate.admit(&seeded.store, code, Direction::In).await.unwrap_err();
        assert!(is_rejection(&err, "immediate_repeat"));

        // The window clears by itself after the grace period.
        clock.advance_secs(6);
        assert!(gate.admit(&seeded.store, code, Direction::In).await.is_ok());
    }

    #[tokio::test]
    async fn a_different_code_clears_the_tracker() {
        let (gate, seeded, _clock) = setup().await;
        let first = &seeded.carrier.code;
        let second = seeded
            .store
            .seed_carrier(
                &NewCarrier {
                    product_id: seeded.product.id,
                    code: "WH-0001-00002".to_string(),
                    units_assigned: 1,
                },
                CarrierState::Unassigned,
            )
            .await;

        gate.admit(&seeded.store, first, Direction::In).await.unwrap();
        gate.admit(&seeded.store, &second.code, Direction::In).await.unwrap();
        assert!(gate.admit(&seeded.store, first, Direction::In).await.is_ok());
    }

    #[tokio::test]
    async fn release_reopens_the_slot_for_retry() {
        let (gate, seeded, _clock) = setup().await;
        let code = &seeded.carrier.code;

        gate.admit(&seeded.store, code, Direction::In).await.unwrap();
        gate.release(code);
        assert!(gate.admit(&seeded.store, code, Direction::In).await.is_ok());
    }

    #[tokio::test]
    async fn arbitrary_codes_are_rejected() {
        let (gate, seeded, _clock) = setup().await;
        let err = gate
            .admit(&seeded.store, "not-issued-by-us", Direction::In)
            .await
            .unwrap_err();
        assert!(is_rejection(&err, "unknown_barcode"));
    }

    #[tokio::test]
    async fn cooldown_is_checked_against_the_committed_ledger() {
        let (gate, seeded, clock) = setup().await;
        let code = &seeded.carrier.code;

        // A committed IN entry for this carrier, as the processor would
        // leave behind.
        let mut tx = seeded.store.begin().await.unwrap();
        tx.append_entry(&LedgerEntryDraft {
            product_id: seeded.product.id,
            carrier_id: Some(seeded.carrier.id),
            direction: Direction::In,
            quantity: 2,
            actor: "operator".to_string(),
            note: String::new(),
            reference: String::new(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        clock.advance_secs(30);
        let err = gate.admit(&seeded.store, code, Direction::In).await.unwrap_err();
        assert!(is_rejection(&err, "duplicate_operation"));

        clock.advance_secs(120);
        assert!(gate.admit(&seeded.store, code, Direction::In).await.is_ok());
    }
}
