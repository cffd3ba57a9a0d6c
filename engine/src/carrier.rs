//! Unit carrier state machine.
//!
//! Pure transition functions over [`UnitCarrier`]; persistence is the
//! caller's job. The processor runs these a second time on the row-locked
//! carrier inside the movement transaction, so a gate-level check that went
//! stale under concurrency is always caught before commit.

use stock_ledger_core::{CarrierState, Rejection, UnitCarrier};

/// Transition a carrier to `StockedIn`.
///
/// Allowed from `Unassigned` or `StockedOut`. A zero-unit label stocks in as
/// one unit so that its ledger contribution and its registry contribution
/// stay equal.
///
/// # Errors
///
/// Returns [`Rejection::AlreadyStockedIn`] if the carrier is already
/// stocked in.
pub fn scan_in(carrier: &mut UnitCarrier) -> Result<(), Rejection> {
    match carrier.state {
        CarrierState::StockedIn => Err(Rejection::AlreadyStockedIn {
            carrier_id: carrier.id,
        }),
        CarrierState::Unassigned | CarrierState::StockedOut => {
            if carrier.units_assigned == 0 {
                carrier.units_assigned = 1;
            }
            carrier.state = CarrierState::StockedIn;
            Ok(())
        }
    }
}

/// Transition a carrier to `StockedOut`.
///
/// Allowed only from `StockedIn`. "Never stocked in" and "already stocked
/// out again" are both rejected by the same state check; the error message
/// covers both readings.
///
/// # Errors
///
/// Returns [`Rejection::NeverStockedIn`] if the carrier is not currently
/// stocked in.
pub fn scan_out(carrier: &mut UnitCarrier) -> Result<(), Rejection> {
    match carrier.state {
        CarrierState::StockedIn => {
            carrier.state = CarrierState::StockedOut;
            Ok(())
        }
        CarrierState::Unassigned | CarrierState::StockedOut => Err(Rejection::NeverStockedIn {
            carrier_id: carrier.id,
        }),
    }
}

/// Repair a stocked-in carrier with zero units assigned.
///
/// Returns `true` if the carrier was defective and has been normalized to
/// `default_units`. The default is configuration, not a business rule; see
/// `EngineConfig::repair_units_default`.
pub fn normalize_units(carrier: &mut UnitCarrier, default_units: i64) -> bool {
    if carrier.state.is_stocked_in() && carrier.units_assigned == 0 {
        carrier.units_assigned = default_units.max(1);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use stock_ledger_core::{CarrierId, ProductId};

    fn carrier(state: CarrierState, units: i64) -> UnitCarrier {
        UnitCarrier {
            id: CarrierId::new(1),
            product_id: ProductId::new(1),
            code: "WH-0001-00001".to_string(),
            units_assigned: units,
            state,
        }
    }

    #[test]
    fn scan_in_from_unassigned() {
        let mut c = carrier(CarrierState::Unassigned, 5);
        assert!(scan_in(&mut c).is_ok());
        assert_eq!(c.state, CarrierState::StockedIn);
        assert_eq!(c.units_assigned, 5);
    }

    #[test]
    fn scan_in_again_is_rejected() {
        let mut c = carrier(CarrierState::StockedIn, 5);
        assert_eq!(
            scan_in(&mut c),
            Err(Rejection::AlreadyStockedIn {
                carrier_id: CarrierId::new(1)
            })
        );
        assert_eq!(c.state, CarrierState::StockedIn);
    }

    #[test]
    fn scan_in_after_stock_out_is_allowed() {
        let mut c = carrier(CarrierState::StockedOut, 3);
        assert!(scan_in(&mut c).is_ok());
        assert_eq!(c.state, CarrierState::StockedIn);
    }

    #[test]
    fn scan_in_normalizes_zero_units() {
        let mut c = carrier(CarrierState::Unassigned, 0);
        assert!(scan_in(&mut c).is_ok());
        assert_eq!(c.units_assigned, 1);
    }

    #[test]
    fn scan_out_requires_stocked_in() {
        let mut never = carrier(CarrierState::Unassigned, 1);
        assert_eq!(
            scan_out(&mut never),
            Err(Rejection::NeverStockedIn {
                carrier_id: CarrierId::new(1)
            })
        );

        let mut out_again = carrier(CarrierState::StockedOut, 1);
        assert_eq!(
            scan_out(&mut out_again),
            Err(Rejection::NeverStockedIn {
                carrier_id: CarrierId::new(1)
            })
        );
    }

    #[test]
    fn scan_out_from_stocked_in() {
        let mut c = carrier(CarrierState::StockedIn, 2);
        assert!(scan_out(&mut c).is_ok());
        assert_eq!(c.state, CarrierState::StockedOut);
        // Unit count is untouched; the label keeps its denomination.
        assert_eq!(c.units_assigned, 2);
    }

    #[test]
    fn normalize_units_fixes_only_defective_carriers() {
        let mut defective = carrier(CarrierState::StockedIn, 0);
        assert!(normalize_units(&mut defective, 1));
        assert_eq!(defective.units_assigned, 1);

        let mut healthy = carrier(CarrierState::StockedIn, 4);
        assert!(!normalize_units(&mut healthy, 1));
        assert_eq!(healthy.units_assigned, 4);

        let mut stocked_out = carrier(CarrierState::StockedOut, 0);
        assert!(!normalize_units(&mut stocked_out, 1));
    }

    #[test]
    fn normalize_units_never_assigns_less_than_one() {
        let mut defective = carrier(CarrierState::StockedIn, 0);
        assert!(normalize_units(&mut defective, 0));
        assert_eq!(defective.units_assigned, 1);
    }
}
