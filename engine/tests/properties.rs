//! Property tests: conservation, non-negativity, and view agreement under
//! randomized operation sequences.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code fails loudly

use proptest::prelude::*;
use std::sync::Arc;
use stock_ledger_core::{Clock, Direction, EngineError, StockStore};
use stock_ledger_engine::{AdjustmentRequest, EngineConfig, InventoryService, ScanRequest};
use stock_ledger_testing::fixtures::store_with_carrier;
use stock_ledger_testing::{SteppingClock, test_clock};

/// Window-clearing step between operations: longer than both the
/// immediate-repeat grace period and the cooldown window.
const STEP_SECS: i64 = 200;

#[derive(Clone, Debug)]
struct Observed {
    aggregate: i64,
    ledger_sum: i64,
    carrier_sum: i64,
    snapshot: Option<i64>,
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime construction cannot fail in tests")
}

/// Drive a sequence of scans across a small carrier pool. Rejections are
/// part of normal operation (a carrier cannot stock in twice); storage
/// failures are not.
async fn run_scans(carrier_units: i64, ops: Vec<(usize, bool)>) -> Observed {
    let clock = SteppingClock::new(test_clock().now());
    let seeded = store_with_carrier(Arc::new(clock.clone()), carrier_units)
        .await
        .unwrap();
    let service = InventoryService::with_clock(
        seeded.store.clone(),
        EngineConfig::default(),
        Arc::new(clock.clone()),
    );
    let pid = seeded.product.id;

    let mut codes = vec![seeded.carrier.code.clone()];
    let issued = service.issue_carriers(pid, 3, carrier_units).await.unwrap();
    codes.extend(issued.into_iter().map(|c| c.code));

    for (index, stock_in) in ops {
        clock.advance_secs(STEP_SECS);
        let request = ScanRequest {
            code: codes[index % codes.len()].clone(),
            direction: if stock_in { Direction::In } else { Direction::Out },
            actor: "prop-operator".to_string(),
            note: None,
        };
        match service.submit_scan(request).await {
            Ok(_) | Err(EngineError::Rejection(_)) => {}
            Err(EngineError::Storage(err)) => panic!("unexpected storage failure: {err}"),
        }
    }

    Observed {
        aggregate: service.get_aggregate(pid).await.unwrap(),
        ledger_sum: seeded.store.ledger_truth(pid).await.unwrap(),
        carrier_sum: seeded.store.carrier_truth(pid).await.unwrap(),
        snapshot: seeded
            .store
            .snapshot(pid)
            .await
            .unwrap()
            .map(|s| s.quantity),
    }
}

/// Drive a sequence of manual adjustments. OUTs that would overdraw are
/// rejected and must leave no trace.
async fn run_adjustments(ops: Vec<(bool, i64)>) -> Observed {
    let clock = SteppingClock::new(test_clock().now());
    let seeded = store_with_carrier(Arc::new(clock.clone()), 1).await.unwrap();
    let service = InventoryService::with_clock(
        seeded.store.clone(),
        EngineConfig::default(),
        Arc::new(clock.clone()),
    );
    let pid = seeded.product.id;

    for (stock_in, quantity) in ops {
        clock.advance_secs(STEP_SECS);
        let request = AdjustmentRequest {
            product_id: pid,
            direction: if stock_in { Direction::In } else { Direction::Out },
            quantity,
            actor: "prop-manager".to_string(),
            note: "randomized adjustment".to_string(),
            reference: None,
        };
        match service.submit_adjustment(request).await {
            Ok(_) | Err(EngineError::Rejection(_)) => {}
            Err(EngineError::Storage(err)) => panic!("unexpected storage failure: {err}"),
        }
    }

    Observed {
        aggregate: service.get_aggregate(pid).await.unwrap(),
        ledger_sum: seeded.store.ledger_truth(pid).await.unwrap(),
        carrier_sum: seeded.store.carrier_truth(pid).await.unwrap(),
        snapshot: seeded
            .store
            .snapshot(pid)
            .await
            .unwrap()
            .map(|s| s.quantity),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Scans conserve all three truths: the cached aggregate, the signed
    /// ledger sum, and the carrier-derived sum all agree and never go
    /// negative.
    #[test]
    fn scans_conserve_every_truth(
        carrier_units in 1i64..5,
        ops in proptest::collection::vec((0usize..4, any::<bool>()), 1..32),
    ) {
        let observed = runtime().block_on(run_scans(carrier_units, ops));
        prop_assert!(observed.aggregate >= 0);
        prop_assert_eq!(observed.aggregate, observed.ledger_sum);
        prop_assert_eq!(observed.aggregate, observed.carrier_sum);
        if let Some(snapshot) = observed.snapshot {
            prop_assert_eq!(observed.aggregate, snapshot);
        }
    }

    /// Manual adjustments conserve the ledger sum and never overdraw.
    /// (They deliberately do not touch carriers, so carrier truth is not
    /// asserted here.)
    #[test]
    fn adjustments_conserve_ledger_sum(
        ops in proptest::collection::vec((any::<bool>(), 1i64..10), 1..32),
    ) {
        let observed = runtime().block_on(run_adjustments(ops));
        prop_assert!(observed.aggregate >= 0);
        prop_assert_eq!(observed.aggregate, observed.ledger_sum);
        if let Some(snapshot) = observed.snapshot {
            prop_assert_eq!(observed.aggregate, snapshot);
        }
    }
}
