//! Property-based tests: FEFO planner invariants over random candidate
//! sets, and ledger conservation over random mutation sequences.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use wms_stock_api::entities::stock_movement::ReferenceType;
use wms_stock_api::entities::{lot, stock};
use wms_stock_api::errors::ServiceError;
use wms_stock_api::fefo::plan_fefo;
use wms_stock_api::repositories::{
    AvailableStock, InMemoryStore, MovementContext, StockKey, StockRepository,
};

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn candidate(expiry_offset_days: i64, qty: u32, reserved: u32) -> AvailableStock {
    let now = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
    let lot_id = Uuid::new_v4();
    let expiry = base_date() + Duration::days(expiry_offset_days);
    AvailableStock {
        stock: stock::Model {
            id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            zone_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            material_id: Uuid::new_v4(),
            lot_id: Some(lot_id),
            quantity: Decimal::from(qty),
            reserved_qty: Decimal::from(reserved.min(qty)),
            unit_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        },
        lot: lot::Model {
            id: lot_id,
            lot_number: format!("LOT-{}", lot_id),
            material_id: Uuid::new_v4(),
            supplier_id: None,
            supplier_lot_number: None,
            manufactured_date: None,
            expiry_date: expiry,
            received_date: base_date(),
            status: lot::LotStatus::Active.as_str().to_string(),
            qc_status: lot::QcStatus::Passed.as_str().to_string(),
            last_expiry_alert_days: None,
            notes: None,
            created_at: now,
            updated_at: now,
        },
    }
}

fn candidates_strategy() -> impl Strategy<Value = Vec<AvailableStock>> {
    prop::collection::vec((1i64..365, 0u32..200, 0u32..200), 0..12).prop_map(|specs| {
        let mut rows: Vec<AvailableStock> = specs
            .into_iter()
            .map(|(offset, qty, reserved)| candidate(offset, qty, reserved))
            .collect();
        rows.sort_by(|a, b| a.lot.expiry_date.cmp(&b.lot.expiry_date));
        rows
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn plan_total_equals_request_or_fails_exactly(
        rows in candidates_strategy(),
        requested in 1u32..500,
    ) {
        let requested = Decimal::from(requested);
        let total_available: Decimal = rows.iter().map(|c| c.available_qty()).sum();

        match plan_fefo(&rows, requested) {
            Ok(plan) => {
                prop_assert!(total_available >= requested);
                let drawn: Decimal = plan.iter().map(|a| a.take).sum();
                prop_assert_eq!(drawn, requested);
                for allocation in &plan {
                    let row = rows.iter().find(|c| c.stock.id == allocation.stock_id).unwrap();
                    prop_assert!(allocation.take > Decimal::ZERO);
                    prop_assert!(allocation.take <= row.available_qty());
                }
            }
            Err(ServiceError::InsufficientStock { requested: r, available }) => {
                prop_assert!(total_available < requested);
                prop_assert_eq!(r, requested);
                prop_assert_eq!(available, total_available);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plan_respects_expiry_order(rows in candidates_strategy(), requested in 1u32..500) {
        let requested = Decimal::from(requested);
        if let Ok(plan) = plan_fefo(&rows, requested) {
            // A later-expiry row is only drawn once every earlier-expiry
            // row with availability is fully drained.
            let expiry_of = |stock_id| {
                rows.iter()
                    .find(|c| c.stock.id == stock_id)
                    .map(|c| c.lot.expiry_date)
                    .unwrap()
            };
            for pair in plan.windows(2) {
                prop_assert!(expiry_of(pair[0].stock_id) <= expiry_of(pair[1].stock_id));
            }
            if let Some(last) = plan.last() {
                let last_expiry = expiry_of(last.stock_id);
                for row in &rows {
                    if row.lot.expiry_date < last_expiry && row.available_qty() > Decimal::ZERO {
                        let drawn = plan
                            .iter()
                            .find(|a| a.stock_id == row.stock.id)
                            .map(|a| a.take)
                            .unwrap_or(Decimal::ZERO);
                        prop_assert_eq!(drawn, row.available_qty());
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LedgerOp {
    Receive(u32),
    Issue(u32),
    Adjust(i32),
}

fn ledger_ops_strategy() -> impl Strategy<Value = Vec<(usize, LedgerOp)>> {
    let op = prop_oneof![
        (1u32..60).prop_map(LedgerOp::Receive),
        (1u32..60).prop_map(LedgerOp::Issue),
        (-30i32..30).prop_map(LedgerOp::Adjust),
    ];
    prop::collection::vec((0usize..3, op), 1..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Replaying the movement log reconstructs every row's quantity, no
    /// matter which interleaving of receives, issues and adjustments
    /// produced it (rejected operations must leave no trace).
    #[test]
    fn ledger_replay_matches_rows(ops in ledger_ops_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let store = InMemoryStore::new();
            let material_id = Uuid::new_v4();
            let warehouse_id = Uuid::new_v4();
            let zone_id = Uuid::new_v4();
            let unit_id = Uuid::new_v4();
            let locations = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
            let ctx = MovementContext {
                reference_type: ReferenceType::Adjustment,
                reference_id: None,
                notes: None,
                created_by: Uuid::new_v4(),
            };

            for (slot, op) in ops {
                let key = StockKey {
                    warehouse_id,
                    zone_id,
                    location_id: locations[slot],
                    material_id,
                    lot_id: None,
                    unit_id,
                };
                // Shortfalls and empty rows are expected; the property is
                // that a rejected operation writes no movement.
                let result = match op {
                    LedgerOp::Receive(qty) => {
                        store
                            .receive_stock(&key, None, Decimal::from(qty), &ctx)
                            .await
                            .map(|_| ())
                    }
                    LedgerOp::Issue(qty) => {
                        store
                            .issue_stock(&key, Decimal::from(qty), &ctx)
                            .await
                            .map(|_| ())
                    }
                    LedgerOp::Adjust(delta) => {
                        if delta == 0 {
                            continue;
                        }
                        store
                            .adjust_stock(&key, Decimal::from(delta), &ctx)
                            .await
                            .map(|_| ())
                    }
                };
                match result {
                    Ok(_) => {}
                    Err(ServiceError::InsufficientStock { .. })
                    | Err(ServiceError::InvalidQuantity(_))
                    | Err(ServiceError::NotFound(_)) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }
            }

            let rows = store.get_by_material(material_id).await.unwrap();
            let movements = store
                .get_movements_by_material(material_id, 10_000)
                .await
                .unwrap();
            for row in rows {
                let replayed: Decimal = movements
                    .iter()
                    .map(|m| m.signed_quantity_at(row.location_id))
                    .sum();
                prop_assert_eq!(replayed, row.quantity);
                prop_assert!(row.reserved_qty >= Decimal::ZERO);
                prop_assert!(row.reserved_qty <= row.quantity);
            }
            Ok(())
        })?;
    }
}
