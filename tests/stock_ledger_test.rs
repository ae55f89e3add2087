mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use wms_stock_api::entities::stock_movement::ReferenceType;
use wms_stock_api::errors::ServiceError;
use wms_stock_api::events::Event;
use wms_stock_api::repositories::StockRepository;
use wms_stock_api::services::reservation::ReserveStockInput;
use wms_stock_api::services::stock::{AdjustStockInput, IssueStockInput, TransferStockInput};
use wms_stock_api::entities::stock_reservation::ReservationType;

use common::test_app;

#[tokio::test]
async fn fefo_issue_drains_earliest_expiry_first() {
    let mut app = test_app();
    let material_id = Uuid::new_v4();
    let (_, early_lot, _) = app.seed_lot(material_id, dec!(10), 30).await;
    let (_, late_lot, _) = app.seed_lot(material_id, dec!(20), 90).await;

    let issue = app
        .state
        .stock_service
        .issue_stock_fefo(IssueStockInput {
            material_id,
            quantity: dec!(15),
            unit_id: app.unit_id,
            reference_type: ReferenceType::GoodsIssue,
            reference_id: None,
            reservation_id: None,
            notes: None,
            created_by: app.user_id,
        })
        .await
        .unwrap();

    assert_eq!(issue.lots_issued.len(), 2);
    assert_eq!(issue.lots_issued[0].lot_id, early_lot.id);
    assert_eq!(issue.lots_issued[0].quantity, dec!(10));
    assert_eq!(issue.lots_issued[1].lot_id, late_lot.id);
    assert_eq!(issue.lots_issued[1].quantity, dec!(5));

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_quantity, dec!(15));

    let issued_event = app
        .drain_events()
        .into_iter()
        .find(|e| matches!(e, Event::StockIssued { .. }))
        .expect("StockIssued published");
    assert_matches!(issued_event, Event::StockIssued { lots_used, .. } => {
        assert_eq!(lots_used.len(), 2);
        assert_eq!(lots_used[0].lot_number, early_lot.lot_number);
    });
}

#[tokio::test]
async fn fefo_issue_is_all_or_nothing() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    app.seed_lot(material_id, dec!(10), 30).await;

    let err = app
        .state
        .stock_service
        .issue_stock_fefo(IssueStockInput {
            material_id,
            quantity: dec!(11),
            unit_id: app.unit_id,
            reference_type: ReferenceType::GoodsIssue,
            reference_id: None,
            reservation_id: None,
            notes: None,
            created_by: app.user_id,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { requested, available } => {
        assert_eq!(requested, dec!(11));
        assert_eq!(available, dec!(10));
    });

    // Nothing was drawn.
    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_quantity, dec!(10));
}

#[tokio::test]
async fn fefo_skips_qc_pending_and_failed_lots() {
    let app = test_app();
    let material_id = Uuid::new_v4();

    // Issuable lot, latest expiry of the three.
    let (_, good_lot, _) = app.seed_lot(material_id, dec!(5), 60).await;

    let receive = |expiry_days: i64| wms_stock_api::services::stock::ReceiveStockInput {
        warehouse_id: app.warehouse_id,
        zone_id: app.zone_id,
        location_id: app.location_id,
        material_id,
        quantity: dec!(50),
        unit_id: app.unit_id,
        lot_number: None,
        supplier_id: None,
        supplier_lot_number: None,
        manufactured_date: None,
        expiry_date: Some(app.days_from_now(expiry_days)),
        reference_id: None,
        notes: None,
        created_by: app.user_id,
    };

    // QC-pending lot: received but never inspected.
    app.state
        .stock_service
        .receive_stock(receive(10))
        .await
        .unwrap();

    // QC-failed lot: stays on hand but must never be picked.
    let (_, rejected_lot, _) = app
        .state
        .stock_service
        .receive_stock(receive(20))
        .await
        .unwrap();
    app.state.lot_service.fail_qc(rejected_lot.id).await.unwrap();

    let candidates = app
        .state
        .stock_service
        .get_available_stock_fefo(material_id)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].lot.id, good_lot.id);
}

#[tokio::test]
async fn receive_reserve_issue_scenario_keeps_ledger_consistent() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    app.seed_lot(material_id, dec!(100), 60).await;

    let reservation = app
        .state
        .reservation_service
        .reserve_stock(ReserveStockInput {
            material_id,
            quantity: dec!(30),
            unit_id: app.unit_id,
            reservation_type: ReservationType::SalesOrder,
            reference_id: Uuid::new_v4(),
            reference_number: "SO-1001".into(),
            expires_at: None,
            created_by: app.user_id,
        })
        .await
        .unwrap();

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_quantity, dec!(100));
    assert_eq!(summary.total_reserved, dec!(30));
    assert_eq!(summary.total_available, dec!(70));

    // Issue 20 against the reservation: quantity drops to 80 and the
    // remaining hold is 10.
    app.state
        .stock_service
        .issue_stock_fefo(IssueStockInput {
            material_id,
            quantity: dec!(20),
            unit_id: app.unit_id,
            reference_type: ReferenceType::GoodsIssue,
            reference_id: None,
            reservation_id: Some(reservation.id),
            notes: None,
            created_by: app.user_id,
        })
        .await
        .unwrap();

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_quantity, dec!(80));
    assert_eq!(summary.total_reserved, dec!(10));
    assert_eq!(summary.total_available, dec!(70));

    let reservation = app
        .state
        .reservation_service
        .get_reservation(reservation.id)
        .await
        .unwrap();
    assert_eq!(reservation.quantity, dec!(10));
    assert!(reservation.is_active());
}

#[tokio::test]
async fn failed_reservation_issue_leaves_hold_intact() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    app.seed_lot(material_id, dec!(100), 60).await;

    let reservation = app
        .state
        .reservation_service
        .reserve_stock(ReserveStockInput {
            material_id,
            quantity: dec!(30),
            unit_id: app.unit_id,
            reservation_type: ReservationType::SalesOrder,
            reference_id: Uuid::new_v4(),
            reference_number: "SO-3001".into(),
            expires_at: None,
            created_by: app.user_id,
        })
        .await
        .unwrap();

    // Drain the unreserved quantity so the next issue can only succeed by
    // eating into the hold.
    app.state
        .stock_service
        .issue_stock_fefo(IssueStockInput {
            material_id,
            quantity: dec!(70),
            unit_id: app.unit_id,
            reference_type: ReferenceType::GoodsIssue,
            reference_id: None,
            reservation_id: None,
            notes: None,
            created_by: app.user_id,
        })
        .await
        .unwrap();

    // 40 against a 30-unit hold over 30 on hand: the plan falls short and
    // the consumed hold must be restored, not leaked.
    let err = app
        .state
        .stock_service
        .issue_stock_fefo(IssueStockInput {
            material_id,
            quantity: dec!(40),
            unit_id: app.unit_id,
            reference_type: ReferenceType::GoodsIssue,
            reference_id: None,
            reservation_id: Some(reservation.id),
            notes: None,
            created_by: app.user_id,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { .. });

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_quantity, dec!(30));
    assert_eq!(summary.total_reserved, dec!(30));
    assert_eq!(summary.total_available, dec!(0));

    let reservation = app
        .state
        .reservation_service
        .get_reservation(reservation.id)
        .await
        .unwrap();
    assert!(reservation.is_active());
    assert_eq!(reservation.quantity, dec!(30));
}

#[tokio::test]
async fn movement_log_reconstructs_stock_quantity() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    let other_location = Uuid::new_v4();
    let (_, seeded_lot, _) = app.seed_lot(material_id, dec!(40), 45).await;

    app.state
        .stock_service
        .transfer_stock(TransferStockInput {
            from_location_id: app.location_id,
            to_location_id: other_location,
            material_id,
            lot_id: Some(seeded_lot.id),
            quantity: dec!(15),
            unit_id: app.unit_id,
            reference_id: None,
            notes: None,
            created_by: app.user_id,
        })
        .await
        .unwrap();

    app.state
        .stock_service
        .adjust_stock(AdjustStockInput {
            warehouse_id: app.warehouse_id,
            zone_id: app.zone_id,
            location_id: app.location_id,
            material_id,
            lot_id: Some(seeded_lot.id),
            delta: dec!(-3),
            unit_id: app.unit_id,
            reason: "damaged in handling".into(),
            reference_id: None,
            created_by: app.user_id,
        })
        .await
        .unwrap();

    let movements = app
        .state
        .stock_service
        .get_lot_traceability(seeded_lot.id)
        .await
        .unwrap();
    let rows = app.state.stock_repo.get_by_material(material_id).await.unwrap();

    for row in rows {
        let replayed: Decimal = movements
            .iter()
            .map(|m| m.signed_quantity_at(row.location_id))
            .sum();
        assert_eq!(replayed, row.quantity, "location {}", row.location_id);
    }
}

#[tokio::test]
async fn transfer_is_atomic_and_preserves_totals() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    let other_location = Uuid::new_v4();
    let (_, seeded_lot, _) = app.seed_lot(material_id, dec!(30), 45).await;

    let (from_row, to_row, movement) = app
        .state
        .stock_service
        .transfer_stock(TransferStockInput {
            from_location_id: app.location_id,
            to_location_id: other_location,
            material_id,
            lot_id: Some(seeded_lot.id),
            quantity: dec!(12),
            unit_id: app.unit_id,
            reference_id: None,
            notes: None,
            created_by: app.user_id,
        })
        .await
        .unwrap();

    assert_eq!(from_row.quantity, dec!(18));
    assert_eq!(to_row.quantity, dec!(12));
    assert!(movement.movement_number.starts_with("MOV-TRF-"));

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_quantity, dec!(30));

    // More than available fails without touching either side.
    let err = app
        .state
        .stock_service
        .transfer_stock(TransferStockInput {
            from_location_id: app.location_id,
            to_location_id: other_location,
            material_id,
            lot_id: Some(seeded_lot.id),
            quantity: dec!(100),
            unit_id: app.unit_id,
            reference_id: None,
            notes: None,
            created_by: app.user_id,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { .. });
}

#[tokio::test]
async fn adjustment_never_drives_quantity_negative() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    let (_, seeded_lot, _) = app.seed_lot(material_id, dec!(5), 45).await;

    let err = app
        .state
        .stock_service
        .adjust_stock(AdjustStockInput {
            warehouse_id: app.warehouse_id,
            zone_id: app.zone_id,
            location_id: app.location_id,
            material_id,
            lot_id: Some(seeded_lot.id),
            delta: dec!(-6),
            unit_id: app.unit_id,
            reason: "count correction".into(),
            reference_id: None,
            created_by: app.user_id,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity(_));

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_quantity, dec!(5));
}

#[tokio::test]
async fn movement_numbers_are_sequential_per_type_and_year() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    let (_, _, first) = app.seed_lot(material_id, dec!(1), 45).await;
    let (_, _, second) = app.seed_lot(material_id, dec!(1), 60).await;

    let seq = |number: &str| -> i64 { number.rsplit('-').next().unwrap().parse().unwrap() };
    assert!(first.movement_number.starts_with("MOV-IN-"));
    assert_eq!(
        seq(&second.movement_number),
        seq(&first.movement_number) + 1
    );
}
