mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use wms_stock_api::entities::stock_reservation::{ReservationStatus, ReservationType};
use wms_stock_api::errors::ServiceError;
use wms_stock_api::events::Event;
use wms_stock_api::services::reservation::ReserveStockInput;

use common::test_app;

fn reserve_input(app: &common::TestApp, material_id: Uuid, qty: rust_decimal::Decimal) -> ReserveStockInput {
    ReserveStockInput {
        material_id,
        quantity: qty,
        unit_id: app.unit_id,
        reservation_type: ReservationType::SalesOrder,
        reference_id: Uuid::new_v4(),
        reference_number: "SO-2001".into(),
        expires_at: None,
        created_by: app.user_id,
    }
}

#[tokio::test]
async fn reservation_fails_when_available_is_short() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    app.seed_lot(material_id, dec!(10), 30).await;

    app.state
        .reservation_service
        .reserve_stock(reserve_input(&app, material_id, dec!(8)))
        .await
        .unwrap();

    let err = app
        .state
        .reservation_service
        .reserve_stock(reserve_input(&app, material_id, dec!(3)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { requested, available } => {
        assert_eq!(requested, dec!(3));
        assert_eq!(available, dec!(2));
    });
}

#[tokio::test]
async fn release_is_idempotent() {
    let mut app = test_app();
    let material_id = Uuid::new_v4();
    app.seed_lot(material_id, dec!(10), 30).await;

    let reservation = app
        .state
        .reservation_service
        .reserve_stock(reserve_input(&app, material_id, dec!(6)))
        .await
        .unwrap();

    let released = app
        .state
        .reservation_service
        .release_reservation(reservation.id)
        .await
        .unwrap();
    assert_eq!(released.status(), Some(ReservationStatus::Released));

    // Second release is a no-op and must not free the hold twice.
    let released_again = app
        .state
        .reservation_service
        .release_reservation(reservation.id)
        .await
        .unwrap();
    assert_eq!(released_again.status(), Some(ReservationStatus::Released));

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_reserved, dec!(0));
    assert_eq!(summary.total_available, dec!(10));

    let release_events = app
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::ReservationReleased { .. }))
        .count();
    assert_eq!(release_events, 1);
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    app.seed_lot(material_id, dec!(10), 30).await;

    // 20 concurrent reservations of 1 unit each: exactly 10 can win.
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let service = app.state.reservation_service.clone();
        let input = reserve_input(&app, material_id, dec!(1));
        tasks.push(tokio::spawn(async move {
            service.reserve_stock(input).await.is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 10);

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_reserved, dec!(10));
    assert_eq!(summary.total_available, dec!(0));
}

#[tokio::test]
async fn expired_reservations_are_reclaimed() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    app.seed_lot(material_id, dec!(10), 30).await;

    let mut input = reserve_input(&app, material_id, dec!(4));
    input.expires_at = Some(Utc::now() - Duration::minutes(1));
    let reservation = app
        .state
        .reservation_service
        .reserve_stock(input)
        .await
        .unwrap();

    let count = app
        .state
        .reservation_service
        .cleanup_expired_reservations(Utc::now())
        .await
        .unwrap();
    assert_eq!(count, 1);

    let reservation = app
        .state
        .reservation_service
        .get_reservation(reservation.id)
        .await
        .unwrap();
    assert_eq!(reservation.status(), Some(ReservationStatus::Expired));

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_reserved, dec!(0));

    // Re-running finds nothing to do.
    let count = app
        .state
        .reservation_service
        .cleanup_expired_reservations(Utc::now())
        .await
        .unwrap();
    assert_eq!(count, 0);
}
