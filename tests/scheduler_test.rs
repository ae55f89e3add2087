mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use wms_stock_api::config::SchedulerConfig;
use wms_stock_api::entities::lot::LotStatus;
use wms_stock_api::events::Event;
use wms_stock_api::scheduler::Scheduler;
use wms_stock_api::services::reservation::ReserveStockInput;
use wms_stock_api::entities::stock_reservation::ReservationType;

use common::{test_app, TestApp};

fn scheduler_for(app: &TestApp) -> Scheduler {
    Scheduler::new(
        app.state.stock_repo.clone(),
        app.state.lot_repo.clone(),
        app.state.reservation_service.clone(),
        app.state.event_sender.clone(),
        SchedulerConfig::default(),
        vec![90, 30, 7],
        dec!(10),
    )
}

#[tokio::test]
async fn expiry_alert_fires_once_per_tier() {
    let mut app = test_app();
    let material_id = Uuid::new_v4();
    let (_, expiring_lot, _) = app.seed_lot(material_id, dec!(25), 5).await;
    app.drain_events();

    let scheduler = scheduler_for(&app);
    let today = app.today();

    scheduler.run_expiry_check(today).await.unwrap();
    let alerts: Vec<Event> = app
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::LotExpiringSoon { .. }))
        .collect();
    assert_eq!(alerts.len(), 1);
    match &alerts[0] {
        Event::LotExpiringSoon {
            lot_id,
            days_until_expiry,
            quantity,
            ..
        } => {
            assert_eq!(*lot_id, expiring_lot.id);
            assert_eq!(*days_until_expiry, 5);
            assert_eq!(*quantity, dec!(25));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // The lot transitions to Expiring and carries the 7-day marker.
    let updated = app
        .state
        .lot_service
        .get_lot(expiring_lot.id)
        .await
        .unwrap();
    assert_eq!(updated.status(), Some(LotStatus::Expiring));
    assert_eq!(updated.last_expiry_alert_days, Some(7));

    // Same day, second sweep: nothing new.
    scheduler.run_expiry_check(today).await.unwrap();
    assert!(app
        .drain_events()
        .iter()
        .all(|e| !matches!(e, Event::LotExpiringSoon { .. })));
}

#[tokio::test]
async fn tighter_tier_alerts_again() {
    let mut app = test_app();
    let material_id = Uuid::new_v4();
    let (_, expiring_lot, _) = app.seed_lot(material_id, dec!(5), 60).await;
    app.drain_events();

    let scheduler = scheduler_for(&app);

    // 60 days out matches the 90-day tier.
    scheduler.run_expiry_check(app.today()).await.unwrap();
    assert_eq!(
        app.drain_events()
            .iter()
            .filter(|e| matches!(e, Event::LotExpiringSoon { .. }))
            .count(),
        1
    );

    // 55 days later the lot is 5 days from expiry: the 7-day tier fires.
    let later = app.today() + Duration::days(55);
    scheduler.run_expiry_check(later).await.unwrap();
    let alerts: Vec<Event> = app
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::LotExpiringSoon { .. }))
        .collect();
    assert_eq!(alerts.len(), 1);

    let updated = app
        .state
        .lot_service
        .get_lot(expiring_lot.id)
        .await
        .unwrap();
    assert_eq!(updated.last_expiry_alert_days, Some(7));
}

#[tokio::test]
async fn expired_lots_are_marked_and_announced_once() {
    let mut app = test_app();
    let material_id = Uuid::new_v4();
    let (_, short_lot, _) = app.seed_lot(material_id, dec!(9), 2).await;
    app.drain_events();

    let scheduler = scheduler_for(&app);
    let after_expiry = app.today() + Duration::days(3);

    scheduler.run_expiry_check(after_expiry).await.unwrap();
    let expired_events = app
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::LotExpired { .. }))
        .count();
    assert_eq!(expired_events, 1);

    let updated = app.state.lot_service.get_lot(short_lot.id).await.unwrap();
    assert_eq!(updated.status(), Some(LotStatus::Expired));

    // Expired lots leave the FEFO pool.
    let candidates = app
        .state
        .stock_service
        .get_available_stock_fefo(material_id)
        .await
        .unwrap();
    assert!(candidates.is_empty());

    // A second sweep finds nothing newly expired.
    scheduler.run_expiry_check(after_expiry).await.unwrap();
    assert!(app
        .drain_events()
        .iter()
        .all(|e| !matches!(e, Event::LotExpired { .. })));
}

#[tokio::test]
async fn low_stock_check_alerts_below_threshold() {
    let mut app = test_app();
    let low_material = Uuid::new_v4();
    let healthy_material = Uuid::new_v4();
    app.seed_lot(low_material, dec!(4), 60).await;
    app.seed_lot(healthy_material, dec!(40), 60).await;
    app.drain_events();

    let scheduler = scheduler_for(&app);
    scheduler.run_low_stock_check().await.unwrap();

    let alerts: Vec<Event> = app
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::LowStockAlert { .. }))
        .collect();
    assert_eq!(alerts.len(), 1);
    match &alerts[0] {
        Event::LowStockAlert {
            material_id,
            current_quantity,
            reorder_point,
        } => {
            assert_eq!(*material_id, low_material);
            assert_eq!(*current_quantity, dec!(4));
            assert_eq!(*reorder_point, dec!(10));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn reservation_cleanup_job_frees_expired_holds() {
    let app = test_app();
    let material_id = Uuid::new_v4();
    app.seed_lot(material_id, dec!(10), 60).await;

    app.state
        .reservation_service
        .reserve_stock(ReserveStockInput {
            material_id,
            quantity: dec!(7),
            unit_id: app.unit_id,
            reservation_type: ReservationType::WorkOrder,
            reference_id: Uuid::new_v4(),
            reference_number: "WO-17".into(),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            created_by: app.user_id,
        })
        .await
        .unwrap();

    let scheduler = scheduler_for(&app);
    let cleaned = scheduler.run_reservation_cleanup().await.unwrap();
    assert_eq!(cleaned, 1);

    let summary = app
        .state
        .stock_service
        .get_material_summary(material_id)
        .await
        .unwrap();
    assert_eq!(summary.total_reserved, dec!(0));
}

#[tokio::test]
async fn scheduler_loops_start_and_shut_down() {
    let app = test_app();
    let scheduler = Arc::new(scheduler_for(&app));
    let handle = scheduler.start();
    handle.shutdown().await;
}
