//! Shared fixtures for the integration tests: an in-memory wiring of the
//! services plus helpers to seed lots and drain published events.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use uuid::Uuid;

use wms_stock_api::entities::{lot, stock, stock_movement};
use wms_stock_api::events::{Event, EventSender};
use wms_stock_api::services::stock::ReceiveStockInput;
use wms_stock_api::AppState;

pub struct TestApp {
    pub state: AppState,
    pub events: mpsc::Receiver<Event>,
    pub warehouse_id: Uuid,
    pub zone_id: Uuid,
    pub location_id: Uuid,
    pub unit_id: Uuid,
    pub user_id: Uuid,
}

pub fn test_app() -> TestApp {
    let (sender, events) = EventSender::channel(256);
    TestApp {
        state: AppState::in_memory(sender),
        events,
        warehouse_id: Uuid::new_v4(),
        zone_id: Uuid::new_v4(),
        location_id: Uuid::new_v4(),
        unit_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
    }
}

impl TestApp {
    pub fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    pub fn days_from_now(&self, days: i64) -> NaiveDate {
        self.today() + Duration::days(days)
    }

    /// Receives `qty` of `material_id` into the default location under a
    /// fresh lot expiring in `expires_in_days`, and passes QC so the lot
    /// is issuable.
    pub async fn seed_lot(
        &self,
        material_id: Uuid,
        qty: Decimal,
        expires_in_days: i64,
    ) -> (stock::Model, lot::Model, stock_movement::Model) {
        self.seed_lot_at(material_id, qty, expires_in_days, self.location_id)
            .await
    }

    pub async fn seed_lot_at(
        &self,
        material_id: Uuid,
        qty: Decimal,
        expires_in_days: i64,
        location_id: Uuid,
    ) -> (stock::Model, lot::Model, stock_movement::Model) {
        let (row, seeded_lot, movement) = self
            .state
            .stock_service
            .receive_stock(ReceiveStockInput {
                warehouse_id: self.warehouse_id,
                zone_id: self.zone_id,
                location_id,
                material_id,
                quantity: qty,
                unit_id: self.unit_id,
                lot_number: None,
                supplier_id: None,
                supplier_lot_number: None,
                manufactured_date: None,
                expiry_date: Some(self.days_from_now(expires_in_days)),
                reference_id: None,
                notes: None,
                created_by: self.user_id,
            })
            .await
            .expect("seed receive");
        let seeded_lot = self
            .state
            .lot_service
            .pass_qc(seeded_lot.id)
            .await
            .expect("seed qc pass");
        (row, seeded_lot, movement)
    }

    /// Non-blocking drain of everything published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
