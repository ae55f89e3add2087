#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(missing_debug_implementations)]

//! Warehouse stock ledger with FEFO lot allocation.
//!
//! The crate keeps per-location, per-lot stock quantities, an append-only
//! movement log, material-level reservations, and inventory counts.
//! Issues draw lots First-Expired-First-Out; expiry and low-stock sweeps
//! run as background jobs and everything the ledger does is announced on
//! an event channel after commit.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod fefo;
pub mod migrator;
pub mod repositories;
pub mod scheduler;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::events::EventSender;
use crate::repositories::{
    InMemoryStore, InventoryCountRepository, LotRepository, SeaOrmInventoryCountRepository,
    SeaOrmLotRepository, SeaOrmStockRepository, StockRepository,
};
use crate::services::{InventoryCountService, LotService, ReservationService, StockService};

/// Wired application services sharing one storage backend and one event
/// channel.
pub struct AppState {
    pub stock_repo: Arc<dyn StockRepository>,
    pub lot_repo: Arc<dyn LotRepository>,
    pub count_repo: Arc<dyn InventoryCountRepository>,
    pub stock_service: Arc<StockService>,
    pub lot_service: Arc<LotService>,
    pub reservation_service: Arc<ReservationService>,
    pub count_service: Arc<InventoryCountService>,
    pub event_sender: EventSender,
}

impl AppState {
    fn wire(
        stock_repo: Arc<dyn StockRepository>,
        lot_repo: Arc<dyn LotRepository>,
        count_repo: Arc<dyn InventoryCountRepository>,
        event_sender: EventSender,
    ) -> Self {
        let stock_service = Arc::new(StockService::new(
            Arc::clone(&stock_repo),
            Arc::clone(&lot_repo),
            event_sender.clone(),
        ));
        let lot_service = Arc::new(LotService::new(
            Arc::clone(&lot_repo),
            Arc::clone(&stock_repo),
        ));
        let reservation_service = Arc::new(ReservationService::new(
            Arc::clone(&stock_repo),
            event_sender.clone(),
        ));
        let count_service = Arc::new(InventoryCountService::new(
            Arc::clone(&count_repo),
            Arc::clone(&stock_repo),
            event_sender.clone(),
        ));
        Self {
            stock_repo,
            lot_repo,
            count_repo,
            stock_service,
            lot_service,
            reservation_service,
            count_service,
            event_sender,
        }
    }

    /// Production wiring over a live database connection.
    pub fn new(db: DatabaseConnection, event_sender: EventSender) -> Self {
        Self::wire(
            Arc::new(SeaOrmStockRepository::new(db.clone())),
            Arc::new(SeaOrmLotRepository::new(db.clone())),
            Arc::new(SeaOrmInventoryCountRepository::new(db)),
            event_sender,
        )
    }

    /// Database-free wiring over the in-memory backend; used by tests and
    /// embedders.
    pub fn in_memory(event_sender: EventSender) -> Self {
        let store = InMemoryStore::new();
        Self::wire(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
            event_sender,
        )
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
