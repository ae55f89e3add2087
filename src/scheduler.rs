//! Background jobs: the daily expiry sweep, the hourly low-stock check,
//! and reservation TTL cleanup.
//!
//! Job bodies are public methods so tests drive them directly; the
//! interval loops only add timing and shutdown handling around them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::entities::lot::LotStatus;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{LotRepository, StockRepository};
use crate::services::ReservationService;

pub struct Scheduler {
    stock_repo: Arc<dyn StockRepository>,
    lot_repo: Arc<dyn LotRepository>,
    reservation_service: Arc<ReservationService>,
    event_sender: EventSender,
    config: SchedulerConfig,
    /// Alert tiers in days before expiry, e.g. [90, 30, 7].
    expiry_alert_days: Vec<i32>,
    low_stock_threshold: Decimal,
}

/// Running scheduler loops; dropping without `shutdown` aborts nothing,
/// the loops keep running until the watch channel closes.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }
}

impl Scheduler {
    pub fn new(
        stock_repo: Arc<dyn StockRepository>,
        lot_repo: Arc<dyn LotRepository>,
        reservation_service: Arc<ReservationService>,
        event_sender: EventSender,
        config: SchedulerConfig,
        expiry_alert_days: Vec<i32>,
        low_stock_threshold: Decimal,
    ) -> Self {
        let mut expiry_alert_days = expiry_alert_days;
        expiry_alert_days.sort_unstable();
        Self {
            stock_repo,
            lot_repo,
            reservation_service,
            event_sender,
            config,
            expiry_alert_days,
            low_stock_threshold,
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }

    async fn lot_quantity(&self, material_id: uuid::Uuid, lot_id: uuid::Uuid) -> Decimal {
        match self
            .stock_repo
            .get_by_material_and_lot(material_id, lot_id)
            .await
        {
            Ok(rows) => rows.iter().map(|r| r.quantity).sum(),
            Err(e) => {
                warn!(lot_id = %lot_id, error = %e, "Failed to read lot quantity");
                Decimal::ZERO
            }
        }
    }

    /// Daily sweep: marks lots past expiry as Expired (with one LotExpired
    /// event each), then raises threshold alerts for lots approaching
    /// expiry. A lot alerts at most once per tier; the smallest matched
    /// tier is stamped on the lot, so re-running the sweep on the same day
    /// publishes nothing new.
    #[instrument(skip(self))]
    pub async fn run_expiry_check(&self, today: NaiveDate) -> Result<(), ServiceError> {
        let newly_expired = self.lot_repo.get_expired_lots(today).await?;
        if !newly_expired.is_empty() {
            let ids: Vec<_> = newly_expired.iter().map(|l| l.id).collect();
            self.lot_repo.mark_expired(&ids).await?;
            for expired_lot in &newly_expired {
                let quantity = self.lot_quantity(expired_lot.material_id, expired_lot.id).await;
                self.publish(Event::LotExpired {
                    lot_id: expired_lot.id,
                    lot_number: expired_lot.lot_number.clone(),
                    material_id: expired_lot.material_id,
                    expiry_date: expired_lot.expiry_date,
                    days_until_expiry: expired_lot.days_until_expiry(today),
                    quantity,
                })
                .await;
            }
            info!(count = newly_expired.len(), "Lots marked expired");
        }

        let Some(&horizon) = self.expiry_alert_days.last() else {
            return Ok(());
        };
        let expiring = self
            .lot_repo
            .get_expiring_lots(horizon as i64, today)
            .await?;
        for mut expiring_lot in expiring {
            let days = expiring_lot.days_until_expiry(today);
            let Some(&tier) = self
                .expiry_alert_days
                .iter()
                .find(|&&t| days <= t as i64)
            else {
                continue;
            };

            let mut dirty = false;
            if expiring_lot.status() == Some(LotStatus::Active) {
                expiring_lot.status = LotStatus::Expiring.as_str().to_string();
                dirty = true;
            }
            let already_alerted = expiring_lot
                .last_expiry_alert_days
                .map_or(false, |prev| prev <= tier);
            if !already_alerted {
                let quantity = self
                    .lot_quantity(expiring_lot.material_id, expiring_lot.id)
                    .await;
                self.publish(Event::LotExpiringSoon {
                    lot_id: expiring_lot.id,
                    lot_number: expiring_lot.lot_number.clone(),
                    material_id: expiring_lot.material_id,
                    expiry_date: expiring_lot.expiry_date,
                    days_until_expiry: days,
                    quantity,
                })
                .await;
                expiring_lot.last_expiry_alert_days = Some(tier);
                dirty = true;
            }
            if dirty {
                self.lot_repo.update(&expiring_lot).await?;
            }
        }
        Ok(())
    }

    /// Publishes one LowStockAlert per material whose aggregate available
    /// quantity sits below the threshold.
    #[instrument(skip(self))]
    pub async fn run_low_stock_check(&self) -> Result<(), ServiceError> {
        let low = self
            .stock_repo
            .get_low_stock_materials(self.low_stock_threshold)
            .await?;
        for summary in &low {
            self.publish(Event::LowStockAlert {
                material_id: summary.material_id,
                current_quantity: summary.total_available,
                reorder_point: self.low_stock_threshold,
            })
            .await;
        }
        if !low.is_empty() {
            info!(count = low.len(), "Low stock alerts raised");
        }
        Ok(())
    }

    /// Expires Active reservations past their TTL, freeing their holds.
    /// The release semantics live in one place: this only adds the clock.
    #[instrument(skip(self))]
    pub async fn run_reservation_cleanup(&self) -> Result<usize, ServiceError> {
        self.reservation_service
            .cleanup_expired_reservations(Utc::now())
            .await
    }

    /// Spawns the three interval loops. Ticks fire immediately on start,
    /// then at the configured intervals.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (tx, _) = watch::channel(false);
        let mut handles = Vec::new();

        {
            let scheduler = Arc::clone(&self);
            let mut rx = tx.subscribe();
            let interval = Duration::from_secs(self.config.expiry_check_interval_secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = scheduler.run_expiry_check(Utc::now().date_naive()).await {
                                error!(error = %e, "Expiry check failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            }));
        }

        {
            let scheduler = Arc::clone(&self);
            let mut rx = tx.subscribe();
            let interval = Duration::from_secs(self.config.low_stock_interval_secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = scheduler.run_low_stock_check().await {
                                error!(error = %e, "Low stock check failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            }));
        }

        {
            let scheduler = Arc::clone(&self);
            let mut rx = tx.subscribe();
            let interval = Duration::from_secs(self.config.reservation_cleanup_interval_secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = scheduler.run_reservation_cleanup().await {
                                error!(error = %e, "Reservation cleanup failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            }));
        }

        info!("Scheduler started");
        SchedulerHandle {
            shutdown: tx,
            handles,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("expiry_alert_days", &self.expiry_alert_days)
            .field("low_stock_threshold", &self.low_stock_threshold)
            .finish_non_exhaustive()
    }
}
