//! Inventory counts: snapshot, record, and reconcile physical counts
//! against the ledger. Completing a count with `apply_variances` posts one
//! Adjustment movement per variance line, so the audit log explains every
//! correction.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_count::{self, CountStatus, CountType};
use crate::entities::inventory_count_line_item;
use crate::entities::stock_movement::ReferenceType;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{
    CountFilter, InventoryCountRepository, MovementContext, StockFilter, StockKey,
    StockRepository,
};

const COUNT_ADJUSTMENT_NOTE: &str = "Inventory Count Adjustment";

#[derive(Debug, Clone)]
pub struct CreateCountInput {
    pub warehouse_id: Uuid,
    pub zone_id: Option<Uuid>,
    pub count_type: CountType,
    pub created_by: Uuid,
}

pub struct InventoryCountService {
    count_repo: Arc<dyn InventoryCountRepository>,
    stock_repo: Arc<dyn StockRepository>,
    event_sender: EventSender,
}

impl InventoryCountService {
    pub fn new(
        count_repo: Arc<dyn InventoryCountRepository>,
        stock_repo: Arc<dyn StockRepository>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            count_repo,
            stock_repo,
            event_sender,
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }

    async fn get_count(&self, count_id: Uuid) -> Result<inventory_count::Model, ServiceError> {
        self.count_repo
            .get_by_id(count_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("inventory count {}", count_id)))
    }

    /// Creates a Draft count with a frozen snapshot of the in-scope stock
    /// rows. Zero-quantity rows are included so surplus found at an
    /// "empty" slot still has a line to record against.
    #[instrument(skip(self, input), fields(warehouse_id = %input.warehouse_id))]
    pub async fn create_count(
        &self,
        input: CreateCountInput,
    ) -> Result<inventory_count::Model, ServiceError> {
        let now = Utc::now();
        let today = now.date_naive();
        let count_number = self.count_repo.next_count_number(today).await?;
        let count_id = Uuid::new_v4();

        let mut lines = Vec::new();
        let mut page = 1;
        loop {
            let filter = StockFilter {
                warehouse_id: Some(input.warehouse_id),
                zone_id: input.zone_id,
                page,
                limit: 500,
                ..Default::default()
            };
            let (rows, total) = self.stock_repo.list(&filter).await?;
            for row in &rows {
                lines.push(inventory_count_line_item::Model {
                    id: Uuid::new_v4(),
                    inventory_count_id: count_id,
                    location_id: row.location_id,
                    material_id: row.material_id,
                    lot_id: row.lot_id,
                    unit_id: row.unit_id,
                    system_qty: row.quantity,
                    counted_qty: None,
                    variance: Decimal::ZERO,
                    is_counted: false,
                    counted_by: None,
                    counted_at: None,
                    notes: None,
                    created_at: now,
                });
            }
            if lines.len() as u64 >= total || rows.is_empty() {
                break;
            }
            page += 1;
        }

        let count = inventory_count::Model {
            id: count_id,
            count_number,
            count_date: today,
            count_type: input.count_type.as_str().to_string(),
            warehouse_id: input.warehouse_id,
            zone_id: input.zone_id,
            status: CountStatus::Draft.as_str().to_string(),
            notes: None,
            started_at: None,
            completed_at: None,
            created_by: input.created_by,
            approved_by: None,
            created_at: now,
            updated_at: now,
        };
        self.count_repo.create(&count, &lines).await?;
        info!(count_number = %count.count_number, lines = lines.len(), "Inventory count created");
        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn start_count(
        &self,
        count_id: Uuid,
    ) -> Result<inventory_count::Model, ServiceError> {
        let mut count = self.get_count(count_id).await?;
        if !count.can_start() {
            return Err(ServiceError::InvalidStatus(format!(
                "count {} cannot be started from status {}",
                count.count_number, count.status
            )));
        }
        count.status = CountStatus::InProgress.as_str().to_string();
        count.started_at = Some(Utc::now());
        self.count_repo.update(&count).await
    }

    /// Records a physical count for one line; the variance is derived from
    /// the frozen system snapshot, not the live ledger.
    #[instrument(skip(self))]
    pub async fn record_count(
        &self,
        line_item_id: Uuid,
        counted_qty: Decimal,
        counted_by: Uuid,
    ) -> Result<inventory_count_line_item::Model, ServiceError> {
        if counted_qty < Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "counted quantity cannot be negative, got {}",
                counted_qty
            )));
        }
        let mut line = self
            .count_repo
            .get_line_item(line_item_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("count line item {}", line_item_id))
            })?;
        let count = self.get_count(line.inventory_count_id).await?;
        if !count.can_record() {
            return Err(ServiceError::InvalidStatus(format!(
                "count {} is not in progress",
                count.count_number
            )));
        }
        line.record_count(counted_qty, counted_by, Utc::now());
        self.count_repo.update_line_item(&line).await
    }

    /// Completes the count. Every line must be counted first. With
    /// `apply_variances`, each non-zero variance is posted as an
    /// Adjustment movement referencing the count.
    #[instrument(skip(self))]
    pub async fn complete_count(
        &self,
        count_id: Uuid,
        approved_by: Uuid,
        apply_variances: bool,
    ) -> Result<inventory_count::Model, ServiceError> {
        let mut count = self.get_count(count_id).await?;
        if !count.can_complete() {
            return Err(ServiceError::InvalidStatus(format!(
                "count {} cannot be completed from status {}",
                count.count_number, count.status
            )));
        }
        let pending = self.count_repo.get_pending_items(count_id).await?;
        if !pending.is_empty() {
            return Err(ServiceError::PendingItems(format!(
                "count {} has {} uncounted items",
                count.count_number,
                pending.len()
            )));
        }

        if apply_variances {
            let variances = self.count_repo.get_variance_items(count_id).await?;
            for line in &variances {
                let row = self
                    .stock_repo
                    .get_by_location_material_lot(line.location_id, line.material_id, line.lot_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "stock for material {} at location {}",
                            line.material_id, line.location_id
                        ))
                    })?;
                let key = StockKey {
                    warehouse_id: row.warehouse_id,
                    zone_id: row.zone_id,
                    location_id: line.location_id,
                    material_id: line.material_id,
                    lot_id: line.lot_id,
                    unit_id: line.unit_id,
                };
                let ctx = MovementContext {
                    reference_type: ReferenceType::Count,
                    reference_id: Some(count_id),
                    notes: Some(COUNT_ADJUSTMENT_NOTE.to_string()),
                    created_by: approved_by,
                };
                let (updated, movement) =
                    self.stock_repo.adjust_stock(&key, line.variance, &ctx).await?;
                self.publish(Event::StockAdjusted {
                    material_id: line.material_id,
                    lot_id: line.lot_id,
                    location_id: line.location_id,
                    delta: line.variance,
                    new_quantity: updated.quantity,
                    reason: COUNT_ADJUSTMENT_NOTE.to_string(),
                    movement_number: movement.movement_number.clone(),
                })
                .await;
            }
            info!(
                count_number = %count.count_number,
                variances = variances.len(),
                "Count variances applied"
            );
        }

        count.status = CountStatus::Completed.as_str().to_string();
        count.completed_at = Some(Utc::now());
        count.approved_by = Some(approved_by);
        let completed = self.count_repo.update(&count).await?;
        info!(count_number = %completed.count_number, "Inventory count completed");
        Ok(completed)
    }

    #[instrument(skip(self))]
    pub async fn cancel_count(
        &self,
        count_id: Uuid,
    ) -> Result<inventory_count::Model, ServiceError> {
        let mut count = self.get_count(count_id).await?;
        if !count.can_cancel() {
            return Err(ServiceError::InvalidStatus(format!(
                "count {} cannot be cancelled from status {}",
                count.count_number, count.status
            )));
        }
        count.status = CountStatus::Cancelled.as_str().to_string();
        self.count_repo.update(&count).await
    }

    pub async fn get(&self, count_id: Uuid) -> Result<inventory_count::Model, ServiceError> {
        self.get_count(count_id).await
    }

    pub async fn list(
        &self,
        filter: &CountFilter,
    ) -> Result<(Vec<inventory_count::Model>, u64), ServiceError> {
        self.count_repo.list(filter).await
    }

    pub async fn get_line_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError> {
        self.count_repo.get_line_items(count_id).await
    }

    pub async fn get_variance_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError> {
        self.count_repo.get_variance_items(count_id).await
    }
}

impl std::fmt::Debug for InventoryCountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryCountService").finish_non_exhaustive()
    }
}
