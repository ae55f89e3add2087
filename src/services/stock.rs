//! Stock movements: receive, FEFO issue, transfer, adjust, and the read
//! paths over stock levels and the movement log.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::stock_movement::ReferenceType;
use crate::entities::{lot, stock, stock_movement};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender, LotUsedInIssue};
use crate::repositories::{
    AvailableStock, FefoIssue, LotRepository, MaterialSummary, MovementContext, NewLot,
    StockFilter, StockKey, StockRepository,
};

/// Goods receipt against a location. `lot_number` binds to an existing lot
/// when the supplier labelled the goods; otherwise a lot is created with a
/// generated number, which requires `expiry_date`.
#[derive(Debug, Clone, Validate)]
pub struct ReceiveStockInput {
    pub warehouse_id: Uuid,
    pub zone_id: Uuid,
    pub location_id: Uuid,
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub unit_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub lot_number: Option<String>,
    pub supplier_id: Option<Uuid>,
    pub supplier_lot_number: Option<String>,
    pub manufactured_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub reference_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Validate)]
pub struct IssueStockInput {
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub unit_id: Uuid,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    /// Active reservation whose hold this issue consumes.
    pub reservation_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct TransferStockInput {
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub material_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_id: Uuid,
    pub reference_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Validate)]
pub struct AdjustStockInput {
    pub warehouse_id: Uuid,
    pub zone_id: Uuid,
    pub location_id: Uuid,
    pub material_id: Uuid,
    pub lot_id: Option<Uuid>,
    /// Signed delta; positive adds, negative removes.
    pub delta: Decimal,
    pub unit_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    pub reference_id: Option<Uuid>,
    pub created_by: Uuid,
}

pub struct StockService {
    stock_repo: Arc<dyn StockRepository>,
    lot_repo: Arc<dyn LotRepository>,
    event_sender: EventSender,
}

impl StockService {
    pub fn new(
        stock_repo: Arc<dyn StockRepository>,
        lot_repo: Arc<dyn LotRepository>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            stock_repo,
            lot_repo,
            event_sender,
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }

    /// Binds the receipt to an existing lot when `lot_number` names one.
    async fn find_existing_lot(
        &self,
        input: &ReceiveStockInput,
    ) -> Result<Option<lot::Model>, ServiceError> {
        let Some(number) = &input.lot_number else {
            return Ok(None);
        };
        let Some(existing) = self.lot_repo.get_by_lot_number(number).await? else {
            return Ok(None);
        };
        if existing.material_id != input.material_id {
            return Err(ServiceError::ValidationError(format!(
                "lot {} belongs to a different material",
                number
            )));
        }
        Ok(Some(existing))
    }

    /// Spec for a fresh lot to create atomically with the receive. A
    /// supplier-labelled lot keeps the supplied number; otherwise one is
    /// generated.
    async fn new_lot_spec(&self, input: &ReceiveStockInput) -> Result<NewLot, ServiceError> {
        let expiry_date = input.expiry_date.ok_or_else(|| {
            ServiceError::ValidationError(
                "expiry_date is required when creating a new lot".to_string(),
            )
        })?;
        let today = Utc::now().date_naive();
        let lot_number = match &input.lot_number {
            Some(number) => number.clone(),
            None => self.lot_repo.next_lot_number(today).await?,
        };
        Ok(NewLot {
            lot_number,
            material_id: input.material_id,
            supplier_id: input.supplier_id,
            supplier_lot_number: input.supplier_lot_number.clone(),
            manufactured_date: input.manufactured_date,
            expiry_date,
            received_date: today,
            notes: None,
        })
    }

    #[instrument(skip(self, input), fields(material_id = %input.material_id, quantity = %input.quantity))]
    pub async fn receive_stock(
        &self,
        input: ReceiveStockInput,
    ) -> Result<(stock::Model, lot::Model, stock_movement::Model), ServiceError> {
        input.validate()?;
        if input.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "receive quantity must be positive, got {}",
                input.quantity
            )));
        }

        // An existing lot binds by id; a fresh one is created by the
        // repository inside the receive transaction, so a failed receive
        // cannot strand an empty lot.
        let existing = self.find_existing_lot(&input).await?;
        let new_lot = match &existing {
            Some(_) => None,
            None => Some(self.new_lot_spec(&input).await?),
        };
        let key = StockKey {
            warehouse_id: input.warehouse_id,
            zone_id: input.zone_id,
            location_id: input.location_id,
            material_id: input.material_id,
            lot_id: existing.as_ref().map(|l| l.id),
            unit_id: input.unit_id,
        };
        let ctx = MovementContext {
            reference_type: ReferenceType::Grn,
            reference_id: input.reference_id,
            notes: input.notes.clone(),
            created_by: input.created_by,
        };
        let (row, created, movement) = self
            .stock_repo
            .receive_stock(&key, new_lot.as_ref(), input.quantity, &ctx)
            .await?;
        let receipt_lot = created.or(existing).ok_or_else(|| {
            ServiceError::InternalError("receive returned no lot for the receipt".into())
        })?;

        info!(
            movement_number = %movement.movement_number,
            lot_number = %receipt_lot.lot_number,
            "Stock received"
        );
        self.publish(Event::StockReceived {
            material_id: input.material_id,
            lot_id: Some(receipt_lot.id),
            quantity: input.quantity,
            location_id: input.location_id,
            warehouse_id: input.warehouse_id,
            movement_number: movement.movement_number.clone(),
        })
        .await;
        Ok((row, receipt_lot, movement))
    }

    /// Issues `quantity` of a material drawing lots earliest-expiry-first.
    /// All-or-nothing; the shortfall is reported without touching stock.
    #[instrument(skip(self, input), fields(material_id = %input.material_id, quantity = %input.quantity))]
    pub async fn issue_stock_fefo(
        &self,
        input: IssueStockInput,
    ) -> Result<FefoIssue, ServiceError> {
        input.validate()?;
        let today = Utc::now().date_naive();
        let ctx = MovementContext {
            reference_type: input.reference_type,
            reference_id: input.reference_id,
            notes: input.notes.clone(),
            created_by: input.created_by,
        };
        let issue = self
            .stock_repo
            .issue_stock_fefo(
                input.material_id,
                input.quantity,
                input.unit_id,
                today,
                input.reservation_id,
                &ctx,
            )
            .await?;

        info!(
            lots = issue.lots_issued.len(),
            movement_number = issue
                .movements
                .first()
                .map(|m| m.movement_number.as_str())
                .unwrap_or(""),
            "Stock issued FEFO"
        );
        self.publish(Event::StockIssued {
            material_id: input.material_id,
            quantity: input.quantity,
            lots_used: issue
                .lots_issued
                .iter()
                .map(|l| LotUsedInIssue {
                    lot_id: l.lot_id,
                    lot_number: l.lot_number.clone(),
                    quantity: l.quantity,
                    expiry_date: l.expiry_date,
                    location_id: l.location_id,
                })
                .collect(),
            reference_type: input.reference_type.as_str().to_string(),
            reference_id: input.reference_id,
            movement_number: issue
                .movements
                .first()
                .map(|m| m.movement_number.clone())
                .unwrap_or_default(),
        })
        .await;
        Ok(issue)
    }

    #[instrument(skip(self, input), fields(material_id = %input.material_id, quantity = %input.quantity))]
    pub async fn transfer_stock(
        &self,
        input: TransferStockInput,
    ) -> Result<(stock::Model, stock::Model, stock_movement::Model), ServiceError> {
        let source = self
            .stock_repo
            .get_by_location_material_lot(input.from_location_id, input.material_id, input.lot_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "stock for material {} at location {}",
                    input.material_id, input.from_location_id
                ))
            })?;
        let key = StockKey {
            warehouse_id: source.warehouse_id,
            zone_id: source.zone_id,
            location_id: input.from_location_id,
            material_id: input.material_id,
            lot_id: input.lot_id,
            unit_id: input.unit_id,
        };
        let ctx = MovementContext {
            reference_type: ReferenceType::Transfer,
            reference_id: input.reference_id,
            notes: input.notes.clone(),
            created_by: input.created_by,
        };
        let (from_row, to_row, movement) = self
            .stock_repo
            .transfer_stock(&key, input.to_location_id, input.quantity, &ctx)
            .await?;

        info!(movement_number = %movement.movement_number, "Stock transferred");
        self.publish(Event::StockTransferred {
            material_id: input.material_id,
            lot_id: input.lot_id,
            quantity: input.quantity,
            from_location_id: input.from_location_id,
            to_location_id: input.to_location_id,
            movement_number: movement.movement_number.clone(),
        })
        .await;
        Ok((from_row, to_row, movement))
    }

    #[instrument(skip(self, input), fields(material_id = %input.material_id, delta = %input.delta))]
    pub async fn adjust_stock(
        &self,
        input: AdjustStockInput,
    ) -> Result<(stock::Model, stock_movement::Model), ServiceError> {
        input.validate()?;
        let key = StockKey {
            warehouse_id: input.warehouse_id,
            zone_id: input.zone_id,
            location_id: input.location_id,
            material_id: input.material_id,
            lot_id: input.lot_id,
            unit_id: input.unit_id,
        };
        let ctx = MovementContext {
            reference_type: ReferenceType::Adjustment,
            reference_id: input.reference_id,
            notes: Some(input.reason.clone()),
            created_by: input.created_by,
        };
        let (row, movement) = self.stock_repo.adjust_stock(&key, input.delta, &ctx).await?;

        info!(movement_number = %movement.movement_number, "Stock adjusted");
        self.publish(Event::StockAdjusted {
            material_id: input.material_id,
            lot_id: input.lot_id,
            location_id: input.location_id,
            delta: input.delta,
            new_quantity: row.quantity,
            reason: input.reason.clone(),
            movement_number: movement.movement_number.clone(),
        })
        .await;
        Ok((row, movement))
    }

    pub async fn get_stock(&self, id: Uuid) -> Result<stock::Model, ServiceError> {
        self.stock_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("stock {}", id)))
    }

    pub async fn list_stock(
        &self,
        filter: &StockFilter,
    ) -> Result<(Vec<stock::Model>, u64), ServiceError> {
        self.stock_repo.list(filter).await
    }

    /// Stock available to a FEFO issue right now, in allocation order.
    pub async fn get_available_stock_fefo(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<AvailableStock>, ServiceError> {
        self.stock_repo
            .get_available_stock_fefo(material_id, Utc::now().date_naive())
            .await
    }

    pub async fn get_material_summary(
        &self,
        material_id: Uuid,
    ) -> Result<MaterialSummary, ServiceError> {
        self.stock_repo.get_material_summary(material_id).await
    }

    /// Whether `quantity` could be issued for the material right now.
    /// Advisory only: the issue itself re-checks inside its transaction.
    pub async fn check_availability(
        &self,
        material_id: Uuid,
        quantity: Decimal,
    ) -> Result<bool, ServiceError> {
        let summary = self.stock_repo.get_material_summary(material_id).await?;
        Ok(summary.total_available >= quantity)
    }

    pub async fn get_expiring_stock(
        &self,
        days: i64,
    ) -> Result<Vec<AvailableStock>, ServiceError> {
        self.stock_repo
            .get_expiring_stock(days, Utc::now().date_naive())
            .await
    }

    /// Full movement history of a lot, oldest first: the traceability
    /// answer to "where did this lot go".
    pub async fn get_lot_traceability(
        &self,
        lot_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        self.stock_repo.get_movements_by_lot(lot_id).await
    }

    pub async fn get_recent_movements(
        &self,
        material_id: Uuid,
        limit: u64,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        self.stock_repo
            .get_movements_by_material(material_id, limit)
            .await
    }
}

impl std::fmt::Debug for StockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockService").finish_non_exhaustive()
    }
}
