//! Repository contracts: the seam between the ledger algorithms and the
//! storage engine. Services depend on these traits only, so the core is
//! testable against the in-memory implementations and deployable against
//! the SeaORM ones.
//!
//! Every multi-row mutation is atomic inside the repository: the SeaORM
//! implementations wrap a database transaction, the in-memory ones hold a
//! single mutex across the whole read-check-write cycle. Callers never see
//! a partially applied receive/issue/transfer/reserve.

pub mod count;
pub mod lot;
pub mod memory;
pub mod stock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities;
use crate::entities::{
    inventory_count, inventory_count_line_item, stock_movement, stock_reservation,
};
use crate::entities::stock_movement::{MovementType, ReferenceType};
use crate::entities::stock_reservation::ReservationType;
use crate::errors::ServiceError;

pub use count::SeaOrmInventoryCountRepository;
pub use lot::SeaOrmLotRepository;
pub use memory::InMemoryStore;
pub use stock::SeaOrmStockRepository;

/// Full key of a stock row plus its unit, used by row-level operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockKey {
    pub warehouse_id: Uuid,
    pub zone_id: Uuid,
    pub location_id: Uuid,
    pub material_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub unit_id: Uuid,
}

/// Audit context every mutation carries into its movement record.
#[derive(Debug, Clone)]
pub struct MovementContext {
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

/// A stock row joined with its (issuable) lot, as returned by the FEFO
/// read path in expiry-ascending order.
#[derive(Debug, Clone)]
pub struct AvailableStock {
    pub stock: entities::stock::Model,
    pub lot: entities::lot::Model,
}

impl AvailableStock {
    pub fn available_qty(&self) -> Decimal {
        self.stock.available_qty()
    }
}

/// One lot/location drawn by a FEFO issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotIssued {
    pub lot_id: Uuid,
    pub lot_number: String,
    pub quantity: Decimal,
    pub expiry_date: NaiveDate,
    pub location_id: Uuid,
}

/// Result of an applied FEFO issue. One Out movement is written per lot
/// drawn so the per-(material, lot, location) movement sum reconstructs
/// each row; `lots_issued` mirrors them in allocation order.
#[derive(Debug, Clone)]
pub struct FefoIssue {
    pub movements: Vec<stock_movement::Model>,
    pub lots_issued: Vec<LotIssued>,
}

/// Aggregate quantities for a material across all locations and lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialSummary {
    pub material_id: Uuid,
    pub total_quantity: Decimal,
    pub total_reserved: Decimal,
    pub total_available: Decimal,
}

/// Filter for stock listings (used by counts to scope their snapshot).
#[derive(Debug, Clone, Default)]
pub struct StockFilter {
    pub warehouse_id: Option<Uuid>,
    pub zone_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub material_id: Option<Uuid>,
    pub lot_id: Option<Uuid>,
    pub has_stock: bool,
    pub page: u64,
    pub limit: u64,
}

/// New reservation to insert; status is set by the repository.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub unit_id: Uuid,
    pub reservation_type: ReservationType,
    pub reference_id: Uuid,
    pub reference_number: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
}

/// New lot to insert; `lot_number` is generated by the caller via
/// `LotRepository::next_lot_number` when the supplier did not provide one.
#[derive(Debug, Clone)]
pub struct NewLot {
    pub lot_number: String,
    pub material_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub supplier_lot_number: Option<String>,
    pub manufactured_date: Option<NaiveDate>,
    pub expiry_date: NaiveDate,
    pub received_date: NaiveDate,
    pub notes: Option<String>,
}

#[async_trait]
pub trait StockRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<entities::stock::Model>, ServiceError>;
    async fn get_by_location(&self, location_id: Uuid)
        -> Result<Vec<entities::stock::Model>, ServiceError>;
    async fn get_by_material(&self, material_id: Uuid)
        -> Result<Vec<entities::stock::Model>, ServiceError>;
    async fn get_by_material_and_lot(
        &self,
        material_id: Uuid,
        lot_id: Uuid,
    ) -> Result<Vec<entities::stock::Model>, ServiceError>;
    async fn get_by_location_material_lot(
        &self,
        location_id: Uuid,
        material_id: Uuid,
        lot_id: Option<Uuid>,
    ) -> Result<Option<entities::stock::Model>, ServiceError>;
    async fn list(&self, filter: &StockFilter)
        -> Result<(Vec<entities::stock::Model>, u64), ServiceError>;

    /// FEFO read path: rows whose lot is issuable as of `today` and whose
    /// available quantity is positive, ordered by lot expiry ascending with
    /// lot creation order as the deterministic tie-break.
    async fn get_available_stock_fefo(
        &self,
        material_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<AvailableStock>, ServiceError>;

    /// Increments (or creates) the row for `key` and writes one In
    /// movement, atomically. When `new_lot` is given the lot is created in
    /// the same atomic scope and the row binds to it (`key.lot_id` is
    /// ignored), so a failed receive leaves no orphaned lot behind; the
    /// created lot is returned alongside the row and the movement.
    async fn receive_stock(
        &self,
        key: &StockKey,
        new_lot: Option<&NewLot>,
        qty: Decimal,
        ctx: &MovementContext,
    ) -> Result<
        (
            entities::stock::Model,
            Option<entities::lot::Model>,
            stock_movement::Model,
        ),
        ServiceError,
    >;

    /// Decrements the exact row for `key`, failing with
    /// `InsufficientStock` when `quantity - reserved_qty < qty`.
    async fn issue_stock(
        &self,
        key: &StockKey,
        qty: Decimal,
        ctx: &MovementContext,
    ) -> Result<(entities::stock::Model, stock_movement::Model), ServiceError>;

    /// All-or-nothing multi-lot issue in expiry order. When
    /// `consume_reservation` names an Active reservation for the material,
    /// the consumed amount is released from reserved quantity (and the
    /// reservation reduced, Fulfilled at zero) inside the same transaction.
    async fn issue_stock_fefo(
        &self,
        material_id: Uuid,
        qty: Decimal,
        unit_id: Uuid,
        today: NaiveDate,
        consume_reservation: Option<Uuid>,
        ctx: &MovementContext,
    ) -> Result<FefoIssue, ServiceError>;

    /// Moves `qty` from the row for `from` to the same material/lot at
    /// `to_location_id` (created if absent); both sides commit or neither.
    async fn transfer_stock(
        &self,
        from: &StockKey,
        to_location_id: Uuid,
        qty: Decimal,
        ctx: &MovementContext,
    ) -> Result<(entities::stock::Model, entities::stock::Model, stock_movement::Model), ServiceError>;

    /// Applies a signed delta. A negative resulting quantity is an
    /// `InvalidQuantity` error, never clamped.
    async fn adjust_stock(
        &self,
        key: &StockKey,
        delta: Decimal,
        ctx: &MovementContext,
    ) -> Result<(entities::stock::Model, stock_movement::Model), ServiceError>;

    /// Checks aggregate availability and distributes the reserved quantity
    /// across FEFO-eligible rows, inserting the reservation in the same
    /// atomic scope so concurrent reservations cannot double-book.
    async fn reserve_stock(
        &self,
        reservation: &NewReservation,
        today: NaiveDate,
    ) -> Result<stock_reservation::Model, ServiceError>;

    /// Idempotent: releasing a terminal reservation is a no-op returning
    /// the stored row unchanged.
    async fn release_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<stock_reservation::Model, ServiceError>;

    /// Same freeing semantics as release, but lands on Expired; used by
    /// the scheduler's TTL reclaim.
    async fn expire_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<stock_reservation::Model, ServiceError>;

    async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<stock_reservation::Model>, ServiceError>;

    async fn get_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<stock_reservation::Model>, ServiceError>;

    async fn get_material_summary(
        &self,
        material_id: Uuid,
    ) -> Result<MaterialSummary, ServiceError>;

    /// Materials whose aggregate available quantity sits below `threshold`.
    async fn get_low_stock_materials(
        &self,
        threshold: Decimal,
    ) -> Result<Vec<MaterialSummary>, ServiceError>;

    /// Stock on lots expiring within `days` of `today`, expiry ascending.
    async fn get_expiring_stock(
        &self,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<AvailableStock>, ServiceError>;

    async fn get_movements_by_lot(
        &self,
        lot_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError>;

    async fn get_movements_by_material(
        &self,
        material_id: Uuid,
        limit: u64,
    ) -> Result<Vec<stock_movement::Model>, ServiceError>;
}

#[async_trait]
pub trait LotRepository: Send + Sync {
    async fn update(&self, lot: &entities::lot::Model) -> Result<entities::lot::Model, ServiceError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<entities::lot::Model>, ServiceError>;
    async fn get_by_lot_number(&self, lot_number: &str)
        -> Result<Option<entities::lot::Model>, ServiceError>;
    async fn get_available_lots(&self, material_id: Uuid)
        -> Result<Vec<entities::lot::Model>, ServiceError>;

    /// Non-expired lots with `expiry_date` within `days` of `today`,
    /// expiry ascending. Excludes lots already marked Expired.
    async fn get_expiring_lots(
        &self,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<entities::lot::Model>, ServiceError>;

    /// Lots past expiry that have not yet been marked Expired.
    async fn get_expired_lots(&self, today: NaiveDate) -> Result<Vec<entities::lot::Model>, ServiceError>;

    /// Generates `LOT-YYYYMM-XXXX` from the serialized sequence.
    async fn next_lot_number(&self, today: NaiveDate) -> Result<String, ServiceError>;

    async fn mark_expired(&self, lot_ids: &[Uuid]) -> Result<u64, ServiceError>;
}

/// Filter for count listings.
#[derive(Debug, Clone, Default)]
pub struct CountFilter {
    pub warehouse_id: Option<Uuid>,
    pub status: Option<String>,
    pub page: u64,
    pub limit: u64,
}

#[async_trait]
pub trait InventoryCountRepository: Send + Sync {
    /// Inserts the header and its snapshot lines atomically.
    async fn create(
        &self,
        count: &inventory_count::Model,
        lines: &[inventory_count_line_item::Model],
    ) -> Result<(), ServiceError>;
    async fn update(
        &self,
        count: &inventory_count::Model,
    ) -> Result<inventory_count::Model, ServiceError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<inventory_count::Model>, ServiceError>;
    async fn list(
        &self,
        filter: &CountFilter,
    ) -> Result<(Vec<inventory_count::Model>, u64), ServiceError>;
    async fn get_line_item(
        &self,
        line_item_id: Uuid,
    ) -> Result<Option<inventory_count_line_item::Model>, ServiceError>;
    async fn get_line_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError>;
    async fn update_line_item(
        &self,
        line: &inventory_count_line_item::Model,
    ) -> Result<inventory_count_line_item::Model, ServiceError>;
    async fn get_pending_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError>;
    async fn get_variance_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError>;
    async fn next_count_number(&self, today: NaiveDate) -> Result<String, ServiceError>;
}

/// Formats a per-period document number, e.g. `MOV-OUT-2025-00042`.
pub(crate) fn format_movement_number(movement_type: MovementType, year: i32, seq: i64) -> String {
    format!("{}-{}-{:05}", movement_type.number_prefix(), year, seq)
}

pub(crate) fn format_lot_number(year_month: &str, seq: i64) -> String {
    format!("LOT-{}-{:04}", year_month, seq)
}

pub(crate) fn format_count_number(year: i32, seq: i64) -> String {
    format!("CNT-{}-{:04}", year, seq)
}
