use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One ledger row: quantity of a material at a specific location, per lot.
///
/// `lot_id` is `None` for non-lot-tracked materials; that is a distinct row
/// key, not a sentinel. `available = quantity - reserved_qty` is always
/// derived. Rows are retained at quantity zero and must never go negative.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub warehouse_id: Uuid,
    pub zone_id: Uuid,
    pub location_id: Uuid,
    pub material_id: Uuid,
    pub lot_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub reserved_qty: Decimal,
    pub unit_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lot::Entity",
        from = "Column::LotId",
        to = "super::lot::Column::Id"
    )]
    Lot,
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Quantity not held by a reservation.
    pub fn available_qty(&self) -> Decimal {
        self.quantity - self.reserved_qty
    }

    pub fn can_issue(&self, qty: Decimal) -> bool {
        self.available_qty() >= qty
    }
}
