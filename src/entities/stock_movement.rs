use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of ledger mutation a movement records. The prefix feeds the
/// per-type, per-year movement number sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    In,
    Out,
    Transfer,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Transfer => "TRANSFER",
            MovementType::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "IN" => Some(MovementType::In),
            "OUT" => Some(MovementType::Out),
            "TRANSFER" => Some(MovementType::Transfer),
            "ADJUSTMENT" => Some(MovementType::Adjustment),
            _ => None,
        }
    }

    /// Document-number prefix, e.g. `MOV-OUT-2025-00042`.
    pub fn number_prefix(&self) -> &'static str {
        match self {
            MovementType::In => "MOV-IN",
            MovementType::Out => "MOV-OUT",
            MovementType::Transfer => "MOV-TRF",
            MovementType::Adjustment => "MOV-ADJ",
        }
    }
}

/// What caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceType {
    Grn,
    GoodsIssue,
    WorkOrder,
    Transfer,
    Adjustment,
    Count,
    Reservation,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Grn => "GRN",
            ReferenceType::GoodsIssue => "GOODS_ISSUE",
            ReferenceType::WorkOrder => "WORK_ORDER",
            ReferenceType::Transfer => "TRANSFER",
            ReferenceType::Adjustment => "ADJUSTMENT",
            ReferenceType::Count => "COUNT",
            ReferenceType::Reservation => "RESERVATION",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GRN" => Some(ReferenceType::Grn),
            "GOODS_ISSUE" => Some(ReferenceType::GoodsIssue),
            "WORK_ORDER" => Some(ReferenceType::WorkOrder),
            "TRANSFER" => Some(ReferenceType::Transfer),
            "ADJUSTMENT" => Some(ReferenceType::Adjustment),
            "COUNT" => Some(ReferenceType::Count),
            "RESERVATION" => Some(ReferenceType::Reservation),
            _ => None,
        }
    }
}

/// Append-only audit entry. Never updated or deleted; corrections are new
/// Adjustment movements. The signed sum of movements for a
/// (material, lot, location) key reconstructs that key's stock quantity.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub movement_number: String,
    pub movement_type: String,
    pub reference_type: String,
    pub reference_id: Option<Uuid>,
    pub material_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
    /// Signed: receipts positive, issues negative, adjustments carry the
    /// delta's own sign. A transfer writes one row; it is negative at
    /// `from_location_id` and positive at `to_location_id`.
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub quantity: Decimal,
    pub unit_id: Uuid,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
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
    pub fn movement_type(&self) -> Option<MovementType> {
        MovementType::from_str(&self.movement_type)
    }

    /// Contribution of this movement to the quantity at `location_id`.
    /// Transfers count negative at the source and positive at the
    /// destination; everything else is its signed quantity at whichever
    /// side it touches.
    pub fn signed_quantity_at(&self, location_id: Uuid) -> Decimal {
        match self.movement_type() {
            Some(MovementType::Transfer) => {
                let mut total = Decimal::ZERO;
                if self.from_location_id == Some(location_id) {
                    total -= self.quantity;
                }
                if self.to_location_id == Some(location_id) {
                    total += self.quantity;
                }
                total
            }
            _ => {
                if self.from_location_id == Some(location_id)
                    || self.to_location_id == Some(location_id)
                {
                    self.quantity
                } else {
                    Decimal::ZERO
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn movement_number_prefixes_are_per_type() {
        assert_eq!(MovementType::In.number_prefix(), "MOV-IN");
        assert_eq!(MovementType::Out.number_prefix(), "MOV-OUT");
        assert_eq!(MovementType::Transfer.number_prefix(), "MOV-TRF");
        assert_eq!(MovementType::Adjustment.number_prefix(), "MOV-ADJ");
    }

    #[test]
    fn transfer_contributes_both_signs() {
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let m = Model {
            id: Uuid::new_v4(),
            movement_number: "MOV-TRF-2025-00001".into(),
            movement_type: MovementType::Transfer.as_str().into(),
            reference_type: ReferenceType::Transfer.as_str().into(),
            reference_id: None,
            material_id: Uuid::new_v4(),
            lot_id: None,
            from_location_id: Some(from),
            to_location_id: Some(to),
            quantity: dec!(12),
            unit_id: Uuid::new_v4(),
            notes: None,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        assert_eq!(m.signed_quantity_at(from), dec!(-12));
        assert_eq!(m.signed_quantity_at(to), dec!(12));
        assert_eq!(m.signed_quantity_at(Uuid::new_v4()), Decimal::ZERO);
    }
}
