use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One (location, material, lot) line of a physical count. `system_qty` is
/// the ledger quantity snapshotted when the count was created;
/// `counted_qty` stays `None` until recorded.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_count_line_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub inventory_count_id: Uuid,
    pub location_id: Uuid,
    pub material_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub unit_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub system_qty: Decimal,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))", nullable)]
    pub counted_qty: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub variance: Decimal,
    pub is_counted: bool,
    pub counted_by: Option<Uuid>,
    pub counted_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_count::Entity",
        from = "Column::InventoryCountId",
        to = "super::inventory_count::Column::Id"
    )]
    InventoryCount,
}

impl Related<super::inventory_count::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryCount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Applies the count result: sets counted quantity, derives the
    /// variance and stamps the counter.
    pub fn record_count(&mut self, counted_qty: Decimal, counted_by: Uuid, now: DateTime<Utc>) {
        self.counted_qty = Some(counted_qty);
        self.variance = counted_qty - self.system_qty;
        self.is_counted = true;
        self.counted_by = Some(counted_by);
        self.counted_at = Some(now);
    }

    pub fn has_variance(&self) -> bool {
        self.variance != Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn variance_is_counted_minus_system() {
        let mut line = Model {
            id: Uuid::new_v4(),
            inventory_count_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            material_id: Uuid::new_v4(),
            lot_id: None,
            unit_id: Uuid::new_v4(),
            system_qty: dec!(100),
            counted_qty: None,
            variance: Decimal::ZERO,
            is_counted: false,
            counted_by: None,
            counted_at: None,
            notes: None,
            created_at: Utc::now(),
        };
        line.record_count(dec!(92), Uuid::new_v4(), Utc::now());
        assert_eq!(line.variance, dec!(-8));
        assert!(line.is_counted);
        assert!(line.has_variance());
    }
}
