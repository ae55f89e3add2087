use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationType {
    SalesOrder,
    WorkOrder,
    Transfer,
}

impl ReservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationType::SalesOrder => "SALES_ORDER",
            ReservationType::WorkOrder => "WORK_ORDER",
            ReservationType::Transfer => "TRANSFER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SALES_ORDER" => Some(ReservationType::SalesOrder),
            "WORK_ORDER" => Some(ReservationType::WorkOrder),
            "TRANSFER" => Some(ReservationType::Transfer),
            _ => None,
        }
    }
}

/// Released, Fulfilled and Expired are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Released,
    Fulfilled,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Released => "RELEASED",
            ReservationStatus::Fulfilled => "FULFILLED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ReservationStatus::Active),
            "RELEASED" => Some(ReservationStatus::Released),
            "FULFILLED" => Some(ReservationStatus::Fulfilled),
            "EXPIRED" => Some(ReservationStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

/// A material-level hold against future available quantity. Never bound to
/// a lot or location; lot selection is deferred to issue time so the FEFO
/// allocator stays free to pick newly arrived earlier-expiry stock.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_reservations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub material_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub quantity: Decimal,
    pub unit_id: Uuid,
    pub reservation_type: String,
    pub reference_id: Uuid,
    pub reference_number: String,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Option<ReservationStatus> {
        ReservationStatus::from_str(&self.status)
    }

    pub fn is_active(&self) -> bool {
        self.status() == Some(ReservationStatus::Active)
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp < now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ReservationStatus::Active,
            ReservationStatus::Released,
            ReservationStatus::Fulfilled,
            ReservationStatus::Expired,
        ] {
            assert_eq!(ReservationStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ReservationStatus::from_str("UNKNOWN"), None);
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!ReservationStatus::Active.is_terminal());
        assert!(ReservationStatus::Released.is_terminal());
        assert!(ReservationStatus::Fulfilled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }
}
