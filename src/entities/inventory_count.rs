use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountStatus {
    Draft,
    InProgress,
    Completed,
    Cancelled,
}

impl CountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountStatus::Draft => "DRAFT",
            CountStatus::InProgress => "IN_PROGRESS",
            CountStatus::Completed => "COMPLETED",
            CountStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(CountStatus::Draft),
            "IN_PROGRESS" => Some(CountStatus::InProgress),
            "COMPLETED" => Some(CountStatus::Completed),
            "CANCELLED" => Some(CountStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountType {
    Full,
    Cycle,
    Spot,
}

impl CountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountType::Full => "FULL",
            CountType::Cycle => "CYCLE",
            CountType::Spot => "SPOT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "FULL" => Some(CountType::Full),
            "CYCLE" => Some(CountType::Cycle),
            "SPOT" => Some(CountType::Spot),
            _ => None,
        }
    }
}

/// A physical inventory count header. Line items snapshot the ledger at
/// creation time; completion is blocked while any line is uncounted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_counts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub count_number: String,
    pub count_date: NaiveDate,
    pub count_type: String,
    pub warehouse_id: Uuid,
    pub zone_id: Option<Uuid>,
    pub status: String,
    pub notes: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::inventory_count_line_item::Entity")]
    LineItems,
}

impl Related<super::inventory_count_line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LineItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Option<CountStatus> {
        CountStatus::from_str(&self.status)
    }

    pub fn can_start(&self) -> bool {
        self.status() == Some(CountStatus::Draft)
    }

    pub fn can_record(&self) -> bool {
        self.status() == Some(CountStatus::InProgress)
    }

    pub fn can_complete(&self) -> bool {
        self.status() == Some(CountStatus::InProgress)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status(),
            Some(CountStatus::Draft) | Some(CountStatus::InProgress)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(status: CountStatus) -> Model {
        Model {
            id: Uuid::new_v4(),
            count_number: "CNT-2025-0001".into(),
            count_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            count_type: CountType::Cycle.as_str().into(),
            warehouse_id: Uuid::new_v4(),
            zone_id: None,
            status: status.as_str().into(),
            notes: None,
            started_at: None,
            completed_at: None,
            created_by: Uuid::new_v4(),
            approved_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn draft_starts_in_progress_completes() {
        assert!(count(CountStatus::Draft).can_start());
        assert!(!count(CountStatus::Draft).can_complete());
        assert!(count(CountStatus::InProgress).can_complete());
        assert!(!count(CountStatus::InProgress).can_start());
        assert!(!count(CountStatus::Completed).can_cancel());
    }
}
