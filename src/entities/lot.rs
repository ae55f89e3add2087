use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a lot. Expiring lots remain issuable; Expired lots
/// drop out of FEFO eligibility and are retained for traceability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotStatus {
    Active,
    Expiring,
    Expired,
}

impl LotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotStatus::Active => "ACTIVE",
            LotStatus::Expiring => "EXPIRING",
            LotStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(LotStatus::Active),
            "EXPIRING" => Some(LotStatus::Expiring),
            "EXPIRED" => Some(LotStatus::Expired),
            _ => None,
        }
    }
}

/// Quality-control disposition. Failed lots are excluded from allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QcStatus {
    Pending,
    Passed,
    Failed,
}

impl QcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QcStatus::Pending => "PENDING",
            QcStatus::Passed => "PASSED",
            QcStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(QcStatus::Pending),
            "PASSED" => Some(QcStatus::Passed),
            "FAILED" => Some(QcStatus::Failed),
            _ => None,
        }
    }
}

/// A traceable batch of material sharing manufacture/expiry metadata.
///
/// Created on first receipt of a distinct supplier lot (or with a generated
/// internal number when none is supplied); mutated only by the expiry
/// scheduler and by QC outcome; never deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub lot_number: String,
    pub material_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub supplier_lot_number: Option<String>,
    pub manufactured_date: Option<NaiveDate>,
    pub expiry_date: NaiveDate,
    pub received_date: NaiveDate,
    pub status: String,
    pub qc_status: String,
    /// Smallest expiry-alert threshold (in days) already published for this
    /// lot. The expiry job uses it to alert once per threshold crossing.
    pub last_expiry_alert_days: Option<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock::Entity")]
    Stock,
}

impl Related<super::stock::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Stock.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Option<LotStatus> {
        LotStatus::from_str(&self.status)
    }

    pub fn qc_status(&self) -> Option<QcStatus> {
        QcStatus::from_str(&self.qc_status)
    }

    /// Days until expiry relative to `today`; negative once expired.
    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date <= today
    }

    pub fn is_expiring_within(&self, days: i64, today: NaiveDate) -> bool {
        !self.is_expired(today) && self.days_until_expiry(today) <= days
    }

    /// A lot is issuable while Active or Expiring, QC Passed and not past
    /// its expiry date.
    pub fn can_be_issued(&self, today: NaiveDate) -> bool {
        matches!(
            self.status(),
            Some(LotStatus::Active) | Some(LotStatus::Expiring)
        ) && self.qc_status() == Some(QcStatus::Passed)
            && !self.is_expired(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lot(expiry_offset_days: i64, status: LotStatus, qc: QcStatus) -> Model {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        Model {
            id: Uuid::new_v4(),
            lot_number: "LOT-202503-0001".into(),
            material_id: Uuid::new_v4(),
            supplier_id: None,
            supplier_lot_number: None,
            manufactured_date: None,
            expiry_date: today + Duration::days(expiry_offset_days),
            received_date: today,
            status: status.as_str().to_string(),
            qc_status: qc.as_str().to_string(),
            last_expiry_alert_days: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn lot_within_shelf_life_and_qc_passed_is_issuable() {
        let l = lot(30, LotStatus::Active, QcStatus::Passed);
        assert!(l.can_be_issued(today()));
        assert_eq!(l.days_until_expiry(today()), 30);
    }

    #[test]
    fn expired_lot_is_not_issuable() {
        let l = lot(-1, LotStatus::Active, QcStatus::Passed);
        assert!(l.is_expired(today()));
        assert!(!l.can_be_issued(today()));
    }

    #[test]
    fn lot_expiring_on_its_expiry_date_counts_as_expired() {
        let l = lot(0, LotStatus::Active, QcStatus::Passed);
        assert!(l.is_expired(today()));
    }

    #[test]
    fn qc_failed_or_pending_blocks_issue() {
        assert!(!lot(30, LotStatus::Active, QcStatus::Failed).can_be_issued(today()));
        assert!(!lot(30, LotStatus::Active, QcStatus::Pending).can_be_issued(today()));
    }

    #[test]
    fn expiring_status_is_still_issuable_expired_is_not() {
        assert!(lot(5, LotStatus::Expiring, QcStatus::Passed).can_be_issued(today()));
        assert!(!lot(5, LotStatus::Expired, QcStatus::Passed).can_be_issued(today()));
    }

    #[test]
    fn expiry_window_check_excludes_already_expired() {
        let l = lot(7, LotStatus::Active, QcStatus::Passed);
        assert!(l.is_expiring_within(7, today()));
        assert!(!l.is_expiring_within(6, today()));
        assert!(!lot(-3, LotStatus::Active, QcStatus::Passed).is_expiring_within(7, today()));
    }
}
