//! First-Expired-First-Out allocation planning.
//!
//! The planner is pure: given candidate rows already filtered and ordered
//! by the repository's FEFO read path, it decides how much to draw from
//! each row. Both storage backends apply the same plan inside their own
//! atomic scope, so allocation order can never diverge between them.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::entities::{lot, stock};
use crate::errors::ServiceError;
use crate::repositories::AvailableStock;

/// One slice of a FEFO plan: draw `take` from the stock row `stock_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub stock_id: Uuid,
    pub lot_id: Uuid,
    pub location_id: Uuid,
    pub take: Decimal,
}

/// Greedy expiry-ascending allocation over pre-sorted candidates.
///
/// All-or-nothing: when the candidates cannot cover `requested`, no
/// partial plan is returned and the shortfall is reported exactly.
pub fn plan_fefo(
    candidates: &[AvailableStock],
    requested: Decimal,
) -> Result<Vec<Allocation>, ServiceError> {
    if requested <= Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "requested quantity must be positive, got {}",
            requested
        )));
    }

    let mut remaining = requested;
    let mut plan = Vec::new();
    for candidate in candidates {
        if remaining <= Decimal::ZERO {
            break;
        }
        let available = candidate.available_qty();
        if available <= Decimal::ZERO {
            continue;
        }
        let take = available.min(remaining);
        plan.push(Allocation {
            stock_id: candidate.stock.id,
            lot_id: candidate.lot.id,
            location_id: candidate.stock.location_id,
            take,
        });
        remaining -= take;
    }

    if remaining > Decimal::ZERO {
        return Err(ServiceError::InsufficientStock {
            requested,
            available: requested - remaining,
        });
    }
    Ok(plan)
}

/// Sort comparator for FEFO candidates: lot expiry ascending, then lot
/// creation time, then lot id. Used by backends that sort in process.
pub fn fefo_ordering(a: &AvailableStock, b: &AvailableStock) -> std::cmp::Ordering {
    a.lot
        .expiry_date
        .cmp(&b.lot.expiry_date)
        .then(a.lot.created_at.cmp(&b.lot.created_at))
        .then(a.lot.id.cmp(&b.lot.id))
}

/// Whether a stock row participates in FEFO allocation as of `today`.
pub fn is_fefo_eligible(row: &stock::Model, row_lot: &lot::Model, today: chrono::NaiveDate) -> bool {
    row.available_qty() > Decimal::ZERO && row_lot.can_be_issued(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candidate(expiry: NaiveDate, qty: Decimal, reserved: Decimal) -> AvailableStock {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let lot_id = Uuid::new_v4();
        AvailableStock {
            stock: stock::Model {
                id: Uuid::new_v4(),
                warehouse_id: Uuid::new_v4(),
                zone_id: Uuid::new_v4(),
                location_id: Uuid::new_v4(),
                material_id: Uuid::new_v4(),
                lot_id: Some(lot_id),
                quantity: qty,
                reserved_qty: reserved,
                unit_id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
            },
            lot: lot::Model {
                id: lot_id,
                lot_number: format!("LOT-{}", expiry),
                material_id: Uuid::new_v4(),
                supplier_id: None,
                supplier_lot_number: None,
                manufactured_date: None,
                expiry_date: expiry,
                received_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                status: lot::LotStatus::Active.as_str().to_string(),
                qc_status: lot::QcStatus::Passed.as_str().to_string(),
                last_expiry_alert_days: None,
                notes: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn drains_earliest_expiry_first() {
        let early = candidate(date(2025, 3, 1), dec!(10), dec!(0));
        let late = candidate(date(2025, 6, 1), dec!(10), dec!(0));
        let plan = plan_fefo(&[early.clone(), late.clone()], dec!(15)).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].lot_id, early.lot.id);
        assert_eq!(plan[0].take, dec!(10));
        assert_eq!(plan[1].lot_id, late.lot.id);
        assert_eq!(plan[1].take, dec!(5));
    }

    #[test]
    fn exact_fit_takes_only_the_first_lot() {
        let early = candidate(date(2025, 3, 1), dec!(10), dec!(0));
        let late = candidate(date(2025, 6, 1), dec!(10), dec!(0));
        let plan = plan_fefo(&[early, late], dec!(10)).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].take, dec!(10));
    }

    #[test]
    fn shortfall_is_all_or_nothing() {
        let only = candidate(date(2025, 3, 1), dec!(10), dec!(4));
        let err = plan_fefo(&[only], dec!(8)).unwrap_err();
        match err {
            ServiceError::InsufficientStock {
                requested,
                available,
            } => {
                assert_eq!(requested, dec!(8));
                assert_eq!(available, dec!(6));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reserved_quantity_is_not_allocatable() {
        let row = candidate(date(2025, 3, 1), dec!(10), dec!(10));
        let err = plan_fefo(&[row], dec!(1)).unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock { .. }));
    }

    #[test]
    fn zero_request_is_rejected() {
        let err = plan_fefo(&[], dec!(0)).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidQuantity(_)));
    }

    #[test]
    fn ordering_breaks_ties_on_created_at_then_id() {
        let d = date(2025, 3, 1);
        let mut a = candidate(d, dec!(1), dec!(0));
        let mut b = candidate(d, dec!(1), dec!(0));
        a.lot.created_at = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        b.lot.created_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(fefo_ordering(&a, &b), std::cmp::Ordering::Greater);
        b.lot.created_at = a.lot.created_at;
        assert_eq!(fefo_ordering(&a, &b), a.lot.id.cmp(&b.lot.id));
    }
}
