//! In-memory repository backend.
//!
//! All state lives behind one `tokio::sync::Mutex`, so every operation is
//! strictly serialized, matching the atomicity the SeaORM backend gets from
//! database transactions. Used by the integration tests and useful for
//! embedding without a database.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entities::lot::{self, LotStatus, QcStatus};
use crate::entities::stock_movement::MovementType;
use crate::entities::stock_reservation::ReservationStatus;
use crate::entities::{
    inventory_count, inventory_count_line_item, stock, stock_movement, stock_reservation,
};
use crate::errors::ServiceError;
use crate::fefo::{self, plan_fefo};

use super::{
    format_count_number, format_lot_number, format_movement_number, AvailableStock, CountFilter,
    FefoIssue, InventoryCountRepository, LotIssued, LotRepository, MaterialSummary,
    MovementContext, NewLot, NewReservation, StockFilter, StockKey, StockRepository,
};

#[derive(Default)]
struct LedgerState {
    stock: Vec<stock::Model>,
    lots: Vec<lot::Model>,
    movements: Vec<stock_movement::Model>,
    reservations: Vec<stock_reservation::Model>,
    counts: Vec<inventory_count::Model>,
    count_lines: Vec<inventory_count_line_item::Model>,
    sequences: HashMap<String, i64>,
}

impl LedgerState {
    fn next_seq(&mut self, name: &str) -> i64 {
        let entry = self.sequences.entry(name.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn next_movement_number(&mut self, movement_type: MovementType, today: NaiveDate) -> String {
        let year = today.year();
        let seq = self.next_seq(&format!("movement:{}:{}", movement_type.number_prefix(), year));
        format_movement_number(movement_type, year, seq)
    }

    fn find_row_index(
        &self,
        location_id: Uuid,
        material_id: Uuid,
        lot_id: Option<Uuid>,
    ) -> Option<usize> {
        self.stock.iter().position(|s| {
            s.location_id == location_id && s.material_id == material_id && s.lot_id == lot_id
        })
    }

    fn lot_by_id(&self, id: Uuid) -> Option<&lot::Model> {
        self.lots.iter().find(|l| l.id == id)
    }

    fn fefo_candidates(&self, material_id: Uuid, today: NaiveDate) -> Vec<AvailableStock> {
        let mut candidates: Vec<AvailableStock> = self
            .stock
            .iter()
            .filter(|s| s.material_id == material_id)
            .filter_map(|s| {
                let lot_id = s.lot_id?;
                let row_lot = self.lot_by_id(lot_id)?;
                Some(AvailableStock {
                    stock: s.clone(),
                    lot: row_lot.clone(),
                })
            })
            .filter(|c| fefo::is_fefo_eligible(&c.stock, &c.lot, today))
            .collect();
        candidates.sort_by(fefo::fefo_ordering);
        candidates
    }

    #[allow(clippy::too_many_arguments)]
    fn push_movement(
        &mut self,
        movement_type: MovementType,
        ctx: &MovementContext,
        material_id: Uuid,
        lot_id: Option<Uuid>,
        from_location_id: Option<Uuid>,
        to_location_id: Option<Uuid>,
        quantity: Decimal,
        unit_id: Uuid,
        now: DateTime<Utc>,
    ) -> stock_movement::Model {
        let number = self.next_movement_number(movement_type, now.date_naive());
        let movement = stock_movement::Model {
            id: Uuid::new_v4(),
            movement_number: number,
            movement_type: movement_type.as_str().to_string(),
            reference_type: ctx.reference_type.as_str().to_string(),
            reference_id: ctx.reference_id,
            material_id,
            lot_id,
            from_location_id,
            to_location_id,
            quantity,
            unit_id,
            notes: ctx.notes.clone(),
            created_by: ctx.created_by,
            created_at: now,
        };
        self.movements.push(movement.clone());
        movement
    }

    fn insert_lot(&mut self, new_lot: &NewLot, now: DateTime<Utc>) -> lot::Model {
        let model = lot::Model {
            id: Uuid::new_v4(),
            lot_number: new_lot.lot_number.clone(),
            material_id: new_lot.material_id,
            supplier_id: new_lot.supplier_id,
            supplier_lot_number: new_lot.supplier_lot_number.clone(),
            manufactured_date: new_lot.manufactured_date,
            expiry_date: new_lot.expiry_date,
            received_date: new_lot.received_date,
            status: LotStatus::Active.as_str().to_string(),
            qc_status: QcStatus::Pending.as_str().to_string(),
            last_expiry_alert_days: None,
            notes: new_lot.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        self.lots.push(model.clone());
        model
    }

    /// Frees up to `amount` of reserved quantity in FEFO order, clamped at
    /// what is actually reserved. Returns the per-row amounts taken off, so
    /// a caller whose operation fails afterwards can put the hold back
    /// exactly.
    fn free_reserved(&mut self, material_id: Uuid, amount: Decimal) -> Vec<(usize, Decimal)> {
        let mut order: Vec<(usize, Option<lot::Model>)> = self
            .stock
            .iter()
            .enumerate()
            .filter(|(_, s)| s.material_id == material_id && s.reserved_qty > Decimal::ZERO)
            .map(|(i, s)| (i, s.lot_id.and_then(|id| self.lot_by_id(id)).cloned()))
            .collect();
        order.sort_by(|a, b| match (&a.1, &b.1) {
            (Some(la), Some(lb)) => la
                .expiry_date
                .cmp(&lb.expiry_date)
                .then(la.created_at.cmp(&lb.created_at))
                .then(la.id.cmp(&lb.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let mut remaining = amount;
        let mut freed = Vec::new();
        for (index, _) in order {
            if remaining <= Decimal::ZERO {
                break;
            }
            let row = &mut self.stock[index];
            let free = row.reserved_qty.min(remaining);
            if free > Decimal::ZERO {
                row.reserved_qty -= free;
                remaining -= free;
                freed.push((index, free));
            }
        }
        freed
    }

    fn settle_reservation(
        &mut self,
        reservation_id: Uuid,
        target: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<stock_reservation::Model, ServiceError> {
        let index = self
            .reservations
            .iter()
            .position(|r| r.id == reservation_id)
            .ok_or_else(|| ServiceError::NotFound(format!("reservation {}", reservation_id)))?;
        if !self.reservations[index].is_active() {
            return Ok(self.reservations[index].clone());
        }
        let (material_id, quantity) = (
            self.reservations[index].material_id,
            self.reservations[index].quantity,
        );
        self.free_reserved(material_id, quantity);
        let reservation = &mut self.reservations[index];
        reservation.status = target.as_str().to_string();
        reservation.released_at = Some(now);
        Ok(reservation.clone())
    }
}

/// Shared in-memory ledger; `Clone` hands out handles to the same state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl StockRepository for InMemoryStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<stock::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state.stock.iter().find(|s| s.id == id).cloned())
    }

    async fn get_by_location(
        &self,
        location_id: Uuid,
    ) -> Result<Vec<stock::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .stock
            .iter()
            .filter(|s| s.location_id == location_id)
            .cloned()
            .collect())
    }

    async fn get_by_material(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<stock::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .stock
            .iter()
            .filter(|s| s.material_id == material_id)
            .cloned()
            .collect())
    }

    async fn get_by_material_and_lot(
        &self,
        material_id: Uuid,
        lot_id: Uuid,
    ) -> Result<Vec<stock::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .stock
            .iter()
            .filter(|s| s.material_id == material_id && s.lot_id == Some(lot_id))
            .cloned()
            .collect())
    }

    async fn get_by_location_material_lot(
        &self,
        location_id: Uuid,
        material_id: Uuid,
        lot_id: Option<Uuid>,
    ) -> Result<Option<stock::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .find_row_index(location_id, material_id, lot_id)
            .map(|i| state.stock[i].clone()))
    }

    async fn list(
        &self,
        filter: &StockFilter,
    ) -> Result<(Vec<stock::Model>, u64), ServiceError> {
        let state = self.state.lock().await;
        let mut rows: Vec<stock::Model> = state
            .stock
            .iter()
            .filter(|s| filter.warehouse_id.map_or(true, |id| s.warehouse_id == id))
            .filter(|s| filter.zone_id.map_or(true, |id| s.zone_id == id))
            .filter(|s| filter.location_id.map_or(true, |id| s.location_id == id))
            .filter(|s| filter.material_id.map_or(true, |id| s.material_id == id))
            .filter(|s| filter.lot_id.map_or(true, |id| s.lot_id == Some(id)))
            .filter(|s| !filter.has_stock || s.quantity > Decimal::ZERO)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.material_id
                .cmp(&b.material_id)
                .then(a.location_id.cmp(&b.location_id))
        });
        let total = rows.len() as u64;
        let limit = if filter.limit == 0 { 50 } else { filter.limit } as usize;
        let page = filter.page.max(1) as usize;
        let rows = rows
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();
        Ok((rows, total))
    }

    async fn get_available_stock_fefo(
        &self,
        material_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<AvailableStock>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state.fefo_candidates(material_id, today))
    }

    async fn receive_stock(
        &self,
        key: &StockKey,
        new_lot: Option<&NewLot>,
        qty: Decimal,
        ctx: &MovementContext,
    ) -> Result<(stock::Model, Option<lot::Model>, stock_movement::Model), ServiceError> {
        if qty <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "receive quantity must be positive, got {}",
                qty
            )));
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let created = new_lot.map(|spec| state.insert_lot(spec, now));
        let lot_id = created.as_ref().map(|l| l.id).or(key.lot_id);
        let updated = match state.find_row_index(key.location_id, key.material_id, lot_id) {
            Some(index) => {
                let row = &mut state.stock[index];
                row.quantity += qty;
                row.updated_at = now;
                row.clone()
            }
            None => {
                let fresh = stock::Model {
                    id: Uuid::new_v4(),
                    warehouse_id: key.warehouse_id,
                    zone_id: key.zone_id,
                    location_id: key.location_id,
                    material_id: key.material_id,
                    lot_id,
                    quantity: qty,
                    reserved_qty: Decimal::ZERO,
                    unit_id: key.unit_id,
                    created_at: now,
                    updated_at: now,
                };
                state.stock.push(fresh.clone());
                fresh
            }
        };
        let movement = state.push_movement(
            MovementType::In,
            ctx,
            key.material_id,
            lot_id,
            None,
            Some(key.location_id),
            qty,
            key.unit_id,
            now,
        );
        Ok((updated, created, movement))
    }

    async fn issue_stock(
        &self,
        key: &StockKey,
        qty: Decimal,
        ctx: &MovementContext,
    ) -> Result<(stock::Model, stock_movement::Model), ServiceError> {
        if qty <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "issue quantity must be positive, got {}",
                qty
            )));
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let index = state
            .find_row_index(key.location_id, key.material_id, key.lot_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "stock for material {} at location {}",
                    key.material_id, key.location_id
                ))
            })?;
        if !state.stock[index].can_issue(qty) {
            return Err(ServiceError::InsufficientStock {
                requested: qty,
                available: state.stock[index].available_qty(),
            });
        }
        let updated = {
            let row = &mut state.stock[index];
            row.quantity -= qty;
            row.updated_at = now;
            row.clone()
        };
        let movement = state.push_movement(
            MovementType::Out,
            ctx,
            key.material_id,
            key.lot_id,
            Some(key.location_id),
            None,
            -qty,
            key.unit_id,
            now,
        );
        Ok((updated, movement))
    }

    async fn issue_stock_fefo(
        &self,
        material_id: Uuid,
        qty: Decimal,
        unit_id: Uuid,
        today: NaiveDate,
        consume_reservation: Option<Uuid>,
        ctx: &MovementContext,
    ) -> Result<FefoIssue, ServiceError> {
        if qty <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "issue quantity must be positive, got {}",
                qty
            )));
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut consumed = None;
        if let Some(reservation_id) = consume_reservation {
            let reservation = state
                .reservations
                .iter()
                .find(|r| r.id == reservation_id)
                .cloned()
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("reservation {}", reservation_id))
                })?;
            if !reservation.is_active() {
                return Err(ServiceError::InvalidStatus(format!(
                    "reservation {} is {}",
                    reservation.id, reservation.status
                )));
            }
            if reservation.material_id != material_id {
                return Err(ServiceError::ValidationError(format!(
                    "reservation {} is for a different material",
                    reservation.id
                )));
            }
            let amount = reservation.quantity.min(qty);
            let freed = state.free_reserved(material_id, amount);
            consumed = Some((reservation_id, amount, freed));
        }

        let candidates = state.fefo_candidates(material_id, today);
        let plan = match plan_fefo(&candidates, qty) {
            Ok(plan) => plan,
            Err(err) => {
                // A failed issue mutates nothing: put the consumed hold
                // back exactly as it was taken off.
                if let Some((_, _, freed)) = consumed {
                    for (index, freed_qty) in freed {
                        state.stock[index].reserved_qty += freed_qty;
                    }
                }
                return Err(err);
            }
        };

        let mut movements = Vec::with_capacity(plan.len());
        let mut lots_issued = Vec::with_capacity(plan.len());
        for allocation in &plan {
            let candidate = candidates
                .iter()
                .find(|c| c.stock.id == allocation.stock_id)
                .ok_or_else(|| {
                    ServiceError::InternalError("allocated row missing from candidates".into())
                })?;
            if let Some(row) = state.stock.iter_mut().find(|s| s.id == allocation.stock_id) {
                row.quantity -= allocation.take;
                row.updated_at = now;
            }
            let movement = state.push_movement(
                MovementType::Out,
                ctx,
                material_id,
                Some(allocation.lot_id),
                Some(allocation.location_id),
                None,
                -allocation.take,
                unit_id,
                now,
            );
            movements.push(movement);
            lots_issued.push(LotIssued {
                lot_id: allocation.lot_id,
                lot_number: candidate.lot.lot_number.clone(),
                quantity: allocation.take,
                expiry_date: candidate.lot.expiry_date,
                location_id: allocation.location_id,
            });
        }

        if let Some((reservation_id, amount, _)) = consumed {
            if let Some(reservation) =
                state.reservations.iter_mut().find(|r| r.id == reservation_id)
            {
                reservation.quantity -= amount;
                if reservation.quantity <= Decimal::ZERO {
                    reservation.status = ReservationStatus::Fulfilled.as_str().to_string();
                    reservation.released_at = Some(now);
                }
            }
        }

        Ok(FefoIssue {
            movements,
            lots_issued,
        })
    }

    async fn transfer_stock(
        &self,
        from: &StockKey,
        to_location_id: Uuid,
        qty: Decimal,
        ctx: &MovementContext,
    ) -> Result<(stock::Model, stock::Model, stock_movement::Model), ServiceError> {
        if qty <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "transfer quantity must be positive, got {}",
                qty
            )));
        }
        if from.location_id == to_location_id {
            return Err(ServiceError::ValidationError(
                "transfer source and destination are the same location".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let src_index = state
            .find_row_index(from.location_id, from.material_id, from.lot_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "stock for material {} at location {}",
                    from.material_id, from.location_id
                ))
            })?;
        if !state.stock[src_index].can_issue(qty) {
            return Err(ServiceError::InsufficientStock {
                requested: qty,
                available: state.stock[src_index].available_qty(),
            });
        }
        let source = {
            let row = &mut state.stock[src_index];
            row.quantity -= qty;
            row.updated_at = now;
            row.clone()
        };
        let dest = match state.find_row_index(to_location_id, from.material_id, from.lot_id) {
            Some(index) => {
                let row = &mut state.stock[index];
                row.quantity += qty;
                row.updated_at = now;
                row.clone()
            }
            None => {
                let fresh = stock::Model {
                    id: Uuid::new_v4(),
                    warehouse_id: source.warehouse_id,
                    zone_id: source.zone_id,
                    location_id: to_location_id,
                    material_id: from.material_id,
                    lot_id: from.lot_id,
                    quantity: qty,
                    reserved_qty: Decimal::ZERO,
                    unit_id: from.unit_id,
                    created_at: now,
                    updated_at: now,
                };
                state.stock.push(fresh.clone());
                fresh
            }
        };
        let movement = state.push_movement(
            MovementType::Transfer,
            ctx,
            from.material_id,
            from.lot_id,
            Some(from.location_id),
            Some(to_location_id),
            qty,
            from.unit_id,
            now,
        );
        Ok((source, dest, movement))
    }

    async fn adjust_stock(
        &self,
        key: &StockKey,
        delta: Decimal,
        ctx: &MovementContext,
    ) -> Result<(stock::Model, stock_movement::Model), ServiceError> {
        if delta == Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(
                "adjustment delta must be non-zero".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let updated = match state.find_row_index(key.location_id, key.material_id, key.lot_id) {
            Some(index) => {
                let quantity = state.stock[index].quantity + delta;
                if quantity < Decimal::ZERO {
                    return Err(ServiceError::InvalidQuantity(format!(
                        "adjustment would drive quantity negative ({} {})",
                        state.stock[index].quantity, delta
                    )));
                }
                let row = &mut state.stock[index];
                row.quantity = quantity;
                row.updated_at = now;
                row.clone()
            }
            None => {
                if delta < Decimal::ZERO {
                    return Err(ServiceError::NotFound(format!(
                        "stock for material {} at location {}",
                        key.material_id, key.location_id
                    )));
                }
                let fresh = stock::Model {
                    id: Uuid::new_v4(),
                    warehouse_id: key.warehouse_id,
                    zone_id: key.zone_id,
                    location_id: key.location_id,
                    material_id: key.material_id,
                    lot_id: key.lot_id,
                    quantity: delta,
                    reserved_qty: Decimal::ZERO,
                    unit_id: key.unit_id,
                    created_at: now,
                    updated_at: now,
                };
                state.stock.push(fresh.clone());
                fresh
            }
        };
        let (from_loc, to_loc) = if delta < Decimal::ZERO {
            (Some(key.location_id), None)
        } else {
            (None, Some(key.location_id))
        };
        let movement = state.push_movement(
            MovementType::Adjustment,
            ctx,
            key.material_id,
            key.lot_id,
            from_loc,
            to_loc,
            delta,
            key.unit_id,
            now,
        );
        Ok((updated, movement))
    }

    async fn reserve_stock(
        &self,
        reservation: &NewReservation,
        today: NaiveDate,
    ) -> Result<stock_reservation::Model, ServiceError> {
        if reservation.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "reservation quantity must be positive, got {}",
                reservation.quantity
            )));
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let candidates = state.fefo_candidates(reservation.material_id, today);
        let available: Decimal = candidates.iter().map(|c| c.available_qty()).sum();
        if available < reservation.quantity {
            return Err(ServiceError::InsufficientStock {
                requested: reservation.quantity,
                available,
            });
        }

        let mut remaining = reservation.quantity;
        for candidate in candidates {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = candidate.available_qty().min(remaining);
            if let Some(row) = state.stock.iter_mut().find(|s| s.id == candidate.stock.id) {
                row.reserved_qty += take;
                row.updated_at = now;
            }
            remaining -= take;
        }

        let model = stock_reservation::Model {
            id: Uuid::new_v4(),
            material_id: reservation.material_id,
            quantity: reservation.quantity,
            unit_id: reservation.unit_id,
            reservation_type: reservation.reservation_type.as_str().to_string(),
            reference_id: reservation.reference_id,
            reference_number: reservation.reference_number.clone(),
            status: ReservationStatus::Active.as_str().to_string(),
            expires_at: reservation.expires_at,
            created_by: reservation.created_by,
            created_at: now,
            released_at: None,
        };
        state.reservations.push(model.clone());
        Ok(model)
    }

    async fn release_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<stock_reservation::Model, ServiceError> {
        let mut state = self.state.lock().await;
        state.settle_reservation(reservation_id, ReservationStatus::Released, Utc::now())
    }

    async fn expire_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<stock_reservation::Model, ServiceError> {
        let mut state = self.state.lock().await;
        state.settle_reservation(reservation_id, ReservationStatus::Expired, Utc::now())
    }

    async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<stock_reservation::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .find(|r| r.id == reservation_id)
            .cloned())
    }

    async fn get_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<stock_reservation::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .filter(|r| r.is_active() && r.is_past_expiry(now))
            .cloned()
            .collect())
    }

    async fn get_material_summary(
        &self,
        material_id: Uuid,
    ) -> Result<MaterialSummary, ServiceError> {
        let state = self.state.lock().await;
        let mut summary = MaterialSummary {
            material_id,
            total_quantity: Decimal::ZERO,
            total_reserved: Decimal::ZERO,
            total_available: Decimal::ZERO,
        };
        for row in state.stock.iter().filter(|s| s.material_id == material_id) {
            summary.total_quantity += row.quantity;
            summary.total_reserved += row.reserved_qty;
        }
        summary.total_available = summary.total_quantity - summary.total_reserved;
        Ok(summary)
    }

    async fn get_low_stock_materials(
        &self,
        threshold: Decimal,
    ) -> Result<Vec<MaterialSummary>, ServiceError> {
        let state = self.state.lock().await;
        let mut by_material: HashMap<Uuid, (Decimal, Decimal)> = HashMap::new();
        for row in &state.stock {
            let entry = by_material
                .entry(row.material_id)
                .or_insert((Decimal::ZERO, Decimal::ZERO));
            entry.0 += row.quantity;
            entry.1 += row.reserved_qty;
        }
        let mut result: Vec<MaterialSummary> = by_material
            .into_iter()
            .map(|(material_id, (total_quantity, total_reserved))| MaterialSummary {
                material_id,
                total_quantity,
                total_reserved,
                total_available: total_quantity - total_reserved,
            })
            .filter(|s| s.total_available < threshold)
            .collect();
        result.sort_by_key(|s| s.material_id);
        Ok(result)
    }

    async fn get_expiring_stock(
        &self,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<AvailableStock>, ServiceError> {
        let horizon = today + Duration::days(days);
        let state = self.state.lock().await;
        let mut result: Vec<AvailableStock> = state
            .stock
            .iter()
            .filter(|s| s.quantity > Decimal::ZERO)
            .filter_map(|s| {
                let lot_id = s.lot_id?;
                let row_lot = state.lot_by_id(lot_id)?;
                Some(AvailableStock {
                    stock: s.clone(),
                    lot: row_lot.clone(),
                })
            })
            .filter(|c| c.lot.expiry_date <= horizon && !c.lot.is_expired(today))
            .collect();
        result.sort_by(fefo::fefo_ordering);
        Ok(result)
    }

    async fn get_movements_by_lot(
        &self,
        lot_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.lot_id == Some(lot_id))
            .cloned()
            .collect())
    }

    async fn get_movements_by_material(
        &self,
        material_id: Uuid,
        limit: u64,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let state = self.state.lock().await;
        let mut rows: Vec<stock_movement::Model> = state
            .movements
            .iter()
            .filter(|m| m.material_id == material_id)
            .cloned()
            .collect();
        rows.reverse();
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[async_trait]
impl LotRepository for InMemoryStore {
    async fn update(&self, updated: &lot::Model) -> Result<lot::Model, ServiceError> {
        let mut state = self.state.lock().await;
        let existing = state
            .lots
            .iter_mut()
            .find(|l| l.id == updated.id)
            .ok_or_else(|| ServiceError::NotFound(format!("lot {}", updated.id)))?;
        *existing = lot::Model {
            updated_at: Utc::now(),
            ..updated.clone()
        };
        Ok(existing.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<lot::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state.lot_by_id(id).cloned())
    }

    async fn get_by_lot_number(
        &self,
        lot_number: &str,
    ) -> Result<Option<lot::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .lots
            .iter()
            .find(|l| l.lot_number == lot_number)
            .cloned())
    }

    async fn get_available_lots(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<lot::Model>, ServiceError> {
        let state = self.state.lock().await;
        let mut lots: Vec<lot::Model> = state
            .lots
            .iter()
            .filter(|l| l.material_id == material_id)
            .filter(|l| l.status() != Some(LotStatus::Expired))
            .filter(|l| l.qc_status() == Some(QcStatus::Passed))
            .cloned()
            .collect();
        lots.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(lots)
    }

    async fn get_expiring_lots(
        &self,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<lot::Model>, ServiceError> {
        let horizon = today + Duration::days(days);
        let state = self.state.lock().await;
        let mut lots: Vec<lot::Model> = state
            .lots
            .iter()
            .filter(|l| l.status() != Some(LotStatus::Expired))
            .filter(|l| l.expiry_date > today && l.expiry_date <= horizon)
            .cloned()
            .collect();
        lots.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(lots)
    }

    async fn get_expired_lots(&self, today: NaiveDate) -> Result<Vec<lot::Model>, ServiceError> {
        let state = self.state.lock().await;
        let mut lots: Vec<lot::Model> = state
            .lots
            .iter()
            .filter(|l| l.status() != Some(LotStatus::Expired))
            .filter(|l| l.expiry_date <= today)
            .cloned()
            .collect();
        lots.sort_by_key(|l| l.expiry_date);
        Ok(lots)
    }

    async fn next_lot_number(&self, today: NaiveDate) -> Result<String, ServiceError> {
        let mut state = self.state.lock().await;
        let year_month = today.format("%Y%m").to_string();
        let seq = state.next_seq(&format!("lot:{}", year_month));
        Ok(format_lot_number(&year_month, seq))
    }

    async fn mark_expired(&self, lot_ids: &[Uuid]) -> Result<u64, ServiceError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut affected = 0;
        for existing in state.lots.iter_mut() {
            if lot_ids.contains(&existing.id) {
                existing.status = LotStatus::Expired.as_str().to_string();
                existing.updated_at = now;
                affected += 1;
            }
        }
        Ok(affected)
    }
}

#[async_trait]
impl InventoryCountRepository for InMemoryStore {
    async fn create(
        &self,
        count: &inventory_count::Model,
        lines: &[inventory_count_line_item::Model],
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        state.counts.push(count.clone());
        state.count_lines.extend_from_slice(lines);
        Ok(())
    }

    async fn update(
        &self,
        count: &inventory_count::Model,
    ) -> Result<inventory_count::Model, ServiceError> {
        let mut state = self.state.lock().await;
        let existing = state
            .counts
            .iter_mut()
            .find(|c| c.id == count.id)
            .ok_or_else(|| ServiceError::NotFound(format!("inventory count {}", count.id)))?;
        *existing = inventory_count::Model {
            updated_at: Utc::now(),
            ..count.clone()
        };
        Ok(existing.clone())
    }

    async fn get_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<inventory_count::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state.counts.iter().find(|c| c.id == id).cloned())
    }

    async fn list(
        &self,
        filter: &CountFilter,
    ) -> Result<(Vec<inventory_count::Model>, u64), ServiceError> {
        let state = self.state.lock().await;
        let mut rows: Vec<inventory_count::Model> = state
            .counts
            .iter()
            .filter(|c| filter.warehouse_id.map_or(true, |id| c.warehouse_id == id))
            .filter(|c| filter.status.as_ref().map_or(true, |s| &c.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = rows.len() as u64;
        let limit = if filter.limit == 0 { 50 } else { filter.limit } as usize;
        let page = filter.page.max(1) as usize;
        let rows = rows
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();
        Ok((rows, total))
    }

    async fn get_line_item(
        &self,
        line_item_id: Uuid,
    ) -> Result<Option<inventory_count_line_item::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .count_lines
            .iter()
            .find(|l| l.id == line_item_id)
            .cloned())
    }

    async fn get_line_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .count_lines
            .iter()
            .filter(|l| l.inventory_count_id == count_id)
            .cloned()
            .collect())
    }

    async fn update_line_item(
        &self,
        line: &inventory_count_line_item::Model,
    ) -> Result<inventory_count_line_item::Model, ServiceError> {
        let mut state = self.state.lock().await;
        let existing = state
            .count_lines
            .iter_mut()
            .find(|l| l.id == line.id)
            .ok_or_else(|| ServiceError::NotFound(format!("count line item {}", line.id)))?;
        *existing = line.clone();
        Ok(existing.clone())
    }

    async fn get_pending_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .count_lines
            .iter()
            .filter(|l| l.inventory_count_id == count_id && !l.is_counted)
            .cloned()
            .collect())
    }

    async fn get_variance_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .count_lines
            .iter()
            .filter(|l| {
                l.inventory_count_id == count_id && l.is_counted && l.variance != Decimal::ZERO
            })
            .cloned()
            .collect())
    }

    async fn next_count_number(&self, today: NaiveDate) -> Result<String, ServiceError> {
        let mut state = self.state.lock().await;
        let year = today.year();
        let seq = state.next_seq(&format!("count:{}", year));
        Ok(format_count_number(year, seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::stock_movement::ReferenceType;
    use rust_decimal_macros::dec;

    fn ctx() -> MovementContext {
        MovementContext {
            reference_type: ReferenceType::Adjustment,
            reference_id: None,
            notes: None,
            created_by: Uuid::new_v4(),
        }
    }

    fn key(material_id: Uuid, location_id: Uuid) -> StockKey {
        StockKey {
            warehouse_id: Uuid::new_v4(),
            zone_id: Uuid::new_v4(),
            location_id,
            material_id,
            lot_id: None,
            unit_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn receive_creates_row_and_movement() {
        let store = InMemoryStore::new();
        let material_id = Uuid::new_v4();
        let k = key(material_id, Uuid::new_v4());
        let (row, _, movement) = store.receive_stock(&k, None, dec!(5), &ctx()).await.unwrap();
        assert_eq!(row.quantity, dec!(5));
        assert_eq!(movement.quantity, dec!(5));
        assert!(movement.movement_number.starts_with("MOV-IN-"));

        let (row2, _, _) = store.receive_stock(&k, None, dec!(3), &ctx()).await.unwrap();
        assert_eq!(row2.id, row.id);
        assert_eq!(row2.quantity, dec!(8));
    }

    #[tokio::test]
    async fn rejected_receive_creates_no_lot() {
        let store = InMemoryStore::new();
        let material_id = Uuid::new_v4();
        let k = key(material_id, Uuid::new_v4());
        let spec = NewLot {
            lot_number: "LOT-20260101-0001".to_string(),
            material_id,
            supplier_id: None,
            supplier_lot_number: None,
            manufactured_date: None,
            expiry_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
            received_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            notes: None,
        };

        let err = store
            .receive_stock(&k, Some(&spec), dec!(-1), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidQuantity(_)));
        assert!(store
            .get_by_lot_number("LOT-20260101-0001")
            .await
            .unwrap()
            .is_none());

        // The success path binds the row to the lot it created.
        let (row, created, _) = store
            .receive_stock(&k, Some(&spec), dec!(5), &ctx())
            .await
            .unwrap();
        let created = created.unwrap();
        assert_eq!(row.lot_id, Some(created.id));
        assert_eq!(created.lot_number, "LOT-20260101-0001");
    }

    #[tokio::test]
    async fn movement_numbers_increment_within_type_and_year() {
        let store = InMemoryStore::new();
        let k = key(Uuid::new_v4(), Uuid::new_v4());
        let (_, _, m1) = store.receive_stock(&k, None, dec!(1), &ctx()).await.unwrap();
        let (_, _, m2) = store.receive_stock(&k, None, dec!(1), &ctx()).await.unwrap();
        let seq = |n: &str| n.rsplit('-').next().unwrap().parse::<i64>().unwrap();
        assert_eq!(seq(&m2.movement_number), seq(&m1.movement_number) + 1);
    }

    #[tokio::test]
    async fn zero_quantity_rows_are_retained() {
        let store = InMemoryStore::new();
        let material_id = Uuid::new_v4();
        let k = key(material_id, Uuid::new_v4());
        store.receive_stock(&k, None, dec!(5), &ctx()).await.unwrap();
        store.issue_stock(&k, dec!(5), &ctx()).await.unwrap();
        let rows = store.get_by_material(material_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, Decimal::ZERO);
    }
}
