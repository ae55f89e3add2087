//! SeaORM-backed stock repository. Every mutating operation runs inside a
//! database transaction; document numbers come from the `sequences` table,
//! bumped with a single upsert so concurrent writers serialize on the row
//! lock instead of racing a read-then-increment.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    TransactionError, TransactionTrait,
};
use uuid::Uuid;

use crate::entities::lot::{LotStatus, QcStatus};
use crate::entities::stock_movement::MovementType;
use crate::entities::stock_reservation::ReservationStatus;
use crate::entities::{lot, stock, stock_movement, stock_reservation};
use crate::errors::ServiceError;
use crate::fefo::{self, plan_fefo};

use super::{
    format_movement_number, AvailableStock, FefoIssue, LotIssued, MaterialSummary,
    MovementContext, NewLot, NewReservation, StockFilter, StockKey, StockRepository,
};

#[derive(Clone, Debug)]
pub struct SeaOrmStockRepository {
    db: DatabaseConnection,
}

impl SeaOrmStockRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

/// Bumps the named counter and returns its new value. The upsert is a
/// single statement, so two transactions bumping the same counter cannot
/// both read the same value.
pub(crate) async fn next_sequence<C: ConnectionTrait>(
    conn: &C,
    name: &str,
) -> Result<i64, ServiceError> {
    let backend = conn.get_database_backend();
    let sql = match backend {
        DbBackend::Postgres => {
            "INSERT INTO sequences (name, value) VALUES ($1, 1) \
             ON CONFLICT (name) DO UPDATE SET value = sequences.value + 1 \
             RETURNING value"
        }
        _ => {
            "INSERT INTO sequences (name, value) VALUES (?, 1) \
             ON CONFLICT (name) DO UPDATE SET value = value + 1 \
             RETURNING value"
        }
    };
    let stmt = Statement::from_sql_and_values(backend, sql, [name.into()]);
    let row = conn
        .query_one(stmt)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::InternalError(format!("sequence {} returned no row", name))
        })?;
    let value: i64 = row.try_get("", "value").map_err(ServiceError::db_error)?;
    Ok(value)
}

async fn next_movement_number<C: ConnectionTrait>(
    conn: &C,
    movement_type: MovementType,
    today: NaiveDate,
) -> Result<String, ServiceError> {
    let year = today.year();
    let name = format!("movement:{}:{}", movement_type.number_prefix(), year);
    let seq = next_sequence(conn, &name).await?;
    Ok(format_movement_number(movement_type, year, seq))
}

#[allow(clippy::too_many_arguments)]
async fn insert_movement<C: ConnectionTrait>(
    conn: &C,
    movement_type: MovementType,
    ctx: &MovementContext,
    material_id: Uuid,
    lot_id: Option<Uuid>,
    from_location_id: Option<Uuid>,
    to_location_id: Option<Uuid>,
    quantity: Decimal,
    unit_id: Uuid,
    now: DateTime<Utc>,
) -> Result<stock_movement::Model, ServiceError> {
    let number = next_movement_number(conn, movement_type, now.date_naive()).await?;
    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        movement_number: Set(number),
        movement_type: Set(movement_type.as_str().to_string()),
        reference_type: Set(ctx.reference_type.as_str().to_string()),
        reference_id: Set(ctx.reference_id),
        material_id: Set(material_id),
        lot_id: Set(lot_id),
        from_location_id: Set(from_location_id),
        to_location_id: Set(to_location_id),
        quantity: Set(quantity),
        unit_id: Set(unit_id),
        notes: Set(ctx.notes.clone()),
        created_by: Set(ctx.created_by),
        created_at: Set(now),
    };
    movement.insert(conn).await.map_err(ServiceError::db_error)
}

/// `for_update` locks the row for the caller's transaction (`SELECT ...
/// FOR UPDATE`; a no-op on SQLite, whose single writer serializes anyway),
/// so a concurrent mutation cannot act on the same stale read.
async fn find_row<C: ConnectionTrait>(
    conn: &C,
    location_id: Uuid,
    material_id: Uuid,
    lot_id: Option<Uuid>,
    for_update: bool,
) -> Result<Option<stock::Model>, ServiceError> {
    let mut query = stock::Entity::find()
        .filter(stock::Column::LocationId.eq(location_id))
        .filter(stock::Column::MaterialId.eq(material_id));
    query = match lot_id {
        Some(id) => query.filter(stock::Column::LotId.eq(id)),
        None => query.filter(stock::Column::LotId.is_null()),
    };
    if for_update {
        query = query.lock_exclusive();
    }
    query.one(conn).await.map_err(ServiceError::db_error)
}

async fn update_row_quantities<C: ConnectionTrait>(
    conn: &C,
    row: stock::Model,
    quantity: Decimal,
    reserved_qty: Decimal,
    now: DateTime<Utc>,
) -> Result<stock::Model, ServiceError> {
    let mut active: stock::ActiveModel = row.into();
    active.quantity = Set(quantity);
    active.reserved_qty = Set(reserved_qty);
    active.updated_at = Set(now);
    active.update(conn).await.map_err(ServiceError::db_error)
}

/// Loads FEFO candidates: rows with an issuable lot and positive available
/// quantity, in allocation order. Mutating callers pass `for_update` so the
/// availability they checked is the availability they write against; two
/// concurrent reserves then serialize on the row locks instead of both
/// passing the check on the same snapshot.
async fn fefo_candidates<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
    today: NaiveDate,
    for_update: bool,
) -> Result<Vec<AvailableStock>, ServiceError> {
    if for_update {
        // FOR UPDATE cannot sit on the nullable side of the lot join, so
        // the lock is taken with a plain select on the stock rows first.
        stock::Entity::find()
            .filter(stock::Column::MaterialId.eq(material_id))
            .filter(stock::Column::LotId.is_not_null())
            .lock_exclusive()
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
    }
    let rows = stock::Entity::find()
        .filter(stock::Column::MaterialId.eq(material_id))
        .filter(stock::Column::LotId.is_not_null())
        .find_also_related(lot::Entity)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut candidates: Vec<AvailableStock> = rows
        .into_iter()
        .filter_map(|(row, maybe_lot)| maybe_lot.map(|l| AvailableStock { stock: row, lot: l }))
        .filter(|c| fefo::is_fefo_eligible(&c.stock, &c.lot, today))
        .collect();
    candidates.sort_by(fefo::fefo_ordering);
    Ok(candidates)
}

/// Frees up to `amount` of reserved quantity across the material's rows in
/// FEFO order. Clamped at what is actually reserved, so releasing twice
/// never drives a row negative.
async fn free_reserved<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    // Lock the held rows before reading them through the lot join; see
    // fefo_candidates for why the lock is a separate plain select.
    stock::Entity::find()
        .filter(stock::Column::MaterialId.eq(material_id))
        .filter(stock::Column::ReservedQty.gt(Decimal::ZERO))
        .lock_exclusive()
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    let rows = stock::Entity::find()
        .filter(stock::Column::MaterialId.eq(material_id))
        .filter(stock::Column::ReservedQty.gt(Decimal::ZERO))
        .find_also_related(lot::Entity)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    // Rows without a lot sort last; among lots, earliest expiry first.
    let mut rows: Vec<(stock::Model, Option<lot::Model>)> = rows;
    rows.sort_by(|a, b| match (&a.1, &b.1) {
        (Some(la), Some(lb)) => la
            .expiry_date
            .cmp(&lb.expiry_date)
            .then(la.created_at.cmp(&lb.created_at))
            .then(la.id.cmp(&lb.id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.0.id.cmp(&b.0.id),
    });

    let mut remaining = amount;
    for (row, _) in rows {
        if remaining <= Decimal::ZERO {
            break;
        }
        let free = row.reserved_qty.min(remaining);
        let quantity = row.quantity;
        let reserved = row.reserved_qty - free;
        update_row_quantities(conn, row, quantity, reserved, now).await?;
        remaining -= free;
    }
    Ok(())
}

/// Shared body of release and expire: frees the reserved quantity and
/// moves the reservation to `target`. No-op for terminal reservations.
async fn settle_reservation<C: ConnectionTrait>(
    conn: &C,
    reservation_id: Uuid,
    target: ReservationStatus,
    now: DateTime<Utc>,
) -> Result<stock_reservation::Model, ServiceError> {
    let reservation = stock_reservation::Entity::find_by_id(reservation_id)
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("reservation {}", reservation_id)))?;

    if !reservation.is_active() {
        return Ok(reservation);
    }

    free_reserved(conn, reservation.material_id, reservation.quantity, now).await?;

    let mut active: stock_reservation::ActiveModel = reservation.into();
    active.status = Set(target.as_str().to_string());
    active.released_at = Set(Some(now));
    active.update(conn).await.map_err(ServiceError::db_error)
}

fn map_txn_err(e: TransactionError<ServiceError>) -> ServiceError {
    match e {
        TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}

#[derive(Debug, FromQueryResult)]
struct SummaryRow {
    material_id: Uuid,
    total_quantity: Decimal,
    total_reserved: Decimal,
}

impl From<SummaryRow> for MaterialSummary {
    fn from(row: SummaryRow) -> Self {
        MaterialSummary {
            material_id: row.material_id,
            total_quantity: row.total_quantity,
            total_reserved: row.total_reserved,
            total_available: row.total_quantity - row.total_reserved,
        }
    }
}

#[async_trait]
impl StockRepository for SeaOrmStockRepository {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<stock::Model>, ServiceError> {
        stock::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_by_location(
        &self,
        location_id: Uuid,
    ) -> Result<Vec<stock::Model>, ServiceError> {
        stock::Entity::find()
            .filter(stock::Column::LocationId.eq(location_id))
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_by_material(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<stock::Model>, ServiceError> {
        stock::Entity::find()
            .filter(stock::Column::MaterialId.eq(material_id))
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_by_material_and_lot(
        &self,
        material_id: Uuid,
        lot_id: Uuid,
    ) -> Result<Vec<stock::Model>, ServiceError> {
        stock::Entity::find()
            .filter(stock::Column::MaterialId.eq(material_id))
            .filter(stock::Column::LotId.eq(lot_id))
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_by_location_material_lot(
        &self,
        location_id: Uuid,
        material_id: Uuid,
        lot_id: Option<Uuid>,
    ) -> Result<Option<stock::Model>, ServiceError> {
        find_row(&self.db, location_id, material_id, lot_id, false).await
    }

    async fn list(
        &self,
        filter: &StockFilter,
    ) -> Result<(Vec<stock::Model>, u64), ServiceError> {
        let mut query = stock::Entity::find();
        if let Some(id) = filter.warehouse_id {
            query = query.filter(stock::Column::WarehouseId.eq(id));
        }
        if let Some(id) = filter.zone_id {
            query = query.filter(stock::Column::ZoneId.eq(id));
        }
        if let Some(id) = filter.location_id {
            query = query.filter(stock::Column::LocationId.eq(id));
        }
        if let Some(id) = filter.material_id {
            query = query.filter(stock::Column::MaterialId.eq(id));
        }
        if let Some(id) = filter.lot_id {
            query = query.filter(stock::Column::LotId.eq(id));
        }
        if filter.has_stock {
            query = query.filter(stock::Column::Quantity.gt(Decimal::ZERO));
        }

        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let page = filter.page.max(1);
        let paginator = query
            .order_by_asc(stock::Column::MaterialId)
            .order_by_asc(stock::Column::LocationId)
            .paginate(&self.db, limit);
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;
        Ok((rows, total as u64))
    }

    async fn get_available_stock_fefo(
        &self,
        material_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<AvailableStock>, ServiceError> {
        fefo_candidates(&self.db, material_id, today, false).await
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
        let key = key.clone();
        let ctx = ctx.clone();
        let new_lot = new_lot.cloned();
        self.db
            .transaction::<_, (stock::Model, Option<lot::Model>, stock_movement::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let now = Utc::now();
                        let created = match &new_lot {
                            Some(spec) => {
                                let model = lot::ActiveModel {
                                    id: Set(Uuid::new_v4()),
                                    lot_number: Set(spec.lot_number.clone()),
                                    material_id: Set(spec.material_id),
                                    supplier_id: Set(spec.supplier_id),
                                    supplier_lot_number: Set(spec.supplier_lot_number.clone()),
                                    manufactured_date: Set(spec.manufactured_date),
                                    expiry_date: Set(spec.expiry_date),
                                    received_date: Set(spec.received_date),
                                    status: Set(LotStatus::Active.as_str().to_string()),
                                    qc_status: Set(QcStatus::Pending.as_str().to_string()),
                                    last_expiry_alert_days: Set(None),
                                    notes: Set(spec.notes.clone()),
                                    created_at: Set(now),
                                    updated_at: Set(now),
                                };
                                Some(model.insert(txn).await.map_err(ServiceError::db_error)?)
                            }
                            None => None,
                        };
                        let lot_id = created.as_ref().map(|l| l.id).or(key.lot_id);
                        let row =
                            find_row(txn, key.location_id, key.material_id, lot_id, true).await?;
                        let updated = match row {
                            Some(existing) => {
                                let quantity = existing.quantity + qty;
                                let reserved = existing.reserved_qty;
                                update_row_quantities(txn, existing, quantity, reserved, now)
                                    .await?
                            }
                            None => {
                                let fresh = stock::ActiveModel {
                                    id: Set(Uuid::new_v4()),
                                    warehouse_id: Set(key.warehouse_id),
                                    zone_id: Set(key.zone_id),
                                    location_id: Set(key.location_id),
                                    material_id: Set(key.material_id),
                                    lot_id: Set(lot_id),
                                    quantity: Set(qty),
                                    reserved_qty: Set(Decimal::ZERO),
                                    unit_id: Set(key.unit_id),
                                    created_at: Set(now),
                                    updated_at: Set(now),
                                };
                                fresh.insert(txn).await.map_err(ServiceError::db_error)?
                            }
                        };
                        let movement = insert_movement(
                            txn,
                            MovementType::In,
                            &ctx,
                            key.material_id,
                            lot_id,
                            None,
                            Some(key.location_id),
                            qty,
                            key.unit_id,
                            now,
                        )
                        .await?;
                        Ok((updated, created, movement))
                    })
                },
            )
            .await
            .map_err(map_txn_err)
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
        let key = key.clone();
        let ctx = ctx.clone();
        self.db
            .transaction::<_, (stock::Model, stock_movement::Model), ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let row = find_row(txn, key.location_id, key.material_id, key.lot_id, true)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "stock for material {} at location {}",
                                key.material_id, key.location_id
                            ))
                        })?;
                    if !row.can_issue(qty) {
                        return Err(ServiceError::InsufficientStock {
                            requested: qty,
                            available: row.available_qty(),
                        });
                    }
                    let quantity = row.quantity - qty;
                    let reserved = row.reserved_qty;
                    let updated =
                        update_row_quantities(txn, row, quantity, reserved, now).await?;
                    let movement = insert_movement(
                        txn,
                        MovementType::Out,
                        &ctx,
                        key.material_id,
                        key.lot_id,
                        Some(key.location_id),
                        None,
                        -qty,
                        key.unit_id,
                        now,
                    )
                    .await?;
                    Ok((updated, movement))
                })
            })
            .await
            .map_err(map_txn_err)
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
        let ctx = ctx.clone();
        self.db
            .transaction::<_, FefoIssue, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();

                    // Free the consumed part of the reservation first, so
                    // the allocator sees that quantity as available again.
                    let mut reservation = None;
                    if let Some(reservation_id) = consume_reservation {
                        let res = stock_reservation::Entity::find_by_id(reservation_id)
                            .one(txn)
                            .await
                            .map_err(ServiceError::db_error)?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "reservation {}",
                                    reservation_id
                                ))
                            })?;
                        if !res.is_active() {
                            return Err(ServiceError::InvalidStatus(format!(
                                "reservation {} is {}",
                                res.id, res.status
                            )));
                        }
                        if res.material_id != material_id {
                            return Err(ServiceError::ValidationError(format!(
                                "reservation {} is for a different material",
                                res.id
                            )));
                        }
                        let consumed = res.quantity.min(qty);
                        free_reserved(txn, material_id, consumed, now).await?;
                        reservation = Some((res, consumed));
                    }

                    let candidates = fefo_candidates(txn, material_id, today, true).await?;
                    let plan = plan_fefo(&candidates, qty)?;

                    let mut movements = Vec::with_capacity(plan.len());
                    let mut lots_issued = Vec::with_capacity(plan.len());
                    for allocation in &plan {
                        let candidate = candidates
                            .iter()
                            .find(|c| c.stock.id == allocation.stock_id)
                            .ok_or_else(|| {
                                ServiceError::InternalError(
                                    "allocated row missing from candidates".to_string(),
                                )
                            })?;
                        let quantity = candidate.stock.quantity - allocation.take;
                        let reserved = candidate.stock.reserved_qty;
                        update_row_quantities(
                            txn,
                            candidate.stock.clone(),
                            quantity,
                            reserved,
                            now,
                        )
                        .await?;
                        let movement = insert_movement(
                            txn,
                            MovementType::Out,
                            &ctx,
                            material_id,
                            Some(allocation.lot_id),
                            Some(allocation.location_id),
                            None,
                            -allocation.take,
                            unit_id,
                            now,
                        )
                        .await?;
                        movements.push(movement);
                        lots_issued.push(LotIssued {
                            lot_id: allocation.lot_id,
                            lot_number: candidate.lot.lot_number.clone(),
                            quantity: allocation.take,
                            expiry_date: candidate.lot.expiry_date,
                            location_id: allocation.location_id,
                        });
                    }

                    if let Some((res, consumed)) = reservation {
                        let remaining = res.quantity - consumed;
                        let mut active: stock_reservation::ActiveModel = res.into();
                        active.quantity = Set(remaining);
                        if remaining <= Decimal::ZERO {
                            active.status =
                                Set(ReservationStatus::Fulfilled.as_str().to_string());
                            active.released_at = Set(Some(now));
                        }
                        active.update(txn).await.map_err(ServiceError::db_error)?;
                    }

                    Ok(FefoIssue {
                        movements,
                        lots_issued,
                    })
                })
            })
            .await
            .map_err(map_txn_err)
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
        let from = from.clone();
        let ctx = ctx.clone();
        self.db
            .transaction::<_, (stock::Model, stock::Model, stock_movement::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let now = Utc::now();
                        let source =
                            find_row(txn, from.location_id, from.material_id, from.lot_id, true)
                                .await?
                                .ok_or_else(|| {
                                    ServiceError::NotFound(format!(
                                        "stock for material {} at location {}",
                                        from.material_id, from.location_id
                                    ))
                                })?;
                        if !source.can_issue(qty) {
                            return Err(ServiceError::InsufficientStock {
                                requested: qty,
                                available: source.available_qty(),
                            });
                        }
                        let src_qty = source.quantity - qty;
                        let src_reserved = source.reserved_qty;
                        let warehouse_id = source.warehouse_id;
                        let zone_id = source.zone_id;
                        let source =
                            update_row_quantities(txn, source, src_qty, src_reserved, now)
                                .await?;

                        let dest =
                            find_row(txn, to_location_id, from.material_id, from.lot_id, true).await?;
                        let dest = match dest {
                            Some(existing) => {
                                let quantity = existing.quantity + qty;
                                let reserved = existing.reserved_qty;
                                update_row_quantities(txn, existing, quantity, reserved, now)
                                    .await?
                            }
                            None => {
                                let fresh = stock::ActiveModel {
                                    id: Set(Uuid::new_v4()),
                                    warehouse_id: Set(warehouse_id),
                                    zone_id: Set(zone_id),
                                    location_id: Set(to_location_id),
                                    material_id: Set(from.material_id),
                                    lot_id: Set(from.lot_id),
                                    quantity: Set(qty),
                                    reserved_qty: Set(Decimal::ZERO),
                                    unit_id: Set(from.unit_id),
                                    created_at: Set(now),
                                    updated_at: Set(now),
                                };
                                fresh.insert(txn).await.map_err(ServiceError::db_error)?
                            }
                        };

                        let movement = insert_movement(
                            txn,
                            MovementType::Transfer,
                            &ctx,
                            from.material_id,
                            from.lot_id,
                            Some(from.location_id),
                            Some(to_location_id),
                            qty,
                            from.unit_id,
                            now,
                        )
                        .await?;
                        Ok((source, dest, movement))
                    })
                },
            )
            .await
            .map_err(map_txn_err)
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
        let key = key.clone();
        let ctx = ctx.clone();
        self.db
            .transaction::<_, (stock::Model, stock_movement::Model), ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let row = find_row(txn, key.location_id, key.material_id, key.lot_id, true).await?;
                    let updated = match row {
                        Some(existing) => {
                            let quantity = existing.quantity + delta;
                            if quantity < Decimal::ZERO {
                                return Err(ServiceError::InvalidQuantity(format!(
                                    "adjustment would drive quantity negative ({} {})",
                                    existing.quantity, delta
                                )));
                            }
                            let reserved = existing.reserved_qty;
                            update_row_quantities(txn, existing, quantity, reserved, now).await?
                        }
                        None => {
                            if delta < Decimal::ZERO {
                                return Err(ServiceError::NotFound(format!(
                                    "stock for material {} at location {}",
                                    key.material_id, key.location_id
                                )));
                            }
                            let fresh = stock::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                warehouse_id: Set(key.warehouse_id),
                                zone_id: Set(key.zone_id),
                                location_id: Set(key.location_id),
                                material_id: Set(key.material_id),
                                lot_id: Set(key.lot_id),
                                quantity: Set(delta),
                                reserved_qty: Set(Decimal::ZERO),
                                unit_id: Set(key.unit_id),
                                created_at: Set(now),
                                updated_at: Set(now),
                            };
                            fresh.insert(txn).await.map_err(ServiceError::db_error)?
                        }
                    };
                    let (from_loc, to_loc) = if delta < Decimal::ZERO {
                        (Some(key.location_id), None)
                    } else {
                        (None, Some(key.location_id))
                    };
                    let movement = insert_movement(
                        txn,
                        MovementType::Adjustment,
                        &ctx,
                        key.material_id,
                        key.lot_id,
                        from_loc,
                        to_loc,
                        delta,
                        key.unit_id,
                        now,
                    )
                    .await?;
                    Ok((updated, movement))
                })
            })
            .await
            .map_err(map_txn_err)
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
        let reservation = reservation.clone();
        self.db
            .transaction::<_, stock_reservation::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let candidates =
                        fefo_candidates(txn, reservation.material_id, today, true).await?;
                    let available: Decimal =
                        candidates.iter().map(|c| c.available_qty()).sum();
                    if available < reservation.quantity {
                        return Err(ServiceError::InsufficientStock {
                            requested: reservation.quantity,
                            available,
                        });
                    }

                    // Pin the reserved quantity onto rows in FEFO order so
                    // row-level available stays consistent with the hold.
                    let mut remaining = reservation.quantity;
                    for candidate in candidates {
                        if remaining <= Decimal::ZERO {
                            break;
                        }
                        let take = candidate.available_qty().min(remaining);
                        let quantity = candidate.stock.quantity;
                        let reserved = candidate.stock.reserved_qty + take;
                        update_row_quantities(txn, candidate.stock, quantity, reserved, now)
                            .await?;
                        remaining -= take;
                    }

                    let model = stock_reservation::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        material_id: Set(reservation.material_id),
                        quantity: Set(reservation.quantity),
                        unit_id: Set(reservation.unit_id),
                        reservation_type: Set(reservation
                            .reservation_type
                            .as_str()
                            .to_string()),
                        reference_id: Set(reservation.reference_id),
                        reference_number: Set(reservation.reference_number.clone()),
                        status: Set(ReservationStatus::Active.as_str().to_string()),
                        expires_at: Set(reservation.expires_at),
                        created_by: Set(reservation.created_by),
                        created_at: Set(now),
                        released_at: Set(None),
                    };
                    model.insert(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(map_txn_err)
    }

    async fn release_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<stock_reservation::Model, ServiceError> {
        self.db
            .transaction::<_, stock_reservation::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    settle_reservation(txn, reservation_id, ReservationStatus::Released, Utc::now())
                        .await
                })
            })
            .await
            .map_err(map_txn_err)
    }

    async fn expire_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<stock_reservation::Model, ServiceError> {
        self.db
            .transaction::<_, stock_reservation::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    settle_reservation(txn, reservation_id, ReservationStatus::Expired, Utc::now())
                        .await
                })
            })
            .await
            .map_err(map_txn_err)
    }

    async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<stock_reservation::Model>, ServiceError> {
        stock_reservation::Entity::find_by_id(reservation_id)
            .one(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<stock_reservation::Model>, ServiceError> {
        stock_reservation::Entity::find()
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active.as_str()))
            .filter(stock_reservation::Column::ExpiresAt.is_not_null())
            .filter(stock_reservation::Column::ExpiresAt.lt(now))
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_material_summary(
        &self,
        material_id: Uuid,
    ) -> Result<MaterialSummary, ServiceError> {
        let row = stock::Entity::find()
            .select_only()
            .column(stock::Column::MaterialId)
            .column_as(stock::Column::Quantity.sum(), "total_quantity")
            .column_as(stock::Column::ReservedQty.sum(), "total_reserved")
            .filter(stock::Column::MaterialId.eq(material_id))
            .group_by(stock::Column::MaterialId)
            .into_model::<SummaryRow>()
            .one(&self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(row.map(MaterialSummary::from).unwrap_or(MaterialSummary {
            material_id,
            total_quantity: Decimal::ZERO,
            total_reserved: Decimal::ZERO,
            total_available: Decimal::ZERO,
        }))
    }

    async fn get_low_stock_materials(
        &self,
        threshold: Decimal,
    ) -> Result<Vec<MaterialSummary>, ServiceError> {
        let rows = stock::Entity::find()
            .select_only()
            .column(stock::Column::MaterialId)
            .column_as(stock::Column::Quantity.sum(), "total_quantity")
            .column_as(stock::Column::ReservedQty.sum(), "total_reserved")
            .group_by(stock::Column::MaterialId)
            .into_model::<SummaryRow>()
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(rows
            .into_iter()
            .map(MaterialSummary::from)
            .filter(|s| s.total_available < threshold)
            .collect())
    }

    async fn get_expiring_stock(
        &self,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<AvailableStock>, ServiceError> {
        let horizon = today + Duration::days(days);
        let rows = stock::Entity::find()
            .filter(stock::Column::LotId.is_not_null())
            .filter(stock::Column::Quantity.gt(Decimal::ZERO))
            .find_also_related(lot::Entity)
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)?;
        let mut result: Vec<AvailableStock> = rows
            .into_iter()
            .filter_map(|(row, maybe_lot)| {
                maybe_lot.map(|l| AvailableStock { stock: row, lot: l })
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
        stock_movement::Entity::find()
            .filter(stock_movement::Column::LotId.eq(lot_id))
            .order_by_asc(stock_movement::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_movements_by_material(
        &self,
        material_id: Uuid,
        limit: u64,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        stock_movement::Entity::find()
            .filter(stock_movement::Column::MaterialId.eq(material_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }
}
