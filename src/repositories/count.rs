//! SeaORM-backed inventory count repository.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::entities::{inventory_count, inventory_count_line_item};
use crate::errors::ServiceError;

use super::stock::next_sequence;
use super::{format_count_number, CountFilter, InventoryCountRepository};

#[derive(Clone, Debug)]
pub struct SeaOrmInventoryCountRepository {
    db: DatabaseConnection,
}

impl SeaOrmInventoryCountRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn map_txn_err(e: sea_orm::TransactionError<ServiceError>) -> ServiceError {
    match e {
        sea_orm::TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
        sea_orm::TransactionError::Transaction(service_err) => service_err,
    }
}

fn count_active(model: &inventory_count::Model) -> inventory_count::ActiveModel {
    inventory_count::ActiveModel {
        id: sea_orm::Unchanged(model.id),
        count_number: Set(model.count_number.clone()),
        count_date: Set(model.count_date),
        count_type: Set(model.count_type.clone()),
        warehouse_id: Set(model.warehouse_id),
        zone_id: Set(model.zone_id),
        status: Set(model.status.clone()),
        notes: Set(model.notes.clone()),
        started_at: Set(model.started_at),
        completed_at: Set(model.completed_at),
        created_by: Set(model.created_by),
        approved_by: Set(model.approved_by),
        created_at: sea_orm::Unchanged(model.created_at),
        updated_at: Set(Utc::now()),
    }
}

fn line_active(
    line: &inventory_count_line_item::Model,
) -> inventory_count_line_item::ActiveModel {
    inventory_count_line_item::ActiveModel {
        id: sea_orm::Unchanged(line.id),
        inventory_count_id: Set(line.inventory_count_id),
        location_id: Set(line.location_id),
        material_id: Set(line.material_id),
        lot_id: Set(line.lot_id),
        unit_id: Set(line.unit_id),
        system_qty: Set(line.system_qty),
        counted_qty: Set(line.counted_qty),
        variance: Set(line.variance),
        is_counted: Set(line.is_counted),
        counted_by: Set(line.counted_by),
        counted_at: Set(line.counted_at),
        notes: Set(line.notes.clone()),
        created_at: sea_orm::Unchanged(line.created_at),
    }
}

#[async_trait]
impl InventoryCountRepository for SeaOrmInventoryCountRepository {
    async fn create(
        &self,
        count: &inventory_count::Model,
        lines: &[inventory_count_line_item::Model],
    ) -> Result<(), ServiceError> {
        let count = count.clone();
        let lines = lines.to_vec();
        self.db
            .transaction::<_, (), ServiceError>(move |txn| {
                Box::pin(async move {
                    let header = inventory_count::ActiveModel {
                        id: Set(count.id),
                        count_number: Set(count.count_number.clone()),
                        count_date: Set(count.count_date),
                        count_type: Set(count.count_type.clone()),
                        warehouse_id: Set(count.warehouse_id),
                        zone_id: Set(count.zone_id),
                        status: Set(count.status.clone()),
                        notes: Set(count.notes.clone()),
                        started_at: Set(count.started_at),
                        completed_at: Set(count.completed_at),
                        created_by: Set(count.created_by),
                        approved_by: Set(count.approved_by),
                        created_at: Set(count.created_at),
                        updated_at: Set(count.updated_at),
                    };
                    header.insert(txn).await.map_err(ServiceError::db_error)?;

                    for line in &lines {
                        let model = inventory_count_line_item::ActiveModel {
                            id: Set(line.id),
                            inventory_count_id: Set(line.inventory_count_id),
                            location_id: Set(line.location_id),
                            material_id: Set(line.material_id),
                            lot_id: Set(line.lot_id),
                            unit_id: Set(line.unit_id),
                            system_qty: Set(line.system_qty),
                            counted_qty: Set(line.counted_qty),
                            variance: Set(line.variance),
                            is_counted: Set(line.is_counted),
                            counted_by: Set(line.counted_by),
                            counted_at: Set(line.counted_at),
                            notes: Set(line.notes.clone()),
                            created_at: Set(line.created_at),
                        };
                        model.insert(txn).await.map_err(ServiceError::db_error)?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(map_txn_err)
    }

    async fn update(
        &self,
        count: &inventory_count::Model,
    ) -> Result<inventory_count::Model, ServiceError> {
        count_active(count)
            .update(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<inventory_count::Model>, ServiceError> {
        inventory_count::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn list(
        &self,
        filter: &CountFilter,
    ) -> Result<(Vec<inventory_count::Model>, u64), ServiceError> {
        let mut query = inventory_count::Entity::find();
        if let Some(id) = filter.warehouse_id {
            query = query.filter(inventory_count::Column::WarehouseId.eq(id));
        }
        if let Some(status) = &filter.status {
            query = query.filter(inventory_count::Column::Status.eq(status.clone()));
        }

        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let page = filter.page.max(1);
        let paginator = query
            .order_by_desc(inventory_count::Column::CreatedAt)
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

    async fn get_line_item(
        &self,
        line_item_id: Uuid,
    ) -> Result<Option<inventory_count_line_item::Model>, ServiceError> {
        inventory_count_line_item::Entity::find_by_id(line_item_id)
            .one(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_line_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError> {
        inventory_count_line_item::Entity::find()
            .filter(inventory_count_line_item::Column::InventoryCountId.eq(count_id))
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn update_line_item(
        &self,
        line: &inventory_count_line_item::Model,
    ) -> Result<inventory_count_line_item::Model, ServiceError> {
        line_active(line)
            .update(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_pending_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError> {
        inventory_count_line_item::Entity::find()
            .filter(inventory_count_line_item::Column::InventoryCountId.eq(count_id))
            .filter(inventory_count_line_item::Column::IsCounted.eq(false))
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_variance_items(
        &self,
        count_id: Uuid,
    ) -> Result<Vec<inventory_count_line_item::Model>, ServiceError> {
        inventory_count_line_item::Entity::find()
            .filter(inventory_count_line_item::Column::InventoryCountId.eq(count_id))
            .filter(inventory_count_line_item::Column::IsCounted.eq(true))
            .filter(inventory_count_line_item::Column::Variance.ne(Decimal::ZERO))
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn next_count_number(&self, today: NaiveDate) -> Result<String, ServiceError> {
        let year = today.year();
        self.db
            .transaction::<_, String, ServiceError>(move |txn| {
                Box::pin(async move {
                    let seq = next_sequence(txn, &format!("count:{}", year)).await?;
                    Ok(format_count_number(year, seq))
                })
            })
            .await
            .map_err(map_txn_err)
    }
}
