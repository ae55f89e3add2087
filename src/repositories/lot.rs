//! SeaORM-backed lot repository.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::entities::lot::{self, LotStatus, QcStatus};
use crate::errors::ServiceError;

use super::stock::next_sequence;
use super::{format_lot_number, LotRepository};

#[derive(Clone, Debug)]
pub struct SeaOrmLotRepository {
    db: DatabaseConnection,
}

impl SeaOrmLotRepository {
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

#[async_trait]
impl LotRepository for SeaOrmLotRepository {
    async fn update(&self, updated: &lot::Model) -> Result<lot::Model, ServiceError> {
        let active = lot::ActiveModel {
            id: sea_orm::Unchanged(updated.id),
            lot_number: Set(updated.lot_number.clone()),
            material_id: Set(updated.material_id),
            supplier_id: Set(updated.supplier_id),
            supplier_lot_number: Set(updated.supplier_lot_number.clone()),
            manufactured_date: Set(updated.manufactured_date),
            expiry_date: Set(updated.expiry_date),
            received_date: Set(updated.received_date),
            status: Set(updated.status.clone()),
            qc_status: Set(updated.qc_status.clone()),
            last_expiry_alert_days: Set(updated.last_expiry_alert_days),
            notes: Set(updated.notes.clone()),
            created_at: sea_orm::Unchanged(updated.created_at),
            updated_at: Set(Utc::now()),
        };
        active.update(&self.db).await.map_err(ServiceError::db_error)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<lot::Model>, ServiceError> {
        lot::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_by_lot_number(
        &self,
        lot_number: &str,
    ) -> Result<Option<lot::Model>, ServiceError> {
        lot::Entity::find()
            .filter(lot::Column::LotNumber.eq(lot_number))
            .one(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_available_lots(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<lot::Model>, ServiceError> {
        lot::Entity::find()
            .filter(lot::Column::MaterialId.eq(material_id))
            .filter(lot::Column::Status.ne(LotStatus::Expired.as_str()))
            .filter(lot::Column::QcStatus.eq(QcStatus::Passed.as_str()))
            .order_by_asc(lot::Column::ExpiryDate)
            .order_by_asc(lot::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_expiring_lots(
        &self,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<lot::Model>, ServiceError> {
        let horizon = today + Duration::days(days);
        lot::Entity::find()
            .filter(lot::Column::Status.ne(LotStatus::Expired.as_str()))
            .filter(lot::Column::ExpiryDate.gt(today))
            .filter(lot::Column::ExpiryDate.lte(horizon))
            .order_by_asc(lot::Column::ExpiryDate)
            .order_by_asc(lot::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn get_expired_lots(&self, today: NaiveDate) -> Result<Vec<lot::Model>, ServiceError> {
        lot::Entity::find()
            .filter(lot::Column::Status.ne(LotStatus::Expired.as_str()))
            .filter(lot::Column::ExpiryDate.lte(today))
            .order_by_asc(lot::Column::ExpiryDate)
            .all(&self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn next_lot_number(&self, today: NaiveDate) -> Result<String, ServiceError> {
        let year_month = today.format("%Y%m").to_string();
        self.db
            .transaction::<_, String, ServiceError>(move |txn| {
                Box::pin(async move {
                    let seq = next_sequence(txn, &format!("lot:{}", year_month)).await?;
                    Ok(format_lot_number(&year_month, seq))
                })
            })
            .await
            .map_err(map_txn_err)
    }

    async fn mark_expired(&self, lot_ids: &[Uuid]) -> Result<u64, ServiceError> {
        if lot_ids.is_empty() {
            return Ok(0);
        }
        let result = lot::Entity::update_many()
            .col_expr(
                lot::Column::Status,
                sea_orm::sea_query::Expr::value(LotStatus::Expired.as_str()),
            )
            .col_expr(
                lot::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .filter(lot::Column::Id.is_in(lot_ids.to_vec()))
            .exec(&self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(result.rows_affected)
    }
}
