//! Lot lifecycle: quality control decisions and lot queries. A lot enters
//! as QC Pending and cannot be issued until it passes; a failed lot stays
//! on hand (visible in stock) but is never picked by the allocator.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::lot::{self, QcStatus};
use crate::errors::ServiceError;
use crate::repositories::{LotRepository, StockRepository};

pub struct LotService {
    lot_repo: Arc<dyn LotRepository>,
    stock_repo: Arc<dyn StockRepository>,
}

impl LotService {
    pub fn new(lot_repo: Arc<dyn LotRepository>, stock_repo: Arc<dyn StockRepository>) -> Self {
        Self {
            lot_repo,
            stock_repo,
        }
    }

    pub async fn get_lot(&self, lot_id: Uuid) -> Result<lot::Model, ServiceError> {
        self.lot_repo
            .get_by_id(lot_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("lot {}", lot_id)))
    }

    pub async fn get_lot_by_number(&self, lot_number: &str) -> Result<lot::Model, ServiceError> {
        self.lot_repo
            .get_by_lot_number(lot_number)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("lot {}", lot_number)))
    }

    pub async fn get_available_lots(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<lot::Model>, ServiceError> {
        self.lot_repo.get_available_lots(material_id).await
    }

    pub async fn get_expiring_lots(&self, days: i64) -> Result<Vec<lot::Model>, ServiceError> {
        self.lot_repo
            .get_expiring_lots(days, Utc::now().date_naive())
            .await
    }

    /// On-hand quantity of a lot across all locations.
    pub async fn get_lot_quantity(&self, lot_id: Uuid) -> Result<Decimal, ServiceError> {
        let found = self.get_lot(lot_id).await?;
        let rows = self
            .stock_repo
            .get_by_material_and_lot(found.material_id, lot_id)
            .await?;
        Ok(rows.iter().map(|r| r.quantity).sum())
    }

    async fn set_qc_status(
        &self,
        lot_id: Uuid,
        target: QcStatus,
    ) -> Result<lot::Model, ServiceError> {
        let mut found = self.get_lot(lot_id).await?;
        match found.qc_status() {
            Some(QcStatus::Pending) => {}
            Some(current) => {
                return Err(ServiceError::InvalidStatus(format!(
                    "lot {} QC status is already {}",
                    found.lot_number,
                    current.as_str()
                )));
            }
            None => {
                return Err(ServiceError::InvalidStatus(format!(
                    "lot {} has unknown QC status {}",
                    found.lot_number, found.qc_status
                )));
            }
        }
        found.qc_status = target.as_str().to_string();
        self.lot_repo.update(&found).await
    }

    /// Marks a Pending lot as QC Passed, making it eligible for issue.
    #[instrument(skip(self))]
    pub async fn pass_qc(&self, lot_id: Uuid) -> Result<lot::Model, ServiceError> {
        let updated = self.set_qc_status(lot_id, QcStatus::Passed).await?;
        info!(lot_number = %updated.lot_number, "Lot passed QC");
        Ok(updated)
    }

    /// Marks a Pending lot as QC Failed. Its stock stays on hand for
    /// disposition but the allocator will never pick it.
    #[instrument(skip(self))]
    pub async fn fail_qc(&self, lot_id: Uuid) -> Result<lot::Model, ServiceError> {
        let updated = self.set_qc_status(lot_id, QcStatus::Failed).await?;
        info!(lot_number = %updated.lot_number, "Lot failed QC");
        Ok(updated)
    }
}

impl std::fmt::Debug for LotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LotService").finish_non_exhaustive()
    }
}
