//! Reservations: material-level holds against available stock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::stock_reservation::{self, ReservationType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{NewReservation, StockRepository};

#[derive(Debug, Clone, Validate)]
pub struct ReserveStockInput {
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub unit_id: Uuid,
    pub reservation_type: ReservationType,
    pub reference_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub reference_number: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
}

pub struct ReservationService {
    stock_repo: Arc<dyn StockRepository>,
    event_sender: EventSender,
}

impl ReservationService {
    pub fn new(stock_repo: Arc<dyn StockRepository>, event_sender: EventSender) -> Self {
        Self {
            stock_repo,
            event_sender,
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }

    /// Places a hold on future available quantity. The availability check
    /// and the hold are one atomic repository operation, so two concurrent
    /// reservations can never double-book the same stock.
    #[instrument(skip(self, input), fields(material_id = %input.material_id, quantity = %input.quantity))]
    pub async fn reserve_stock(
        &self,
        input: ReserveStockInput,
    ) -> Result<stock_reservation::Model, ServiceError> {
        input.validate()?;
        let today = Utc::now().date_naive();
        let reservation = self
            .stock_repo
            .reserve_stock(
                &NewReservation {
                    material_id: input.material_id,
                    quantity: input.quantity,
                    unit_id: input.unit_id,
                    reservation_type: input.reservation_type,
                    reference_id: input.reference_id,
                    reference_number: input.reference_number.clone(),
                    expires_at: input.expires_at,
                    created_by: input.created_by,
                },
                today,
            )
            .await?;

        info!(reservation_id = %reservation.id, "Stock reserved");
        self.publish(Event::StockReserved {
            reservation_id: reservation.id,
            material_id: reservation.material_id,
            quantity: reservation.quantity,
            reservation_type: reservation.reservation_type.clone(),
            reference_id: reservation.reference_id,
        })
        .await;
        Ok(reservation)
    }

    /// Releases an Active reservation, returning its hold to available.
    /// Idempotent: a terminal reservation is returned unchanged and no
    /// event is published.
    #[instrument(skip(self))]
    pub async fn release_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<stock_reservation::Model, ServiceError> {
        let before = self
            .stock_repo
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("reservation {}", reservation_id)))?;
        let was_active = before.is_active();

        let released = self.stock_repo.release_reservation(reservation_id).await?;
        if was_active {
            info!(reservation_id = %released.id, "Reservation released");
            self.publish(Event::ReservationReleased {
                reservation_id: released.id,
                material_id: released.material_id,
                quantity: before.quantity,
            })
            .await;
        }
        Ok(released)
    }

    pub async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<stock_reservation::Model, ServiceError> {
        self.stock_repo
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("reservation {}", reservation_id)))
    }

    /// Expires Active reservations whose TTL has passed, freeing their
    /// holds. Returns how many were expired.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, ServiceError> {
        let expired = self.stock_repo.get_expired_reservations(now).await?;
        let mut count = 0;
        for reservation in expired {
            match self.stock_repo.expire_reservation(reservation.id).await {
                Ok(settled) => {
                    count += 1;
                    self.publish(Event::ReservationReleased {
                        reservation_id: settled.id,
                        material_id: settled.material_id,
                        quantity: reservation.quantity,
                    })
                    .await;
                }
                Err(e) => {
                    warn!(reservation_id = %reservation.id, error = %e, "Failed to expire reservation");
                }
            }
        }
        if count > 0 {
            info!(count, "Expired reservations cleaned up");
        }
        Ok(count)
    }
}

impl std::fmt::Debug for ReservationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationService").finish_non_exhaustive()
    }
}
