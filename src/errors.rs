use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Central error type for the stock ledger and its services.
///
/// The domain arms are what API callers branch on: "not enough stock" is
/// retryable later, "bad request" is permanent, "not found" is permanent.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Pending items: {0}")]
    PendingItems(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Helper to convert database errors consistently.
    pub fn db_error(err: sea_orm::error::DbErr) -> Self {
        ServiceError::DatabaseError(err)
    }

    /// Stable machine-readable code, used in logs and event payloads.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::DatabaseError(_) => ErrorKind::Database,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            ServiceError::InvalidQuantity(_) => ErrorKind::InvalidQuantity,
            ServiceError::InvalidStatus(_) => ErrorKind::InvalidStatus,
            ServiceError::PendingItems(_) => ErrorKind::PendingItems,
            ServiceError::ValidationError(_) => ErrorKind::Validation,
            ServiceError::EventError(_) => ErrorKind::Event,
            ServiceError::ConcurrentModification(_) => ErrorKind::Conflict,
            ServiceError::InternalError(_) => ErrorKind::Internal,
        }
    }
}

/// Machine-readable error categories surfaced to transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Database,
    NotFound,
    InsufficientStock,
    InvalidQuantity,
    InvalidStatus,
    PendingItems,
    Validation,
    Event,
    Conflict,
    Internal,
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_distinguishes_retryable_from_permanent() {
        assert_eq!(
            ServiceError::InsufficientStock {
                requested: rust_decimal_macros::dec!(5),
                available: rust_decimal_macros::dec!(2),
            }
            .kind(),
            ErrorKind::InsufficientStock
        );
        assert_eq!(
            ServiceError::InvalidQuantity("qty must be positive".into()).kind(),
            ErrorKind::InvalidQuantity
        );
        assert_eq!(
            ServiceError::NotFound("lot".into()).kind(),
            ErrorKind::NotFound
        );
    }
}
