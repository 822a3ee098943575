use crate::event_sourcing::core::EsError;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order already exists")]
    AlreadyCreated,

    #[error("Order has not been created")]
    NotCreated,

    #[error("Order is already cancelled")]
    AlreadyCancelled,

    #[error("Order is already confirmed")]
    AlreadyConfirmed,

    #[error("Order must be confirmed before shipping")]
    NotConfirmed,

    #[error("Order must be shipped before delivery")]
    NotShipped,

    #[error("Cannot modify order in status: {0:?}")]
    InvalidStatusTransition(OrderStatus),

    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Tracking number cannot be empty")]
    MissingTrackingNumber,
}

impl From<OrderError> for EsError {
    fn from(err: OrderError) -> Self {
        EsError::Validation(err.to_string())
    }
}
