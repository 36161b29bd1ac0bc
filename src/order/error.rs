//! Order error types

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Invalid order number: {0}")]
    InvalidNumber(String),

    #[error("Order number is owned by another user")]
    OwnedByAnotherUser,

    #[error("No orders for user")]
    NoOrders,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::InvalidNumber(_) => "INVALID_ORDER_NUMBER",
            OrderError::OwnedByAnotherUser => "ORDER_OWNED_BY_ANOTHER_USER",
            OrderError::NoOrders => "NO_ORDERS",
            OrderError::Store(_) => "STORE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            OrderError::InvalidNumber(_) => 422,
            OrderError::OwnedByAnotherUser => 409,
            OrderError::NoOrders => 204,
            OrderError::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            OrderError::OwnedByAnotherUser.code(),
            "ORDER_OWNED_BY_ANOTHER_USER"
        );
        assert_eq!(OrderError::NoOrders.http_status(), 204);
        assert_eq!(OrderError::OwnedByAnotherUser.http_status(), 409);
        assert_eq!(OrderError::InvalidNumber("x".into()).http_status(), 422);
        assert_eq!(
            OrderError::Store(StoreError::Backend("down".into())).http_status(),
            500
        );
    }
}
