use common::{OrderId, OrderStatus, ParseStatusError, ProductId};
use thiserror::Error;

/// Errors that can occur when interacting with the commerce store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A conditional stock decrement found less stock than requested.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i32,
        available: i32,
    },

    /// A stock quantity that is zero or negative reached the ledger.
    #[error("Invalid stock quantity: {0}")]
    InvalidQuantity(i32),

    /// Merging quantities would exceed the range of a stored quantity.
    #[error("Quantity overflow adding {0}")]
    QuantityOverflow(i32),

    /// A compare-and-set on an order's status lost against a concurrent writer.
    #[error("Order {order_id} is {actual}, expected {expected}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// A unique constraint rejected the write.
    #[error("Duplicate {0}")]
    Duplicate(String),

    /// A stored enum column held an unknown value.
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] ParseStatusError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
