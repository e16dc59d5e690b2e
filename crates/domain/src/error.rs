//! Domain error types.

use common::OrderStatus;
use store::StoreError;
use thiserror::Error;

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Absent, or not owned by the caller.
    NotFound,
    /// Malformed or missing input.
    Validation,
    /// The request is well-formed but conflicts with current state.
    Conflict,
    Internal,
}

/// Business-rule and persistence failures from the commerce services.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The identity is valid but has no local user record.
    #[error("User not found")]
    UserNotFound,

    #[error("{0}")]
    Validation(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {product_name} is no longer available")]
    ProductUnavailable { product_name: String },

    #[error("Insufficient stock for {product_name}: only {available} available, {requested} requested")]
    InsufficientStock {
        product_name: String,
        available: i32,
        requested: i32,
    },

    #[error("Cannot transition order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Shipping address is required: provide shipping_address_id or shipping_address")]
    MissingShippingAddress,

    #[error("Order cannot be cancelled while {status}")]
    NotCancellable { status: OrderStatus },

    #[error("Vendor already has a shop")]
    ShopAlreadyOpen,

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound { .. } | DomainError::UserNotFound => ErrorKind::NotFound,
            DomainError::Validation(_) | DomainError::MissingShippingAddress => {
                ErrorKind::Validation
            }
            DomainError::EmptyCart
            | DomainError::ProductUnavailable { .. }
            | DomainError::InsufficientStock { .. }
            | DomainError::InvalidTransition { .. }
            | DomainError::NotCancellable { .. }
            | DomainError::ShopAlreadyOpen => ErrorKind::Conflict,
            DomainError::Store(
                StoreError::InsufficientStock { .. }
                | StoreError::StatusConflict { .. }
                | StoreError::Duplicate(_),
            ) => ErrorKind::Conflict,
            DomainError::Store(_) | DomainError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Short machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "not_found",
            DomainError::UserNotFound => "user_not_found",
            DomainError::Validation(_) => "validation_error",
            DomainError::EmptyCart => "empty_cart",
            DomainError::ProductUnavailable { .. } => "product_unavailable",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::MissingShippingAddress => "missing_shipping_address",
            DomainError::NotCancellable { .. } => "not_cancellable",
            DomainError::ShopAlreadyOpen => "shop_exists",
            DomainError::Store(_) => match self.kind() {
                ErrorKind::Conflict => "conflict",
                _ => "internal_error",
            },
            DomainError::Internal(_) => "internal_error",
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => DomainError::NotFound { entity, id },
            StoreError::InvalidQuantity(quantity) => {
                DomainError::Validation(format!("quantity must be positive, got {quantity}"))
            }
            StoreError::QuantityOverflow(quantity) => {
                DomainError::Validation(format!("quantity {quantity} is too large"))
            }
            other => DomainError::Store(other),
        }
    }
}
