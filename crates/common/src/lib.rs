//! Shared types for the commerce backend.
//!
//! Typed identifiers keep user, product, order and address IDs from being
//! mixed up, and the status module holds the order lifecycle vocabulary that
//! both the storage layer and the domain layer speak.

pub mod status;
pub mod types;

pub use status::{AddressType, OrderStatus, ParseStatusError, PaymentMethod, PaymentStatus};
pub use types::{
    AddressId, CartId, CartItemId, OrderId, OrderItemId, ProductId, ShopId, UserId,
};
