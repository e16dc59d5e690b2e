//! Domain layer for the commerce backend.
//!
//! This crate holds the business rules on top of the [`store`] traits:
//! - Vendor shops and product listings
//! - Cart editing and pricing
//! - Address management and inline address input
//! - The checkout orchestrator that turns a cart into an order
//! - Order reads and the order status state machine
//! - Mapping verified identities to local users and applying user sync events

pub mod address;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod error;
pub mod money;
pub mod order;
pub mod users;

pub use address::{AddressInput, AddressService};
pub use cart::{CartLineView, CartService, CartView};
pub use catalog::{CatalogService, ProductInput};
pub use checkout::{CheckoutService, CreateOrderRequest};
pub use error::{DomainError, ErrorKind};
pub use money::Money;
pub use order::{
    OrderService, OrderTotals, OrderView, TransitionPlan, generate_order_number,
};
pub use users::{SyncOutcome, UserDirectory, UserSyncEvent};
