//! Order aggregate, lifecycle and service.

mod aggregate;
mod lifecycle;
mod service;

pub use aggregate::{OrderTotals, OrderView, generate_order_number};
pub use lifecycle::TransitionPlan;
pub use service::OrderService;

pub(crate) use service::hydrate;
