//! Persistence for the commerce backend.
//!
//! The storage traits in [`store`] are implemented twice: [`InMemoryStore`]
//! for development and tests, and [`PostgresStore`] for production.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod records;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{ProductQuery, ProductSort};
pub use records::{
    AddressRecord, CartLine, CartRecord, CheckoutCommit, Milestone, OrderItemDetails,
    OrderItemRecord, OrderRecord, OrderSummary, PostalAddress, ProductRecord, Role, ShopRecord,
    StatusChange, UserRecord,
};
pub use store::{AddressStore, CartStore, CommerceStore, OrderStore, ProductStore, UserStore};
