use async_trait::async_trait;
use common::{
    AddressId, CartId, CartItemId, OrderId, OrderStatus, PaymentStatus, ProductId, ShopId, UserId,
};

use crate::{
    AddressRecord, CartLine, CartRecord, CheckoutCommit, OrderItemDetails, OrderRecord,
    OrderSummary, PostalAddress, ProductQuery, ProductRecord, Result, ShopRecord, StatusChange,
    UserRecord,
};

/// Users mirrored from the identity provider.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user, or updates email and role if the external id is known.
    /// A deactivated user is reactivated.
    async fn upsert_user(&self, user: UserRecord) -> Result<UserRecord>;

    /// Finds an active user.
    async fn find_user_by_external_id(&self, external_id: &str) -> Result<Option<UserRecord>>;

    /// Soft-deletes a user so it no longer resolves. Orders keep their owner.
    ///
    /// Returns false if no active user had that external id.
    async fn deactivate_user(&self, external_id: &str) -> Result<bool>;
}

/// Shops, products and the stock ledger.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Fails with `Duplicate` if the vendor already runs a shop.
    async fn insert_shop(&self, shop: ShopRecord) -> Result<()>;

    /// Returns the shop run by a vendor, if any.
    async fn shop_for_vendor(&self, vendor_id: UserId) -> Result<Option<ShopRecord>>;

    async fn insert_product(&self, product: ProductRecord) -> Result<()>;

    async fn get_product(&self, product_id: ProductId) -> Result<Option<ProductRecord>>;

    /// Lists active products matching the query, first page first.
    async fn list_products(&self, query: ProductQuery) -> Result<Vec<ProductRecord>>;

    /// Decrements stock only if at least `quantity` is available.
    ///
    /// Fails with `InsufficientStock` without touching the row otherwise.
    async fn reserve_stock(&self, product_id: ProductId, quantity: i32) -> Result<()>;

    /// Increments stock unconditionally.
    async fn release_stock(&self, product_id: ProductId, quantity: i32) -> Result<()>;
}

/// One cart per user.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the user's cart, creating it on first use.
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<CartRecord>;

    async fn find_cart(&self, user_id: UserId) -> Result<Option<CartRecord>>;

    /// Lines in insertion order, hydrated with current product data.
    async fn cart_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>>;

    /// Returns a line only if it belongs to the given cart.
    async fn cart_line(&self, cart_id: CartId, item_id: CartItemId) -> Result<Option<CartLine>>;

    /// Adds `quantity` to the product's line, creating the line if needed.
    async fn upsert_cart_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItemId>;

    async fn set_cart_item_quantity(&self, item_id: CartItemId, quantity: i32) -> Result<()>;

    async fn remove_cart_item(&self, item_id: CartItemId) -> Result<()>;

    /// Removes every line but keeps the cart.
    async fn clear_cart(&self, cart_id: CartId) -> Result<()>;
}

/// Saved shipping and billing addresses.
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Default address first, then newest first.
    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<AddressRecord>>;

    async fn get_address(&self, address_id: AddressId) -> Result<Option<AddressRecord>>;

    async fn default_address(&self, user_id: UserId) -> Result<Option<AddressRecord>>;

    /// Inserts an address. A default address demotes the user's other defaults.
    async fn insert_address(&self, address: AddressRecord) -> Result<()>;

    /// Replaces the postal fields of an address.
    async fn update_address(
        &self,
        address_id: AddressId,
        postal: PostalAddress,
    ) -> Result<AddressRecord>;

    async fn delete_address(&self, address_id: AddressId) -> Result<()>;

    /// Makes one address the user's only default.
    async fn set_default_address(&self, user_id: UserId, address_id: AddressId) -> Result<()>;
}

/// Orders and their frozen items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>>;

    /// Newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<OrderSummary>>;

    /// Orders with at least one item sold by the shop, newest first.
    async fn list_orders_for_shop(&self, shop_id: ShopId) -> Result<Vec<OrderSummary>>;

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItemDetails>>;

    async fn order_contains_shop(&self, order_id: OrderId, shop_id: ShopId) -> Result<bool>;

    /// Records the gateway session issued for an order.
    async fn set_payment_session(&self, order_id: OrderId, session_id: &str) -> Result<()>;

    async fn find_order_by_payment_session(&self, session_id: &str)
    -> Result<Option<OrderRecord>>;

    /// Applies a status change if the order is still in `change.from`.
    ///
    /// Fails with `StatusConflict` if a concurrent writer moved it first.
    async fn apply_status_change(&self, change: StatusChange) -> Result<OrderRecord>;

    async fn set_payment_status(
        &self,
        order_id: OrderId,
        payment_status: PaymentStatus,
    ) -> Result<OrderRecord>;
}

/// The full store, including the multi-entity writes that must be atomic.
#[async_trait]
pub trait CommerceStore:
    UserStore + ProductStore + CartStore + AddressStore + OrderStore
{
    /// Writes addresses, the order and its items, reserves stock for every
    /// item and clears the cart. Either everything applies or nothing does.
    async fn commit_checkout(&self, commit: CheckoutCommit) -> Result<OrderRecord>;

    /// Releases stock for every item and marks the order cancelled, if the
    /// order is still in `expected`. Either everything applies or nothing does.
    async fn commit_cancellation(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
    ) -> Result<OrderRecord>;
}
