use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    AddressId, CartId, CartItemId, OrderId, OrderStatus, PaymentStatus, ProductId, ShopId, UserId,
};
use tokio::sync::RwLock;

use crate::{
    AddressRecord, CartLine, CartRecord, CheckoutCommit, Milestone, OrderItemDetails,
    OrderItemRecord, OrderRecord, OrderSummary, PostalAddress, ProductQuery, ProductRecord,
    ProductSort, Result, ShopRecord, StatusChange, StoreError, UserRecord,
    store::{AddressStore, CartStore, CommerceStore, OrderStore, ProductStore, UserStore},
};

#[derive(Debug, Clone)]
struct CartItemRow {
    id: CartItemId,
    cart_id: CartId,
    product_id: ProductId,
    quantity: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserRecord>,
    deactivated: HashSet<UserId>,
    shops: HashMap<ShopId, ShopRecord>,
    products: HashMap<ProductId, ProductRecord>,
    carts: HashMap<CartId, CartRecord>,
    cart_items: Vec<CartItemRow>,
    addresses: HashMap<AddressId, AddressRecord>,
    orders: HashMap<OrderId, OrderRecord>,
    order_items: Vec<OrderItemRecord>,
}

impl State {
    fn hydrate_line(&self, row: &CartItemRow) -> Option<CartLine> {
        let product = self.products.get(&row.product_id)?;
        let shop_name = self
            .shops
            .get(&product.shop_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();

        Some(CartLine {
            id: row.id,
            cart_id: row.cart_id,
            product_id: product.id,
            product_name: product.name.clone(),
            product_sku: product.sku.clone(),
            product_price: product.price,
            stock_quantity: product.stock_quantity,
            is_active: product.is_active,
            shop_id: product.shop_id,
            shop_name,
            quantity: row.quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Checks that every `(product, quantity)` can be reserved at once.
    fn check_reservations(&self, wanted: &[(ProductId, i32)]) -> Result<()> {
        let mut totals: HashMap<ProductId, i32> = HashMap::new();
        for (product_id, quantity) in wanted {
            if *quantity <= 0 {
                return Err(StoreError::InvalidQuantity(*quantity));
            }
            let total = totals.entry(*product_id).or_default();
            *total = total
                .checked_add(*quantity)
                .ok_or(StoreError::QuantityOverflow(*quantity))?;
        }

        for (product_id, requested) in totals {
            let product = self
                .products
                .get(&product_id)
                .ok_or_else(|| StoreError::not_found("product", product_id))?;
            if product.stock_quantity < requested {
                return Err(StoreError::InsufficientStock {
                    product_id,
                    requested,
                    available: product.stock_quantity,
                });
            }
        }
        Ok(())
    }

    fn adjust_stock(&mut self, product_id: ProductId, delta: i32, at: DateTime<Utc>) -> Result<()> {
        let product = self
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::not_found("product", product_id))?;
        product.stock_quantity = product
            .stock_quantity
            .checked_add(delta)
            .ok_or(StoreError::QuantityOverflow(delta))?;
        product.updated_at = at;
        Ok(())
    }

    fn unset_defaults(&mut self, user_id: UserId) {
        for address in self.addresses.values_mut() {
            if address.user_id == user_id {
                address.is_default = false;
            }
        }
    }

    fn summarize(&self, order: &OrderRecord) -> OrderSummary {
        let item_count = self
            .order_items
            .iter()
            .filter(|i| i.order_id == order.id)
            .count() as i64;

        OrderSummary {
            id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment_status,
            item_count,
            total: order.total,
            created_at: order.created_at,
        }
    }

    fn summaries<'a>(&self, orders: impl Iterator<Item = &'a OrderRecord>) -> Vec<OrderSummary> {
        let mut summaries: Vec<_> = orders.map(|o| self.summarize(o)).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }
}

/// In-memory commerce store for development and tests.
///
/// All collections sit behind one lock, so multi-entity commits hold the
/// write lock for their whole duration and are atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn upsert_user(&self, user: UserRecord) -> Result<UserRecord> {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .users
            .values_mut()
            .find(|u| u.external_id == user.external_id)
        {
            existing.email = user.email;
            existing.role = user.role;
            let existing = existing.clone();
            state.deactivated.remove(&existing.id);
            return Ok(existing);
        }

        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> Result<Option<UserRecord>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.external_id == external_id && !state.deactivated.contains(&u.id))
            .cloned())
    }

    async fn deactivate_user(&self, external_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(user_id) = state
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .map(|u| u.id)
        else {
            return Ok(false);
        };
        Ok(state.deactivated.insert(user_id))
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn insert_shop(&self, shop: ShopRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state.shops.values().any(|s| s.vendor_id == shop.vendor_id) {
            return Err(StoreError::Duplicate(format!(
                "shop for vendor {}",
                shop.vendor_id
            )));
        }
        state.shops.insert(shop.id, shop);
        Ok(())
    }

    async fn shop_for_vendor(&self, vendor_id: UserId) -> Result<Option<ShopRecord>> {
        let state = self.state.read().await;
        Ok(state
            .shops
            .values()
            .find(|s| s.vendor_id == vendor_id)
            .cloned())
    }

    async fn insert_product(&self, product: ProductRecord) -> Result<()> {
        if product.stock_quantity < 0 {
            return Err(StoreError::InvalidQuantity(product.stock_quantity));
        }
        let mut state = self.state.write().await;
        state.products.insert(product.id, product);
        Ok(())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<ProductRecord>> {
        let state = self.state.read().await;
        Ok(state.products.get(&product_id).cloned())
    }

    async fn list_products(&self, query: ProductQuery) -> Result<Vec<ProductRecord>> {
        let state = self.state.read().await;
        let search = query.search.as_ref().map(|s| s.to_lowercase());

        let mut products: Vec<_> = state
            .products
            .values()
            .filter(|p| {
                if !p.is_active {
                    return false;
                }
                if let Some(ref text) = search
                    && !p.name.to_lowercase().contains(text)
                {
                    return false;
                }
                if let Some(min) = query.min_price
                    && p.price < min
                {
                    return false;
                }
                if let Some(max) = query.max_price
                    && p.price > max
                {
                    return false;
                }
                if let Some(shop_id) = query.shop_id
                    && p.shop_id != shop_id
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        match query.sort {
            ProductSort::Newest => products.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            ProductSort::PriceAsc => products.sort_by(|a, b| a.price.cmp(&b.price)),
            ProductSort::PriceDesc => products.sort_by(|a, b| b.price.cmp(&a.price)),
            ProductSort::Name => products.sort_by(|a, b| a.name.cmp(&b.name)),
        }

        let products = products.into_iter().skip(query.offset.unwrap_or(0));
        Ok(match query.limit {
            Some(limit) => products.take(limit).collect(),
            None => products.collect(),
        })
    }

    async fn reserve_stock(&self, product_id: ProductId, quantity: i32) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_reservations(&[(product_id, quantity)])?;
        state.adjust_stock(product_id, -quantity, Utc::now())
    }

    async fn release_stock(&self, product_id: ProductId, quantity: i32) -> Result<()> {
        if quantity <= 0 {
            return Err(StoreError::InvalidQuantity(quantity));
        }
        let mut state = self.state.write().await;
        state.adjust_stock(product_id, quantity, Utc::now())
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<CartRecord> {
        let mut state = self.state.write().await;

        if let Some(cart) = state.carts.values().find(|c| c.user_id == user_id) {
            return Ok(cart.clone());
        }

        let now = Utc::now();
        let cart = CartRecord {
            id: CartId::new(),
            user_id,
            created_at: now,
            updated_at: now,
        };
        state.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn find_cart(&self, user_id: UserId) -> Result<Option<CartRecord>> {
        let state = self.state.read().await;
        Ok(state.carts.values().find(|c| c.user_id == user_id).cloned())
    }

    async fn cart_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        let state = self.state.read().await;
        Ok(state
            .cart_items
            .iter()
            .filter(|row| row.cart_id == cart_id)
            .filter_map(|row| state.hydrate_line(row))
            .collect())
    }

    async fn cart_line(&self, cart_id: CartId, item_id: CartItemId) -> Result<Option<CartLine>> {
        let state = self.state.read().await;
        Ok(state
            .cart_items
            .iter()
            .find(|row| row.id == item_id && row.cart_id == cart_id)
            .and_then(|row| state.hydrate_line(row)))
    }

    async fn upsert_cart_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItemId> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(row) = state
            .cart_items
            .iter_mut()
            .find(|row| row.cart_id == cart_id && row.product_id == product_id)
        {
            row.quantity = row
                .quantity
                .checked_add(quantity)
                .ok_or(StoreError::QuantityOverflow(quantity))?;
            row.updated_at = now;
            return Ok(row.id);
        }

        let id = CartItemId::new();
        state.cart_items.push(CartItemRow {
            id,
            cart_id,
            product_id,
            quantity,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn set_cart_item_quantity(&self, item_id: CartItemId, quantity: i32) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state
            .cart_items
            .iter_mut()
            .find(|row| row.id == item_id)
            .ok_or_else(|| StoreError::not_found("cart item", item_id))?;
        row.quantity = quantity;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_cart_item(&self, item_id: CartItemId) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.cart_items.len();
        state.cart_items.retain(|row| row.id != item_id);
        if state.cart_items.len() == before {
            return Err(StoreError::not_found("cart item", item_id));
        }
        Ok(())
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<()> {
        let mut state = self.state.write().await;
        state.cart_items.retain(|row| row.cart_id != cart_id);
        Ok(())
    }
}

#[async_trait]
impl AddressStore for InMemoryStore {
    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<AddressRecord>> {
        let state = self.state.read().await;
        let mut addresses: Vec<_> = state
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        addresses.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(addresses)
    }

    async fn get_address(&self, address_id: AddressId) -> Result<Option<AddressRecord>> {
        let state = self.state.read().await;
        Ok(state.addresses.get(&address_id).cloned())
    }

    async fn default_address(&self, user_id: UserId) -> Result<Option<AddressRecord>> {
        let state = self.state.read().await;
        Ok(state
            .addresses
            .values()
            .find(|a| a.user_id == user_id && a.is_default)
            .cloned())
    }

    async fn insert_address(&self, address: AddressRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if address.is_default {
            state.unset_defaults(address.user_id);
        }
        state.addresses.insert(address.id, address);
        Ok(())
    }

    async fn update_address(
        &self,
        address_id: AddressId,
        postal: PostalAddress,
    ) -> Result<AddressRecord> {
        let mut state = self.state.write().await;
        let address = state
            .addresses
            .get_mut(&address_id)
            .ok_or_else(|| StoreError::not_found("address", address_id))?;
        address.postal = postal;
        address.updated_at = Utc::now();
        Ok(address.clone())
    }

    async fn delete_address(&self, address_id: AddressId) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .addresses
            .remove(&address_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("address", address_id))
    }

    async fn set_default_address(&self, user_id: UserId, address_id: AddressId) -> Result<()> {
        let mut state = self.state.write().await;
        match state.addresses.get(&address_id) {
            Some(address) if address.user_id == user_id => {}
            _ => return Err(StoreError::not_found("address", address_id)),
        }

        state.unset_defaults(user_id);
        if let Some(address) = state.addresses.get_mut(&address_id) {
            address.is_default = true;
            address.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<OrderSummary>> {
        let state = self.state.read().await;
        Ok(state.summaries(state.orders.values().filter(|o| o.user_id == user_id)))
    }

    async fn list_orders_for_shop(&self, shop_id: ShopId) -> Result<Vec<OrderSummary>> {
        let state = self.state.read().await;
        Ok(state.summaries(state.orders.values().filter(|o| {
            state
                .order_items
                .iter()
                .any(|i| i.order_id == o.id && i.shop_id == shop_id)
        })))
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItemDetails>> {
        let state = self.state.read().await;
        Ok(state
            .order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .map(|item| OrderItemDetails {
                shop_name: state
                    .shops
                    .get(&item.shop_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                item: item.clone(),
            })
            .collect())
    }

    async fn order_contains_shop(&self, order_id: OrderId, shop_id: ShopId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .order_items
            .iter()
            .any(|i| i.order_id == order_id && i.shop_id == shop_id))
    }

    async fn set_payment_session(&self, order_id: OrderId, session_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .orders
            .values()
            .any(|o| o.id != order_id && o.payment_session_id.as_deref() == Some(session_id))
        {
            return Err(StoreError::Duplicate(format!("payment session {session_id}")));
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        order.payment_session_id = Some(session_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn find_order_by_payment_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderRecord>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.payment_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn apply_status_change(&self, change: StatusChange) -> Result<OrderRecord> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&change.order_id)
            .ok_or_else(|| StoreError::not_found("order", change.order_id))?;

        if order.status != change.from {
            return Err(StoreError::StatusConflict {
                order_id: change.order_id,
                expected: change.from,
                actual: order.status,
            });
        }

        order.status = change.to;
        order.updated_at = change.at;
        if let Some(payment_status) = change.payment_status {
            order.payment_status = payment_status;
        }
        match change.stamp {
            Some(Milestone::Confirmed) => {
                order.confirmed_at.get_or_insert(change.at);
            }
            Some(Milestone::Shipped) => {
                order.shipped_at.get_or_insert(change.at);
            }
            Some(Milestone::Delivered) => {
                order.delivered_at.get_or_insert(change.at);
            }
            None => {}
        }
        Ok(order.clone())
    }

    async fn set_payment_status(
        &self,
        order_id: OrderId,
        payment_status: PaymentStatus,
    ) -> Result<OrderRecord> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        order.payment_status = payment_status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

#[async_trait]
impl CommerceStore for InMemoryStore {
    async fn commit_checkout(&self, commit: CheckoutCommit) -> Result<OrderRecord> {
        let mut state = self.state.write().await;

        // Every check runs before the first write.
        let wanted: Vec<_> = commit
            .items
            .iter()
            .map(|i| (i.product_id, i.quantity))
            .collect();
        state.check_reservations(&wanted)?;
        if state
            .orders
            .values()
            .any(|o| o.order_number == commit.order.order_number)
        {
            return Err(StoreError::Duplicate(format!(
                "order number {}",
                commit.order.order_number
            )));
        }

        let at = commit.order.created_at;
        for address in commit.new_addresses {
            if address.is_default {
                state.unset_defaults(address.user_id);
            }
            state.addresses.insert(address.id, address);
        }
        for (product_id, quantity) in wanted {
            state.adjust_stock(product_id, -quantity, at)?;
        }
        state.orders.insert(commit.order.id, commit.order.clone());
        state.order_items.extend(commit.items);
        state.cart_items.retain(|row| row.cart_id != commit.cart_id);

        Ok(commit.order)
    }

    async fn commit_cancellation(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
    ) -> Result<OrderRecord> {
        let mut state = self.state.write().await;
        let actual = state
            .orders
            .get(&order_id)
            .map(|o| o.status)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        if actual != expected {
            return Err(StoreError::StatusConflict {
                order_id,
                expected,
                actual,
            });
        }

        let now = Utc::now();
        let lines: Vec<_> = state
            .order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .map(|i| (i.product_id, i.quantity))
            .collect();
        for (product_id, quantity) in lines {
            state.adjust_stock(product_id, quantity, now)?;
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        order.status = OrderStatus::Cancelled;
        order.updated_at = now;
        Ok(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use common::{AddressType, OrderItemId, PaymentMethod};
    use rust_decimal::Decimal;

    use super::*;

    async fn seed_product(store: &InMemoryStore, stock: i32) -> ProductRecord {
        let now = Utc::now();
        let shop = ShopRecord {
            id: ShopId::new(),
            vendor_id: UserId::new(),
            name: "Himalayan Crafts".to_string(),
            is_active: true,
            created_at: now,
        };
        store.insert_shop(shop.clone()).await.unwrap();

        let product = ProductRecord {
            id: ProductId::new(),
            shop_id: shop.id,
            name: "Prayer Flag".to_string(),
            sku: None,
            price: Decimal::new(100, 0),
            stock_quantity: stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_product(product.clone()).await.unwrap();
        product
    }

    fn address(user_id: UserId, is_default: bool) -> AddressRecord {
        let now = Utc::now();
        AddressRecord {
            id: AddressId::new(),
            user_id,
            postal: PostalAddress {
                full_name: "Asha Rai".to_string(),
                phone: "9800000000".to_string(),
                address_line1: "Thamel Marg".to_string(),
                address_line2: None,
                city: "Kathmandu".to_string(),
                state: None,
                postal_code: Some("44600".to_string()),
                country: "Nepal".to_string(),
            },
            is_default,
            address_type: AddressType::Shipping,
            created_at: now,
            updated_at: now,
        }
    }

    fn order_for(user_id: UserId, product: &ProductRecord, quantity: i32) -> CheckoutCommit {
        let now = Utc::now();
        let order_id = OrderId::new();
        let subtotal = product.price * Decimal::from(quantity);
        CheckoutCommit {
            cart_id: CartId::new(),
            new_addresses: vec![],
            order: OrderRecord {
                id: order_id,
                user_id,
                order_number: format!("ORD-TEST-{}", &order_id.to_string()[..8]),
                status: OrderStatus::Confirmed,
                payment_status: PaymentStatus::Pending,
                payment_method: PaymentMethod::CashOnDelivery,
                shipping_address_id: None,
                billing_address_id: None,
                subtotal,
                shipping_cost: Decimal::ZERO,
                tax: Decimal::ZERO,
                discount: Decimal::ZERO,
                total: subtotal,
                payment_session_id: None,
                notes: None,
                created_at: now,
                updated_at: now,
                confirmed_at: Some(now),
                shipped_at: None,
                delivered_at: None,
            },
            items: vec![OrderItemRecord {
                id: OrderItemId::new(),
                order_id,
                product_id: product.id,
                shop_id: product.shop_id,
                product_name: product.name.clone(),
                product_sku: None,
                quantity,
                unit_price: product.price,
                subtotal,
                created_at: now,
            }],
        }
    }

    #[tokio::test]
    async fn reserve_decrements_only_when_enough_stock() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 3).await;

        store.reserve_stock(product.id, 2).await.unwrap();
        let result = store.reserve_stock(product.id, 2).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            })
        ));

        let stock = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 1);
    }

    #[tokio::test]
    async fn ledger_rejects_non_positive_quantities() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 3).await;

        assert!(matches!(
            store.reserve_stock(product.id, 0).await,
            Err(StoreError::InvalidQuantity(0))
        ));
        assert!(matches!(
            store.release_stock(product.id, -1).await,
            Err(StoreError::InvalidQuantity(-1))
        ));
    }

    #[tokio::test]
    async fn reservations_and_releases_balance() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 10).await;

        store.reserve_stock(product.id, 4).await.unwrap();
        store.release_stock(product.id, 1).await.unwrap();
        store.reserve_stock(product.id, 3).await.unwrap();
        store.release_stock(product.id, 2).await.unwrap();

        let stock = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 10 - 4 + 1 - 3 + 2);
    }

    #[tokio::test]
    async fn upsert_cart_item_merges_quantities() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 10).await;
        let cart = store.get_or_create_cart(UserId::new()).await.unwrap();

        let first = store.upsert_cart_item(cart.id, product.id, 1).await.unwrap();
        let second = store.upsert_cart_item(cart.id, product.id, 2).await.unwrap();
        assert_eq!(first, second);

        let lines = store.cart_lines(cart.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
        assert_eq!(lines[0].shop_name, "Himalayan Crafts");
    }

    #[tokio::test]
    async fn quantities_saturating_the_column_are_rejected() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, i32::MAX).await;
        let cart = store.get_or_create_cart(UserId::new()).await.unwrap();

        store.upsert_cart_item(cart.id, product.id, 1).await.unwrap();
        assert!(matches!(
            store.upsert_cart_item(cart.id, product.id, i32::MAX).await,
            Err(StoreError::QuantityOverflow(i32::MAX))
        ));
        assert_eq!(store.cart_lines(cart.id).await.unwrap()[0].quantity, 1);

        assert!(matches!(
            store.release_stock(product.id, 1).await,
            Err(StoreError::QuantityOverflow(1))
        ));
        let stock = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, i32::MAX);
    }

    #[tokio::test]
    async fn cart_is_created_once_per_user() {
        let store = InMemoryStore::new();
        let user = UserId::new();

        let first = store.get_or_create_cart(user).await.unwrap();
        let second = store.get_or_create_cart(user).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn default_address_is_a_singleton() {
        let store = InMemoryStore::new();
        let user = UserId::new();

        let first = address(user, true);
        let second = address(user, true);
        store.insert_address(first.clone()).await.unwrap();
        store.insert_address(second.clone()).await.unwrap();

        let defaults: Vec<_> = store
            .list_addresses(user)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);

        store.set_default_address(user, first.id).await.unwrap();
        let current = store.default_address(user).await.unwrap().unwrap();
        assert_eq!(current.id, first.id);
    }

    #[tokio::test]
    async fn set_default_rejects_foreign_address() {
        let store = InMemoryStore::new();
        let owned = address(UserId::new(), false);
        store.insert_address(owned.clone()).await.unwrap();

        let result = store.set_default_address(UserId::new(), owned.id).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn commit_checkout_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 1).await;
        let user = UserId::new();

        let mut commit = order_for(user, &product, 2);
        commit.new_addresses.push(address(user, true));

        let result = store.commit_checkout(commit).await;
        assert!(matches!(result, Err(StoreError::InsufficientStock { .. })));
        assert_eq!(store.order_count().await, 0);
        assert!(store.list_addresses(user).await.unwrap().is_empty());
        let stock = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 1);
    }

    #[tokio::test]
    async fn commit_checkout_clears_cart_and_reserves() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;
        let user = UserId::new();
        let cart = store.get_or_create_cart(user).await.unwrap();
        store.upsert_cart_item(cart.id, product.id, 2).await.unwrap();

        let mut commit = order_for(user, &product, 2);
        commit.cart_id = cart.id;
        let order = store.commit_checkout(commit).await.unwrap();

        assert!(store.cart_lines(cart.id).await.unwrap().is_empty());
        let stock = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 3);
        let summaries = store.list_orders_for_user(user).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, order.id);
        assert_eq!(summaries[0].item_count, 1);
    }

    #[tokio::test]
    async fn cancellation_restores_stock_once() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;
        let order = store
            .commit_checkout(order_for(UserId::new(), &product, 2))
            .await
            .unwrap();

        let cancelled = store
            .commit_cancellation(order.id, OrderStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let again = store
            .commit_cancellation(order.id, OrderStatus::Confirmed)
            .await;
        assert!(matches!(again, Err(StoreError::StatusConflict { .. })));

        let stock = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 5);
    }

    #[tokio::test]
    async fn status_change_is_compare_and_set() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;
        let order = store
            .commit_checkout(order_for(UserId::new(), &product, 1))
            .await
            .unwrap();

        let at = Utc::now();
        let shipped = store
            .apply_status_change(StatusChange {
                order_id: order.id,
                from: OrderStatus::Confirmed,
                to: OrderStatus::Processing,
                stamp: None,
                payment_status: None,
                at,
            })
            .await
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Processing);

        let stale = store
            .apply_status_change(StatusChange {
                order_id: order.id,
                from: OrderStatus::Confirmed,
                to: OrderStatus::Cancelled,
                stamp: None,
                payment_status: None,
                at,
            })
            .await;
        assert!(matches!(stale, Err(StoreError::StatusConflict { .. })));
    }

    #[tokio::test]
    async fn payment_session_lookup() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;
        let order = store
            .commit_checkout(order_for(UserId::new(), &product, 1))
            .await
            .unwrap();

        store.set_payment_session(order.id, "cs_test_1").await.unwrap();
        let found = store
            .find_order_by_payment_session("cs_test_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, order.id);
        assert!(
            store
                .find_order_by_payment_session("cs_unknown")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn list_products_filters_and_sorts() {
        let store = InMemoryStore::new();
        let cheap = seed_product(&store, 1).await;
        let mut pricey = seed_product(&store, 1).await;
        pricey.id = ProductId::new();
        pricey.name = "Singing Bowl".to_string();
        pricey.price = Decimal::new(900, 0);
        store.insert_product(pricey.clone()).await.unwrap();

        let found = store
            .list_products(ProductQuery::new().sort(ProductSort::PriceDesc))
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].id, pricey.id);

        let found = store
            .list_products(ProductQuery::new().search("BOWL"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let found = store
            .list_products(ProductQuery::for_shop(cheap.shop_id))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
