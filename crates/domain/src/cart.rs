//! The shopping cart: a per-user staging area for checkout.

use chrono::{DateTime, Utc};
use common::{CartId, CartItemId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use store::{CartLine, CartRecord, CommerceStore};

use crate::{DomainError, Money};

/// A cart line with its current line total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineView {
    #[serde(flatten)]
    pub line: CartLine,
    pub subtotal: Money,
}

impl From<CartLine> for CartLineView {
    fn from(line: CartLine) -> Self {
        let subtotal = Money::new(line.product_price).times(line.quantity);
        Self { line, subtotal }
    }
}

/// A cart priced at current product prices.
///
/// Prices and stock shown here are not reserved; checkout re-reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    pub id: CartId,
    pub user_id: UserId,
    pub items: Vec<CartLineView>,
    /// Units across all lines.
    pub item_count: i32,
    pub subtotal: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartView {
    pub fn new(cart: CartRecord, lines: Vec<CartLine>) -> Self {
        let items: Vec<CartLineView> = lines.into_iter().map(CartLineView::from).collect();
        let item_count = items
            .iter()
            .fold(0i32, |n, i| n.saturating_add(i.line.quantity));
        let subtotal = items.iter().map(|i| i.subtotal).sum();
        Self {
            id: cart.id,
            user_id: cart.user_id,
            items,
            item_count,
            subtotal,
            created_at: cart.created_at,
            updated_at: cart.updated_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn check_quantity(quantity: i32) -> Result<(), DomainError> {
    if quantity < 1 {
        return Err(DomainError::Validation(format!(
            "quantity must be at least 1, got {quantity}"
        )));
    }
    Ok(())
}

/// Service for reading and editing a user's cart.
#[derive(Clone)]
pub struct CartService<S: CommerceStore> {
    store: S,
}

impl<S: CommerceStore> CartService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the user's cart, creating an empty one on first use.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart(&self, user_id: UserId) -> Result<CartView, DomainError> {
        let cart = self.store.get_or_create_cart(user_id).await?;
        let lines = self.store.cart_lines(cart.id).await?;
        Ok(CartView::new(cart, lines))
    }

    /// Adds units of a product, merging into an existing line.
    ///
    /// The merged quantity may not exceed the product's current stock.
    #[tracing::instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartLineView, DomainError> {
        check_quantity(quantity)?;

        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))?;
        if !product.is_active {
            return Err(DomainError::ProductUnavailable {
                product_name: product.name,
            });
        }

        let cart = self.store.get_or_create_cart(user_id).await?;
        let in_cart = self
            .store
            .cart_lines(cart.id)
            .await?
            .iter()
            .find(|line| line.product_id == product_id)
            .map_or(0, |line| line.quantity);

        match in_cart.checked_add(quantity) {
            Some(requested) if requested <= product.stock_quantity => {}
            _ => {
                return Err(DomainError::InsufficientStock {
                    product_name: product.name,
                    available: product.stock_quantity,
                    requested: in_cart.saturating_add(quantity),
                });
            }
        }

        let item_id = self
            .store
            .upsert_cart_item(cart.id, product_id, quantity)
            .await?;
        self.owned_line(cart.id, item_id).await.map(CartLineView::from)
    }

    async fn owned_line(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
    ) -> Result<CartLine, DomainError> {
        self.store
            .cart_line(cart_id, item_id)
            .await?
            .ok_or_else(|| DomainError::not_found("cart item", item_id))
    }

    /// Resolves an item in the user's own cart. Items in other carts are not found.
    async fn user_line(
        &self,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<CartLine, DomainError> {
        let cart = self
            .store
            .find_cart(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("cart item", item_id))?;
        self.owned_line(cart.id, item_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_cart_item_quantity(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<CartLineView, DomainError> {
        check_quantity(quantity)?;

        let line = self.user_line(user_id, item_id).await?;
        if quantity > line.stock_quantity {
            return Err(DomainError::InsufficientStock {
                product_name: line.product_name,
                available: line.stock_quantity,
                requested: quantity,
            });
        }

        self.store.set_cart_item_quantity(item_id, quantity).await?;
        self.owned_line(line.cart_id, item_id)
            .await
            .map(CartLineView::from)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<(), DomainError> {
        self.user_line(user_id, item_id).await?;
        Ok(self.store.remove_cart_item(item_id).await?)
    }

    /// Empties the cart. A user without a cart has nothing to clear.
    #[tracing::instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: UserId) -> Result<(), DomainError> {
        match self.store.find_cart(user_id).await? {
            Some(cart) => Ok(self.store.clear_cart(cart.id).await?),
            None => Ok(()),
        }
    }

    /// Units in the user's cart, or 0 if they have none yet.
    pub async fn get_cart_item_count(&self, user_id: UserId) -> Result<i32, DomainError> {
        let Some(cart) = self.store.find_cart(user_id).await? else {
            return Ok(0);
        };
        let lines = self.store.cart_lines(cart.id).await?;
        Ok(lines
            .iter()
            .fold(0i32, |n, line| n.saturating_add(line.quantity)))
    }
}
