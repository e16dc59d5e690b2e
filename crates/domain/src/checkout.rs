//! Checkout: turning a cart into an order.

use std::time::Instant;

use chrono::Utc;
use common::{
    AddressId, AddressType, OrderId, OrderItemId, OrderStatus, PaymentMethod, PaymentStatus,
    UserId,
};
use serde::{Deserialize, Serialize};
use store::{
    AddressRecord, CartLine, CheckoutCommit, CommerceStore, OrderItemRecord, OrderRecord,
    StoreError,
};

use crate::Money;
use crate::address::AddressInput;
use crate::error::{DomainError, ErrorKind};
use crate::order::{OrderTotals, OrderView, generate_order_number, hydrate};

/// A request to check out the caller's cart.
///
/// A saved `shipping_address_id` wins over an inline `shipping_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub shipping_address_id: Option<AddressId>,
    #[serde(default)]
    pub shipping_address: Option<AddressInput>,
    #[serde(default)]
    pub billing_address: Option<AddressInput>,
    pub payment_method: PaymentMethod,
    /// Bill to the shipping address.
    #[serde(default)]
    pub use_same_address: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateOrderRequest {
    /// A request shipping to a saved address.
    pub fn for_saved_address(address_id: AddressId, payment_method: PaymentMethod) -> Self {
        Self {
            shipping_address_id: Some(address_id),
            shipping_address: None,
            billing_address: None,
            payment_method,
            use_same_address: false,
            notes: None,
        }
    }
}

/// Addresses resolved for an order, plus any that the checkout must create.
struct ResolvedAddresses {
    shipping: AddressId,
    billing: Option<AddressId>,
    new: Vec<AddressRecord>,
}

/// Rejects the cart if any line cannot be fulfilled right now.
///
/// Runs before any write so a rejected checkout leaves no trace.
fn validate_lines(lines: &[CartLine]) -> Result<(), DomainError> {
    if lines.is_empty() {
        return Err(DomainError::EmptyCart);
    }
    for line in lines {
        if !line.is_active {
            return Err(DomainError::ProductUnavailable {
                product_name: line.product_name.clone(),
            });
        }
        if line.stock_quantity < line.quantity {
            return Err(DomainError::InsufficientStock {
                product_name: line.product_name.clone(),
                available: line.stock_quantity,
                requested: line.quantity,
            });
        }
    }
    Ok(())
}

/// The checkout orchestrator.
#[derive(Clone)]
pub struct CheckoutService<S: CommerceStore> {
    store: S,
}

impl<S: CommerceStore> CheckoutService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates an order from the user's cart.
    ///
    /// Every line is validated against current stock before anything is
    /// written. The order, its items, new addresses, stock reservations and
    /// the cart clear are then committed as one unit.
    #[tracing::instrument(skip(self, request), fields(payment_method = %request.payment_method))]
    pub async fn create_order_from_cart(
        &self,
        user_id: UserId,
        request: CreateOrderRequest,
    ) -> Result<OrderView, DomainError> {
        let start = Instant::now();
        let payment_method = request.payment_method;
        let result = self.checkout(user_id, request).await;
        metrics::histogram!("checkout_duration_seconds").record(start.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!(
                    "checkout_orders_created_total",
                    "payment_method" => payment_method.as_str()
                )
                .increment(1);
                tracing::info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    total = %order.totals.total,
                    "order created"
                );
            }
            Err(e) if e.kind() == ErrorKind::Internal => {
                tracing::error!(error = %e, "checkout failed");
            }
            Err(e) => {
                metrics::counter!("checkout_rejected_total", "reason" => e.code()).increment(1);
                tracing::info!(reason = e.code(), "checkout rejected: {e}");
            }
        }
        result
    }

    async fn checkout(
        &self,
        user_id: UserId,
        request: CreateOrderRequest,
    ) -> Result<OrderView, DomainError> {
        let cart = self
            .store
            .find_cart(user_id)
            .await?
            .ok_or(DomainError::EmptyCart)?;
        let lines = self.store.cart_lines(cart.id).await?;
        validate_lines(&lines)?;

        let addresses = self.resolve_addresses(user_id, &request).await?;
        let totals = OrderTotals::from_lines(
            lines
                .iter()
                .map(|line| (Money::new(line.product_price), line.quantity)),
        );

        let now = Utc::now();
        let (status, confirmed_at) = if request.payment_method.is_online() {
            (OrderStatus::Pending, None)
        } else {
            (OrderStatus::Confirmed, Some(now))
        };

        let order = OrderRecord {
            id: OrderId::new(),
            user_id,
            order_number: generate_order_number(now),
            status,
            payment_status: PaymentStatus::Pending,
            payment_method: request.payment_method,
            shipping_address_id: Some(addresses.shipping),
            billing_address_id: addresses.billing,
            subtotal: totals.subtotal.into(),
            shipping_cost: totals.shipping_cost.into(),
            tax: totals.tax.into(),
            discount: totals.discount.into(),
            total: totals.total.into(),
            payment_session_id: None,
            notes: request
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            created_at: now,
            updated_at: now,
            confirmed_at,
            shipped_at: None,
            delivered_at: None,
        };

        let items = lines
            .iter()
            .map(|line| OrderItemRecord {
                id: OrderItemId::new(),
                order_id: order.id,
                product_id: line.product_id,
                shop_id: line.shop_id,
                product_name: line.product_name.clone(),
                product_sku: line.product_sku.clone(),
                quantity: line.quantity,
                unit_price: line.product_price,
                subtotal: Money::new(line.product_price).times(line.quantity).into(),
                created_at: now,
            })
            .collect();

        let committed = self
            .store
            .commit_checkout(CheckoutCommit {
                cart_id: cart.id,
                new_addresses: addresses.new,
                order,
                items,
            })
            .await
            .map_err(|e| match e {
                StoreError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                } => {
                    // Another checkout reserved the stock after validation.
                    tracing::warn!(
                        %product_id,
                        requested,
                        available,
                        "stock reservation lost race"
                    );
                    let product_name = lines
                        .iter()
                        .find(|line| line.product_id == product_id)
                        .map(|line| line.product_name.clone())
                        .unwrap_or_else(|| product_id.to_string());
                    DomainError::InsufficientStock {
                        product_name,
                        available,
                        requested,
                    }
                }
                other => other.into(),
            })?;

        hydrate(&self.store, committed).await
    }

    async fn resolve_addresses(
        &self,
        user_id: UserId,
        request: &CreateOrderRequest,
    ) -> Result<ResolvedAddresses, DomainError> {
        let mut new = Vec::new();

        let shipping = match (&request.shipping_address_id, &request.shipping_address) {
            (Some(id), _) => match self.store.get_address(*id).await? {
                Some(address) if address.user_id == user_id => address.id,
                _ => return Err(DomainError::not_found("address", id)),
            },
            (None, Some(input)) => {
                let address = input.to_record(user_id, AddressType::Shipping, input.is_default)?;
                let id = address.id;
                new.push(address);
                id
            }
            (None, None) => return Err(DomainError::MissingShippingAddress),
        };

        let billing = if request.use_same_address {
            Some(shipping)
        } else if let Some(input) = &request.billing_address {
            let address = input.to_record(user_id, AddressType::Billing, false)?;
            let id = address.id;
            new.push(address);
            Some(id)
        } else {
            None
        };

        Ok(ResolvedAddresses {
            shipping,
            billing,
            new,
        })
    }
}

#[cfg(test)]
mod tests {
    use common::{CartId, CartItemId, ProductId, ShopId};
    use rust_decimal::Decimal;

    use super::*;

    fn line(name: &str, stock: i32, quantity: i32, active: bool) -> CartLine {
        let now = Utc::now();
        CartLine {
            id: CartItemId::new(),
            cart_id: CartId::new(),
            product_id: ProductId::new(),
            product_name: name.to_string(),
            product_sku: None,
            product_price: Decimal::from(10),
            stock_quantity: stock,
            is_active: active,
            shop_id: ShopId::new(),
            shop_name: "Thamel Books".to_string(),
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        assert!(matches!(validate_lines(&[]), Err(DomainError::EmptyCart)));
    }

    #[test]
    fn short_line_is_named() {
        let lines = [line("Map", 5, 1, true), line("Guidebook", 1, 2, true)];
        match validate_lines(&lines) {
            Err(DomainError::InsufficientStock {
                product_name,
                available,
                requested,
            }) => {
                assert_eq!(product_name, "Guidebook");
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn inactive_line_is_unavailable() {
        let lines = [line("Map", 5, 1, false)];
        assert!(matches!(
            validate_lines(&lines),
            Err(DomainError::ProductUnavailable { .. })
        ));
    }

    #[test]
    fn request_defaults() {
        let request: CreateOrderRequest =
            serde_json::from_str(r#"{"payment_method":"cod"}"#).unwrap();
        assert_eq!(request.payment_method, PaymentMethod::CashOnDelivery);
        assert!(!request.use_same_address);
        assert!(request.shipping_address.is_none());

        let request: CreateOrderRequest =
            serde_json::from_str(r#"{"payment_method":"stripe"}"#).unwrap();
        assert_eq!(request.payment_method, PaymentMethod::Card);
    }
}
