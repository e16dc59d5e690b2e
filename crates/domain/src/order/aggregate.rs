//! The order aggregate: an order, its frozen items and its derived totals.

use chrono::{DateTime, Utc};
use common::{OrderId, OrderStatus, PaymentMethod, PaymentStatus, UserId};
use serde::{Deserialize, Serialize};
use store::{AddressRecord, OrderItemDetails, OrderRecord};
use uuid::Uuid;

use crate::Money;

/// Totals of an order, fixed at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub shipping_cost: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
}

impl OrderTotals {
    /// Prices `(unit price, quantity)` lines.
    ///
    /// Shipping, tax and discount are currently always zero.
    pub fn from_lines(lines: impl IntoIterator<Item = (Money, i32)>) -> Self {
        let subtotal: Money = lines
            .into_iter()
            .map(|(price, quantity)| price.times(quantity))
            .sum();
        Self::new(subtotal, Money::zero(), Money::zero(), Money::zero())
    }

    /// total = subtotal + shipping + tax - discount
    pub fn new(subtotal: Money, shipping_cost: Money, tax: Money, discount: Money) -> Self {
        Self {
            subtotal,
            shipping_cost,
            tax,
            discount,
            total: subtotal + shipping_cost + tax - discount,
        }
    }
}

/// Generates a human-readable order number: `ORD-YYYYMMDD-<8 hex>`.
pub fn generate_order_number(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", at.format("%Y%m%d"), &suffix[..8])
}

/// An order hydrated with its items and resolved addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: Option<AddressRecord>,
    pub billing_address: Option<AddressRecord>,
    pub items: Vec<OrderItemDetails>,
    #[serde(flatten)]
    pub totals: OrderTotals,
    /// Hosted checkout session, for card orders that reached the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OrderView {
    pub fn assemble(
        order: OrderRecord,
        items: Vec<OrderItemDetails>,
        shipping_address: Option<AddressRecord>,
        billing_address: Option<AddressRecord>,
    ) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            shipping_address,
            billing_address,
            items,
            totals: OrderTotals {
                subtotal: order.subtotal.into(),
                shipping_cost: order.shipping_cost.into(),
                tax: order.tax.into(),
                discount: order.discount.into(),
                total: order.total.into(),
            },
            payment_session_id: order.payment_session_id,
            notes: order.notes,
            created_at: order.created_at,
            updated_at: order.updated_at,
            confirmed_at: order.confirmed_at,
            shipped_at: order.shipped_at,
            delivered_at: order.delivered_at,
        }
    }

    /// Total number of units across all items.
    pub fn unit_count(&self) -> i32 {
        self.items.iter().map(|i| i.item.quantity).sum()
    }
}
