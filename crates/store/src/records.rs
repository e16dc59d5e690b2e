//! Row types persisted by the store.

use chrono::{DateTime, Utc};
use common::{
    AddressId, AddressType, CartId, CartItemId, OrderId, OrderItemId, OrderStatus,
    ParseStatusError, PaymentMethod, PaymentStatus, ProductId, ShopId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a user is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Vendor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Vendor => "vendor",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "vendor" => Ok(Role::Vendor),
            "admin" => Ok(Role::Admin),
            other => Err(ParseStatusError {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// A user mirrored from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    /// Subject identifier issued by the identity provider.
    pub external_id: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopRecord {
    pub id: ShopId,
    pub vendor_id: UserId,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub shop_id: ShopId,
    pub name: String,
    pub sku: Option<String>,
    pub price: Decimal,
    /// Authoritative stock. Never negative.
    pub stock_quantity: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartRecord {
    pub id: CartId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart item joined with the current state of its product and shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_sku: Option<String>,
    pub product_price: Decimal,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub shop_id: ShopId,
    pub shop_name: String,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Structured postal fields shared by saved and inline addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub full_name: String,
    pub phone: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: AddressId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub postal: PostalAddress,
    pub is_default: bool,
    pub address_type: AddressType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    /// Reference of the hosted checkout session, set once the gateway issued one.
    pub payment_session_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A frozen copy of a cart line taken at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRecord {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub shop_id: ShopId,
    pub product_name: String,
    pub product_sku: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub created_at: DateTime<Utc>,
}

/// An order item joined with its shop's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemDetails {
    #[serde(flatten)]
    pub item: OrderItemRecord,
    pub shop_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub item_count: i64,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle milestone whose timestamp is written once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    Confirmed,
    Shipped,
    Delivered,
}

/// A compare-and-set status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub order_id: OrderId,
    /// The status the order must still be in for the write to apply.
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub stamp: Option<Milestone>,
    pub payment_status: Option<PaymentStatus>,
    pub at: DateTime<Utc>,
}

/// Everything a checkout writes, applied as one unit.
#[derive(Debug, Clone)]
pub struct CheckoutCommit {
    pub cart_id: CartId,
    /// Addresses created inline. A default one demotes the user's other defaults first.
    pub new_addresses: Vec<AddressRecord>,
    pub order: OrderRecord,
    /// Each item's quantity is reserved from its product's stock.
    pub items: Vec<OrderItemRecord>,
}
