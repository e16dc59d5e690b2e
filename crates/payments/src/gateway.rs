//! The payment gateway seam.

use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One priced line on the hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub name: String,
    /// Unit price in minor currency units.
    pub unit_amount: i64,
    pub quantity: i32,
}

/// Everything the gateway needs to open a hosted checkout for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub order_id: OrderId,
    pub order_number: String,
    pub line_items: Vec<SessionLineItem>,
    pub success_url: String,
    pub cancel_url: String,
}

/// A session opened by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    /// Where to send the customer to pay.
    pub redirect_url: String,
}

/// The gateway's current view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    /// Gateway payment state, e.g. `paid` or `unpaid`.
    pub payment_status: String,
    pub order_id: Option<OrderId>,
    pub order_number: Option<String>,
}

impl SessionStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

/// Opens hosted checkout sessions and reports their state.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession>;

    async fn get_session(&self, session_id: &str) -> Result<SessionStatus>;
}

#[async_trait]
impl<G: PaymentGateway + ?Sized> PaymentGateway for Arc<G> {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        (**self).create_checkout_session(request).await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionStatus> {
        (**self).get_session(session_id).await
    }
}
