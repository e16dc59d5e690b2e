//! Order creation and payment session in one call.

use common::{OrderStatus, PaymentMethod, UserId};
use domain::{CheckoutService, CreateOrderRequest, Money, OrderView};
use serde::Serialize;
use store::{CommerceStore, StoreError};

use crate::error::{PaymentError, Result};
use crate::gateway::{CheckoutSessionRequest, PaymentGateway, SessionLineItem};

/// Where the hosted checkout sends the customer afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl RedirectUrls {
    /// Builds the success and cancel pages under the storefront's base URL.
    pub fn for_frontend(frontend_url: &str) -> Self {
        let base = frontend_url.trim_end_matches('/');
        Self {
            success_url: format!("{base}/payment/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{base}/payment/cancel"),
        }
    }
}

/// A pending order with its hosted checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSessionResult {
    pub order: OrderView,
    pub session_id: String,
    pub redirect_url: String,
}

/// Creates a card order and opens a payment session for it.
///
/// If the session cannot be opened or recorded, the order is rolled back:
/// it is cancelled, its stock released and its lines put back in the cart.
#[derive(Clone)]
pub struct CheckoutSessionCoordinator<S: CommerceStore, G: PaymentGateway> {
    store: S,
    checkout: CheckoutService<S>,
    gateway: G,
    urls: RedirectUrls,
}

impl<S, G> CheckoutSessionCoordinator<S, G>
where
    S: CommerceStore + Clone,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: G, urls: RedirectUrls) -> Self {
        let checkout = CheckoutService::new(store.clone());
        Self {
            store,
            checkout,
            gateway,
            urls,
        }
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn create_checkout_session(
        &self,
        user_id: UserId,
        mut request: CreateOrderRequest,
    ) -> Result<CheckoutSessionResult> {
        request.payment_method = PaymentMethod::Card;
        let order = self.checkout.create_order_from_cart(user_id, request).await?;

        match self.open_session(&order).await {
            Ok((session_id, redirect_url)) => {
                metrics::counter!("payment_sessions_created_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    %session_id,
                    "payment session created"
                );
                Ok(CheckoutSessionResult {
                    order,
                    session_id,
                    redirect_url,
                })
            }
            Err(e) => {
                self.compensate(&order, &e).await;
                Err(e)
            }
        }
    }

    async fn open_session(&self, order: &OrderView) -> Result<(String, String)> {
        let line_items = order
            .items
            .iter()
            .map(|details| -> Result<SessionLineItem> {
                Ok(SessionLineItem {
                    name: details.item.product_name.clone(),
                    unit_amount: Money::new(details.item.unit_price).to_minor_units()?,
                    quantity: details.item.quantity,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let request = CheckoutSessionRequest {
            order_id: order.id,
            order_number: order.order_number.clone(),
            line_items,
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
        };

        let session = self.gateway.create_checkout_session(request).await?;
        self.store
            .set_payment_session(order.id, &session.session_id)
            .await?;
        Ok((session.session_id, session.redirect_url))
    }

    /// Undoes a checkout whose payment session failed.
    async fn compensate(&self, order: &OrderView, cause: &PaymentError) {
        match self.roll_back(order).await {
            Ok(()) => {
                metrics::counter!("payment_sessions_failed_total").increment(1);
                tracing::warn!(
                    order_id = %order.id,
                    error = %cause,
                    "payment session failed, order rolled back"
                );
            }
            Err(e) => {
                tracing::error!(
                    reconcile = "orphaned_order",
                    order_id = %order.id,
                    order_number = %order.order_number,
                    error = %e,
                    cause = %cause,
                    "payment session failed and rollback failed"
                );
            }
        }
    }

    async fn roll_back(&self, order: &OrderView) -> std::result::Result<(), StoreError> {
        self.store
            .commit_cancellation(order.id, OrderStatus::Pending)
            .await?;

        let cart = self.store.get_or_create_cart(order.user_id).await?;
        for details in &order.items {
            self.store
                .upsert_cart_item(cart.id, details.item.product_id, details.item.quantity)
                .await?;
        }
        Ok(())
    }
}
