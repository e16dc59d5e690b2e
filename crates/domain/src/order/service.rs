//! Order reads, status updates and cancellation.

use chrono::Utc;
use common::{OrderId, OrderStatus, UserId};
use store::{CommerceStore, OrderRecord, OrderSummary, Role, StoreError, UserRecord};

use crate::error::DomainError;

use super::{OrderView, TransitionPlan};

/// Loads an order's items and addresses.
pub(crate) async fn hydrate<S: CommerceStore>(
    store: &S,
    order: OrderRecord,
) -> Result<OrderView, DomainError> {
    let items = store.order_items(order.id).await?;
    let shipping = match order.shipping_address_id {
        Some(id) => store.get_address(id).await?,
        None => None,
    };
    let billing = match order.billing_address_id {
        Some(id) => store.get_address(id).await?,
        None => None,
    };
    Ok(OrderView::assemble(order, items, shipping, billing))
}

/// Service for reading orders and moving them through their lifecycle.
#[derive(Clone)]
pub struct OrderService<S: CommerceStore> {
    store: S,
}

impl<S: CommerceStore> OrderService<S> {
    /// Creates a new order service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads an order owned by `user_id`. Orders of other users are not found.
    async fn owned_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<OrderRecord, DomainError> {
        match self.store.get_order(order_id).await? {
            Some(order) if order.user_id == user_id => Ok(order),
            _ => Err(DomainError::not_found("order", order_id)),
        }
    }

    /// Returns a hydrated order owned by the user.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<OrderView, DomainError> {
        let order = self.owned_order(user_id, order_id).await?;
        hydrate(&self.store, order).await
    }

    /// Lists the user's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<OrderSummary>, DomainError> {
        Ok(self.store.list_orders_for_user(user_id).await?)
    }

    /// Lists orders containing items from the vendor's shop.
    #[tracing::instrument(skip(self, vendor), fields(vendor_id = %vendor.id))]
    pub async fn list_vendor_orders(
        &self,
        vendor: &UserRecord,
    ) -> Result<Vec<OrderSummary>, DomainError> {
        let shop = self
            .store
            .shop_for_vendor(vendor.id)
            .await?
            .ok_or_else(|| DomainError::not_found("shop", vendor.id))?;
        Ok(self.store.list_orders_for_shop(shop.id).await?)
    }

    /// Moves an order to `new_status` if the transition is legal.
    ///
    /// Admins may update any order. Vendors may only update orders that
    /// contain an item from their shop; other orders are not found.
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn update_order_status(
        &self,
        actor: &UserRecord,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<OrderView, DomainError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("order", order_id))?;

        let visible = match actor.role {
            Role::Admin => true,
            Role::Vendor => match self.store.shop_for_vendor(actor.id).await? {
                Some(shop) => self.store.order_contains_shop(order_id, shop.id).await?,
                None => false,
            },
            Role::Customer => false,
        };
        if !visible {
            return Err(DomainError::not_found("order", order_id));
        }

        let plan = TransitionPlan::for_order(&order, new_status)?;
        let updated = self
            .store
            .apply_status_change(plan.into_change(&order, Utc::now()))
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => DomainError::InvalidTransition {
                    from: actual,
                    to: new_status,
                },
                other => other.into(),
            })?;

        metrics::counter!("order_status_transitions_total", "to" => new_status.as_str())
            .increment(1);
        tracing::info!(%order_id, from = %plan.from, to = %new_status, "order status updated");

        hydrate(&self.store, updated).await
    }

    /// Cancels a confirmed order and restores stock for every line.
    ///
    /// Orders awaiting online payment are left to the payment provider's expiry.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<OrderView, DomainError> {
        let order = self.owned_order(user_id, order_id).await?;
        if order.status != OrderStatus::Confirmed {
            return Err(DomainError::NotCancellable {
                status: order.status,
            });
        }

        let cancelled = self
            .store
            .commit_cancellation(order_id, OrderStatus::Confirmed)
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => {
                    DomainError::NotCancellable { status: actual }
                }
                other => other.into(),
            })?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(%order_id, "order cancelled, stock restored");

        hydrate(&self.store, cancelled).await
    }
}
