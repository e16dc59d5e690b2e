//! Customer order endpoints: checkout, reads and cancellation.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{CreateOrderRequest, OrderView};
use store::{CommerceStore, OrderSummary};

use super::parse_id;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::response::{ApiResponse, ApiResult};
use crate::state::AppState;

/// POST /orders: check out the caller's cart.
#[tracing::instrument(skip(state, user, payload), fields(user_id = %user.0.id))]
pub async fn create<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<OrderView>>), ApiError> {
    let Json(request) = payload?;
    let order = state
        .checkout
        .create_order_from_cart(user.0.id, request)
        .await?;
    Ok(ApiResponse::created("Order created successfully", order))
}

/// GET /orders: the caller's orders, newest first.
pub async fn list<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
) -> ApiResult<Vec<OrderSummary>> {
    let orders = state.orders.list_orders(user.0.id).await?;
    Ok(ApiResponse::ok("Orders retrieved successfully", orders))
}

/// GET /orders/{id}
pub async fn get<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<OrderView> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let order = state.orders.get_order(user.0.id, order_id).await?;
    Ok(ApiResponse::ok("Order retrieved successfully", order))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn cancel<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<OrderView> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let order = state.orders.cancel_order(user.0.id, order_id).await?;
    Ok(ApiResponse::ok("Order cancelled successfully", order))
}
