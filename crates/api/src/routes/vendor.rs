//! Vendor shop, product and order management.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{OrderId, OrderStatus};
use domain::{OrderView, ProductInput};
use serde::Deserialize;
use store::{CommerceStore, OrderSummary, ProductQuery, ProductRecord, Role, ShopRecord};

use super::parse_id;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::response::{ApiResponse, ApiResult};
use crate::state::AppState;

const STAFF: &[Role] = &[Role::Vendor, Role::Admin];
const VENDOR: &[Role] = &[Role::Vendor];

#[derive(Debug, Deserialize)]
pub struct OpenShopRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// GET /vendor/orders: orders containing the vendor's products.
pub async fn list<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
) -> ApiResult<Vec<OrderSummary>> {
    user.require_role(STAFF)?;
    let orders = state.orders.list_vendor_orders(&user.0).await?;
    Ok(ApiResponse::ok("Orders retrieved successfully", orders))
}

/// PATCH /vendor/orders/{id}/status
#[tracing::instrument(skip(state, user, payload), fields(actor_id = %user.0.id))]
pub async fn update_status<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> ApiResult<OrderView> {
    user.require_role(STAFF)?;
    let order_id: OrderId = parse_id(&id, "order")?;
    let Json(request) = payload?;

    let order = state
        .orders
        .update_order_status(&user.0, order_id, request.status)
        .await?;
    Ok(ApiResponse::ok("Order status updated successfully", order))
}

/// GET /vendor/shop
pub async fn shop<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
) -> ApiResult<ShopRecord> {
    user.require_role(VENDOR)?;
    let shop = state.catalog.vendor_shop(user.0.id).await?;
    Ok(ApiResponse::ok("Shop retrieved successfully", shop))
}

/// POST /vendor/shop
pub async fn open_shop<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    payload: Result<Json<OpenShopRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<ShopRecord>>), ApiError> {
    user.require_role(VENDOR)?;
    let Json(request) = payload?;
    let shop = state.catalog.open_shop(user.0.id, &request.name).await?;
    Ok(ApiResponse::created("Shop created successfully", shop))
}

/// GET /vendor/products: the vendor's active products, filtered by the query string.
pub async fn products<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> ApiResult<Vec<ProductRecord>> {
    user.require_role(VENDOR)?;
    let Query(query) = query?;
    let products = state.catalog.list_vendor_products(user.0.id, query).await?;
    Ok(ApiResponse::ok("Products retrieved successfully", products))
}

/// POST /vendor/products
pub async fn create_product<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    payload: Result<Json<ProductInput>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<ProductRecord>>), ApiError> {
    user.require_role(VENDOR)?;
    let Json(input) = payload?;
    let product = state.catalog.create_product(user.0.id, input).await?;
    Ok(ApiResponse::created("Product created successfully", product))
}
