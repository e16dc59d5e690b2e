//! Shopping cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::{CartItemId, ProductId};
use domain::{CartLineView, CartView};
use serde::{Deserialize, Serialize};
use store::CommerceStore;

use super::parse_id;
use crate::auth::CurrentUser;
use crate::response::{ApiResponse, ApiResult};
use crate::state::AppState;

fn one() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: ProductId,
    #[serde(default = "one")]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CartCount {
    pub count: i32,
}

/// GET /cart
pub async fn get<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
) -> ApiResult<CartView> {
    let cart = state.carts.get_cart(user.0.id).await?;
    Ok(ApiResponse::ok("Cart retrieved successfully", cart))
}

/// POST /cart
pub async fn add<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    payload: Result<Json<AddToCartRequest>, JsonRejection>,
) -> ApiResult<CartLineView> {
    let Json(request) = payload?;
    let line = state
        .carts
        .add_to_cart(user.0.id, request.product_id, request.quantity)
        .await?;
    Ok(ApiResponse::ok("Item added to cart", line))
}

/// DELETE /cart
pub async fn clear<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
) -> ApiResult<()> {
    state.carts.clear_cart(user.0.id).await?;
    Ok(ApiResponse::ok("Cart cleared", ()))
}

/// PATCH /cart/items/{id}
pub async fn update_item<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateQuantityRequest>, JsonRejection>,
) -> ApiResult<CartLineView> {
    let item_id: CartItemId = parse_id(&id, "cart item")?;
    let Json(request) = payload?;
    let line = state
        .carts
        .update_cart_item_quantity(user.0.id, item_id, request.quantity)
        .await?;
    Ok(ApiResponse::ok("Cart item updated", line))
}

/// DELETE /cart/items/{id}
pub async fn remove_item<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let item_id: CartItemId = parse_id(&id, "cart item")?;
    state.carts.remove_cart_item(user.0.id, item_id).await?;
    Ok(ApiResponse::ok("Item removed from cart", ()))
}

/// GET /cart/count: total units, for the header badge.
pub async fn count<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
) -> ApiResult<CartCount> {
    let count = state.carts.get_cart_item_count(user.0.id).await?;
    Ok(ApiResponse::ok("Cart count retrieved", CartCount { count }))
}
