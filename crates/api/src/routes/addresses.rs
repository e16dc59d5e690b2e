//! Saved address endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::AddressId;
use domain::AddressInput;
use store::{AddressRecord, CommerceStore};

use super::parse_id;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::response::{ApiResponse, ApiResult};
use crate::state::AppState;

/// GET /addresses: default first, then newest.
pub async fn list<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
) -> ApiResult<Vec<AddressRecord>> {
    let addresses = state.addresses.list_addresses(user.0.id).await?;
    Ok(ApiResponse::ok("Addresses retrieved successfully", addresses))
}

/// POST /addresses
pub async fn create<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    payload: Result<Json<AddressInput>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<AddressRecord>>), ApiError> {
    let Json(input) = payload?;
    let address = state.addresses.create_address(user.0.id, input).await?;
    Ok(ApiResponse::created("Address created successfully", address))
}

/// GET /addresses/default: `null` data when the user has no default.
pub async fn get_default<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
) -> ApiResult<Option<AddressRecord>> {
    let address = state.addresses.get_default_address(user.0.id).await?;
    Ok(ApiResponse::ok("Default address retrieved successfully", address))
}

/// GET /addresses/{id}
pub async fn get<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<AddressRecord> {
    let address_id: AddressId = parse_id(&id, "address")?;
    let address = state.addresses.get_address(user.0.id, address_id).await?;
    Ok(ApiResponse::ok("Address retrieved successfully", address))
}

/// PUT /addresses/{id}: replaces the postal fields.
pub async fn update<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<AddressInput>, JsonRejection>,
) -> ApiResult<AddressRecord> {
    let address_id: AddressId = parse_id(&id, "address")?;
    let Json(input) = payload?;
    let address = state
        .addresses
        .update_address(user.0.id, address_id, input)
        .await?;
    Ok(ApiResponse::ok("Address updated successfully", address))
}

/// DELETE /addresses/{id}
pub async fn delete<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let address_id: AddressId = parse_id(&id, "address")?;
    state.addresses.delete_address(user.0.id, address_id).await?;
    Ok(ApiResponse::ok("Address deleted successfully", ()))
}

/// POST /addresses/{id}/default
pub async fn set_default<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<AddressRecord> {
    let address_id: AddressId = parse_id(&id, "address")?;
    let address = state
        .addresses
        .set_default_address(user.0.id, address_id)
        .await?;
    Ok(ApiResponse::ok("Default address updated", address))
}
