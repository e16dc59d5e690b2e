//! Hosted card checkout: session creation and post-redirect verification.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use common::{AddressId, PaymentMethod};
use domain::{AddressInput, CreateOrderRequest};
use payments::{CheckoutSessionResult, SessionStatus};
use serde::Deserialize;
use store::CommerceStore;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::response::{ApiResponse, ApiResult};
use crate::state::AppState;

/// Checkout fields for a card order. The payment method is always card.
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    #[serde(default)]
    pub shipping_address_id: Option<AddressId>,
    #[serde(default)]
    pub shipping_address: Option<AddressInput>,
    #[serde(default)]
    pub billing_address: Option<AddressInput>,
    #[serde(default)]
    pub use_same_address: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<SessionRequest> for CreateOrderRequest {
    fn from(request: SessionRequest) -> Self {
        CreateOrderRequest {
            shipping_address_id: request.shipping_address_id,
            shipping_address: request.shipping_address,
            billing_address: request.billing_address,
            payment_method: PaymentMethod::Card,
            use_same_address: request.use_same_address,
            notes: request.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    pub session_id: String,
}

/// POST /checkout/session: create a pending order and its payment session.
#[tracing::instrument(skip(state, user, payload), fields(user_id = %user.0.id))]
pub async fn create_session<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: CurrentUser,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutSessionResult>>), ApiError> {
    let Json(request) = payload?;
    let result = state
        .sessions
        .create_checkout_session(user.0.id, request.into())
        .await?;
    Ok(ApiResponse::created("Checkout session created", result))
}

/// GET /checkout/verify?session_id=
pub async fn verify<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _user: CurrentUser,
    params: Result<Query<VerifyParams>, QueryRejection>,
) -> ApiResult<SessionStatus> {
    let Query(params) = params?;
    if params.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id is required".to_string()));
    }
    let status = state
        .reconciliation
        .verify_session(params.session_id.trim())
        .await?;
    Ok(ApiResponse::ok("Session status retrieved", status))
}
