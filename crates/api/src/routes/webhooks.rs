//! Webhook ingestion for the payment and identity providers.
//!
//! Not behind bearer auth: the signature is the trust boundary.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use domain::{SyncOutcome, UserSyncEvent};
use payments::{PaymentError, PaymentEvent, ReconcileOutcome, SIGNATURE_HEADER, WebhookVerifier};
use serde::Serialize;
use store::CommerceStore;

use crate::error::ApiError;
use crate::response::{ApiResponse, ApiResult};
use crate::state::AppState;

/// Header carrying the signature of user sync events, in the `t=..,v1=..` form.
pub const IDENTITY_SIGNATURE_HEADER: &str = "Identity-Signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

/// Refuses the request unless `body` carries a valid signature in `header`.
fn verify_signed(
    verifier: Option<&WebhookVerifier>,
    headers: &HeaderMap,
    header: &str,
    body: &[u8],
) -> Result<(), ApiError> {
    let Some(verifier) = verifier else {
        tracing::warn!(header, "webhook refused: no signing secret configured");
        return Err(ApiError::Unauthorized(
            "Webhook signing secret is not configured".to_string(),
        ));
    };

    let signature = headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {header} header")))?;
    verifier.verify(signature, body)?;
    Ok(())
}

/// POST /webhooks/payment
#[tracing::instrument(skip_all)]
pub async fn payment<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    verify_signed(state.webhooks.as_ref(), &headers, SIGNATURE_HEADER, &body)?;

    let event = PaymentEvent::parse(&body)?;
    let outcome = match state.reconciliation.handle_event(&event).await {
        Ok(outcome) => outcome.as_str(),
        // Acknowledged: redelivery would never find the order either.
        Err(PaymentError::UnknownSession(session_id)) => {
            tracing::warn!(%session_id, ?event, "webhook for unknown payment session");
            "unknown_session"
        }
        Err(e) => return Err(e.into()),
    };

    if outcome == ReconcileOutcome::Ignored.as_str() {
        tracing::debug!(?event, "webhook acknowledged");
    } else {
        tracing::info!(?event, outcome, "webhook processed");
    }
    Ok(ApiResponse::ok(
        "Webhook received",
        WebhookAck {
            received: true,
            outcome,
        },
    ))
}

/// POST /webhooks/identity: user created, updated or deleted at the identity provider.
#[tracing::instrument(skip_all)]
pub async fn identity<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    verify_signed(
        state.identity_webhooks.as_ref(),
        &headers,
        IDENTITY_SIGNATURE_HEADER,
        &body,
    )?;

    let event = UserSyncEvent::parse(&body)?;
    let outcome = state.users.apply(&event).await?;
    match outcome {
        SyncOutcome::Ignored | SyncOutcome::Unknown => {
            tracing::debug!(outcome = outcome.as_str(), "user sync acknowledged")
        }
        _ => tracing::info!(outcome = outcome.as_str(), "user sync processed"),
    }

    Ok(ApiResponse::ok(
        "Webhook received",
        WebhookAck {
            received: true,
            outcome: outcome.as_str(),
        },
    ))
}
