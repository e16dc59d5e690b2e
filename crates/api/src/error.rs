//! API error types with HTTP response mapping.
//!
//! Every error is rendered as `{"success": false, "error": <code>, "message": <text>}`.
//! For server-side failures the underlying detail is logged, never returned.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ErrorKind};
use payments::PaymentError;
use thiserror::Error;

/// Failure surfaced by a handler, rendered as the JSON error envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthorized(String),
    /// Authenticated, but not allowed to do this.
    #[error("{0}")]
    Forbidden(String),
    /// Malformed request from the client.
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    /// Status code, machine-readable code and client-facing message.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::Domain(err) => domain_parts(err),
            ApiError::Payment(err) => payment_parts(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(error = %self, code, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, code, status = status.as_u16(), "request rejected");
        }
        metrics::counter!("api_errors_total", "code" => code).increment(1);

        let body = serde_json::json!({
            "success": false,
            "error": code,
            "message": message,
        });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_parts(err: &DomainError) -> (StatusCode, &'static str, String) {
    let status = match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".to_string(),
            );
        }
    };
    (status, err.code(), err.to_string())
}

fn payment_parts(err: &PaymentError) -> (StatusCode, &'static str, String) {
    match err {
        PaymentError::Domain(inner) => domain_parts(inner),
        PaymentError::UnknownSession(_) => {
            (StatusCode::NOT_FOUND, "unknown_session", err.to_string())
        }
        PaymentError::InvalidSignature(_) => (
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            "Invalid webhook signature".to_string(),
        ),
        PaymentError::InvalidPayload(_) => {
            (StatusCode::BAD_REQUEST, "invalid_payload", err.to_string())
        }
        PaymentError::Request(_)
        | PaymentError::Response(_)
        | PaymentError::Api { .. }
        | PaymentError::Declined(_) => (
            StatusCode::BAD_GATEWAY,
            "payment_gateway_error",
            "Payment provider is unavailable, please try again".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use common::OrderStatus;

    use super::*;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn conflicts_map_to_409() {
        let (status, body) = render(
            DomainError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Confirmed,
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "invalid_transition");
        assert_eq!(
            body["message"],
            "Cannot transition order from shipped to confirmed"
        );
    }

    #[tokio::test]
    async fn internal_detail_is_not_returned() {
        let err = DomainError::Internal("connection to 10.0.0.4 refused".to_string());
        let (status, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal_error");
        assert!(!body["message"].as_str().unwrap().contains("10.0.0.4"));
    }

    #[tokio::test]
    async fn gateway_failures_map_to_502() {
        let err = PaymentError::Api {
            status: 500,
            message: "upstream exploded".to_string(),
        };
        let (status, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "payment_gateway_error");
        assert!(!body["message"].as_str().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn payment_domain_errors_delegate() {
        let (status, body) = render(PaymentError::Domain(DomainError::EmptyCart).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "empty_cart");

        let (status, _) = render(DomainError::not_found("order", "x").into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
