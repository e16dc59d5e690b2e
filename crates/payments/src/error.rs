//! Payment error types.

use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur while talking to the payment gateway or
/// applying its outcomes.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The request to the gateway could not be sent or timed out.
    #[error("Payment gateway request failed: {0}")]
    Request(String),

    /// The gateway answered with something we could not read.
    #[error("Payment gateway response error: {0}")]
    Response(String),

    /// The gateway rejected the request.
    #[error("Payment gateway error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The gateway refused to create a session.
    #[error("Payment session declined: {0}")]
    Declined(String),

    /// No order is linked to the session.
    #[error("Unknown payment session: {0}")]
    UnknownSession(String),

    /// The webhook signature is missing, stale or wrong.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// The webhook body is not a recognizable event.
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl PaymentError {
    /// True when the failure happened at the gateway rather than in our own state.
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            PaymentError::Request(_)
                | PaymentError::Response(_)
                | PaymentError::Api { .. }
                | PaymentError::Declined(_)
        )
    }
}

impl From<StoreError> for PaymentError {
    fn from(e: StoreError) -> Self {
        PaymentError::Domain(e.into())
    }
}

/// Convenience type alias for payment results.
pub type Result<T> = std::result::Result<T, PaymentError>;
