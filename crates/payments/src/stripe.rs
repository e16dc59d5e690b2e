//! Stripe-compatible hosted checkout gateway.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{PaymentError, Result};
use crate::gateway::{CheckoutSession, CheckoutSessionRequest, PaymentGateway, SessionStatus};

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl From<SessionObject> for SessionStatus {
    fn from(session: SessionObject) -> Self {
        SessionStatus {
            order_id: session
                .metadata
                .get("order_id")
                .and_then(|id| id.parse().ok()),
            order_number: session.metadata.get("order_number").cloned(),
            session_id: session.id,
            payment_status: session.payment_status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Gateway backed by the Stripe Checkout Sessions API.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: SecretString,
    api_base: String,
    currency: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

impl StripeGateway {
    pub fn new(
        secret_key: SecretString,
        api_base: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            currency: currency.into(),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base)
    }

    /// Reads a session object, or the gateway's error message.
    async fn read_session(response: reqwest::Response) -> Result<SessionObject> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| PaymentError::Response(e.to_string()));
        }

        let message = response
            .json::<ErrorEnvelope>()
            .await
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or_else(|| status.to_string());
        Err(PaymentError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Encodes a session request as form fields in the gateway's bracket notation.
fn session_form(request: &CheckoutSessionRequest, currency: &str) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("metadata[order_id]".to_string(), request.order_id.to_string()),
        (
            "metadata[order_number]".to_string(),
            request.order_number.clone(),
        ),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((format!("{prefix}[price_data][currency]"), currency.to_string()));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.name.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }
    form
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        let response = self
            .client
            .post(self.sessions_url())
            .bearer_auth(self.secret_key.expose_secret())
            .form(&session_form(&request, &self.currency))
            .send()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        let session = Self::read_session(response).await?;
        let redirect_url = session.url.ok_or_else(|| {
            PaymentError::Response(format!("session {} has no checkout url", session.id))
        })?;

        tracing::debug!(session_id = %session.id, "checkout session created");
        Ok(CheckoutSession {
            session_id: session.id,
            redirect_url,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_session(&self, session_id: &str) -> Result<SessionStatus> {
        let response = self
            .client
            .get(format!("{}/{session_id}", self.sessions_url()))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(PaymentError::UnknownSession(session_id.to_string()));
        }
        Ok(Self::read_session(response).await?.into())
    }
}
