//! Webhook signature verification and event parsing.
//!
//! Events arrive with a `Stripe-Signature: t=<unix>,v1=<hex>` header. The
//! signature is an HMAC-SHA256 over `"{t}.{body}"` keyed by the endpoint
//! secret.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Maximum age of a signed timestamp, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verifies that webhook bodies were signed with the endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Produces a signature header for `payload`, as the provider would.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let signature = hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes());
        Ok(format!("t={timestamp},v1={signature}"))
    }

    /// Checks a signature header against the current time.
    pub fn verify(&self, header: &str, payload: &[u8]) -> Result<()> {
        self.verify_at(header, payload, chrono::Utc::now().timestamp())
    }

    /// Checks a signature header as of `now` (unix seconds).
    #[tracing::instrument(skip(self, header, payload))]
    pub fn verify_at(&self, header: &str, payload: &[u8], now: i64) -> Result<()> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(PaymentError::InvalidSignature(
                "missing v1 signature".to_string(),
            ));
        }
        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(PaymentError::InvalidSignature(
                "timestamp outside tolerance".to_string(),
            ));
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            return Err(PaymentError::InvalidSignature(
                "signature mismatch".to_string(),
            ));
        }

        tracing::debug!("webhook signature verified");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Debug, Deserialize)]
struct RawData {
    object: RawObject,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    #[serde(default)]
    id: Option<String>,
}

/// A provider event, reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    /// The customer completed checkout.
    SessionCompleted { event_id: String, session_id: String },
    /// The session expired or its asynchronous payment failed.
    SessionFailed {
        event_id: String,
        session_id: String,
        event_type: String,
    },
    /// An event type we do not act on.
    Ignored { event_id: String, event_type: String },
}

impl PaymentEvent {
    /// Parses a webhook body.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::InvalidPayload(e.to_string()))?;

        let RawEvent {
            id: event_id,
            event_type,
            data,
        } = raw;

        let completed = event_type == "checkout.session.completed";
        let failed = matches!(
            event_type.as_str(),
            "checkout.session.expired" | "checkout.session.async_payment_failed"
        );
        if !completed && !failed {
            return Ok(PaymentEvent::Ignored {
                event_id,
                event_type,
            });
        }

        let session_id = data.object.id.ok_or_else(|| {
            PaymentError::InvalidPayload(format!("{event_type} has no session id"))
        })?;
        Ok(if completed {
            PaymentEvent::SessionCompleted {
                event_id,
                session_id,
            }
        } else {
            PaymentEvent::SessionFailed {
                event_id,
                session_id,
                event_type,
            }
        })
    }
}
