//! Bearer-token identity.
//!
//! Tokens are verified by an [`IdentityVerifier`] and the resulting external
//! identity is mapped to a local user through the user directory. Handlers
//! take a [`CurrentUser`] argument to require authentication.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use store::{CommerceStore, Role, UserRecord};

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Verifies bearer tokens issued by the identity provider.
pub trait IdentityVerifier: Send + Sync {
    /// Returns the external user id the token was issued for, or `None` if
    /// the token is not valid.
    fn verify(&self, token: &str) -> Option<String>;
}

/// Accepts tokens of the form `<external_id>.<hex hmac-sha256(secret, external_id)>`.
#[derive(Clone)]
pub struct SignedTokenVerifier {
    secret: SecretString,
}

impl std::fmt::Debug for SignedTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTokenVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl SignedTokenVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self, external_id: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).ok()?;
        mac.update(external_id.as_bytes());
        Some(mac)
    }

    /// Issues a token for `external_id`.
    pub fn issue(&self, external_id: &str) -> Option<String> {
        let signature = self.mac(external_id)?.finalize().into_bytes();
        Some(format!("{external_id}.{}", hex::encode(signature)))
    }
}

impl IdentityVerifier for SignedTokenVerifier {
    fn verify(&self, token: &str) -> Option<String> {
        let (external_id, signature) = token.rsplit_once('.')?;
        if external_id.is_empty() {
            return None;
        }
        let signature = hex::decode(signature).ok()?;
        self.mac(external_id)?.verify_slice(&signature).ok()?;
        Some(external_id.to_string())
    }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

impl CurrentUser {
    /// Fails with `Forbidden` unless the caller has one of `allowed`.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.0.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Access denied for role {}",
                self.0.role.as_str()
            )))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl<S> FromRequestParts<Arc<AppState<S>>> for CurrentUser
where
    S: CommerceStore + Clone + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;
        let external_id = state.identity.verify(token).ok_or_else(|| {
            tracing::debug!("bearer token rejected");
            ApiError::Unauthorized("Invalid token".to_string())
        })?;

        let user = state.users.resolve(&external_id).await?;
        Ok(CurrentUser(user))
    }
}
