//! HTTP handlers, one module per resource.

pub mod addresses;
pub mod cart;
pub mod checkout;
pub mod ops;
pub mod orders;
pub mod vendor;
pub mod webhooks;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a UUID path segment into a typed id.
pub(crate) fn parse_id<T>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what} id: {e}")))
}
