//! Saved addresses and inline address input.

use chrono::Utc;
use common::{AddressId, AddressType, UserId};
use serde::{Deserialize, Serialize};
use store::{AddressRecord, CommerceStore, PostalAddress};

use crate::DomainError;

/// Address fields as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInput {
    pub full_name: String,
    pub phone: String,
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

impl AddressInput {
    /// Checks required fields and returns the trimmed postal address.
    pub fn validate(&self) -> Result<PostalAddress, DomainError> {
        let required = [
            ("full_name", &self.full_name),
            ("phone", &self.phone),
            ("address_line1", &self.address_line1),
            ("city", &self.city),
            ("country", &self.country),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(DomainError::Validation(format!("{field} is required")));
        }

        let optional = |v: &Option<String>| {
            v.as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Ok(PostalAddress {
            full_name: self.full_name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            address_line1: self.address_line1.trim().to_string(),
            address_line2: optional(&self.address_line2),
            city: self.city.trim().to_string(),
            state: optional(&self.state),
            postal_code: optional(&self.postal_code),
            country: self.country.trim().to_string(),
        })
    }

    /// Builds a new address record owned by `user_id`.
    pub fn to_record(
        &self,
        user_id: UserId,
        address_type: AddressType,
        is_default: bool,
    ) -> Result<AddressRecord, DomainError> {
        let now = Utc::now();
        Ok(AddressRecord {
            id: AddressId::new(),
            user_id,
            postal: self.validate()?,
            is_default,
            address_type,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Service for a user's saved addresses.
#[derive(Clone)]
pub struct AddressService<S: CommerceStore> {
    store: S,
}

impl<S: CommerceStore> AddressService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads an address owned by `user_id`. Addresses of other users are not found.
    pub async fn get_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
    ) -> Result<AddressRecord, DomainError> {
        match self.store.get_address(address_id).await? {
            Some(address) if address.user_id == user_id => Ok(address),
            _ => Err(DomainError::not_found("address", address_id)),
        }
    }

    /// Default address first, then newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_addresses(&self, user_id: UserId) -> Result<Vec<AddressRecord>, DomainError> {
        Ok(self.store.list_addresses(user_id).await?)
    }

    pub async fn get_default_address(
        &self,
        user_id: UserId,
    ) -> Result<Option<AddressRecord>, DomainError> {
        Ok(self.store.default_address(user_id).await?)
    }

    /// Saves a shipping address. A default address replaces the previous default.
    #[tracing::instrument(skip(self, input))]
    pub async fn create_address(
        &self,
        user_id: UserId,
        input: AddressInput,
    ) -> Result<AddressRecord, DomainError> {
        let address = input.to_record(user_id, AddressType::Shipping, input.is_default)?;
        self.store.insert_address(address.clone()).await?;
        Ok(address)
    }

    /// Replaces the postal fields. The default flag is changed through
    /// [`set_default_address`](Self::set_default_address).
    #[tracing::instrument(skip(self, input))]
    pub async fn update_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
        input: AddressInput,
    ) -> Result<AddressRecord, DomainError> {
        self.get_address(user_id, address_id).await?;
        let postal = input.validate()?;
        Ok(self.store.update_address(address_id, postal).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
    ) -> Result<(), DomainError> {
        self.get_address(user_id, address_id).await?;
        Ok(self.store.delete_address(address_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_default_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
    ) -> Result<AddressRecord, DomainError> {
        self.store.set_default_address(user_id, address_id).await?;
        self.get_address(user_id, address_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> AddressInput {
        AddressInput {
            full_name: " Sita Gurung ".to_string(),
            phone: "9801234567".to_string(),
            address_line1: "Lakeside Road".to_string(),
            address_line2: Some("  ".to_string()),
            city: "Pokhara".to_string(),
            state: Some("Gandaki".to_string()),
            postal_code: None,
            country: "Nepal".to_string(),
            is_default: false,
        }
    }

    #[test]
    fn validate_trims_and_drops_blank_optionals() {
        let postal = input().validate().unwrap();
        assert_eq!(postal.full_name, "Sita Gurung");
        assert_eq!(postal.address_line2, None);
        assert_eq!(postal.state.as_deref(), Some("Gandaki"));
    }

    #[test]
    fn validate_names_missing_field() {
        let mut missing = input();
        missing.city = "   ".to_string();
        let err = missing.validate().unwrap_err();
        assert_eq!(err.to_string(), "city is required");
    }
}
