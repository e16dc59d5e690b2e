//! Vendor shops and the products they sell.

use chrono::Utc;
use common::{ProductId, ShopId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use store::{CommerceStore, ProductQuery, ProductRecord, ShopRecord};

use crate::{DomainError, Money};

/// Largest page a product listing returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Product fields as submitted by a vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub stock_quantity: i32,
}

impl ProductInput {
    fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::Validation("name is required".to_string()));
        }
        let price = Money::new(self.price);
        if price.is_zero() || price.is_negative() {
            return Err(DomainError::Validation(format!(
                "price must be positive, got {price}"
            )));
        }
        if self.stock_quantity < 0 {
            return Err(DomainError::Validation(format!(
                "stock_quantity must not be negative, got {}",
                self.stock_quantity
            )));
        }
        Ok(())
    }
}

/// Service for a vendor's shop and product listings.
#[derive(Clone)]
pub struct CatalogService<S: CommerceStore> {
    store: S,
}

impl<S: CommerceStore> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The vendor's shop, or `NotFound` if they have not opened one.
    pub async fn vendor_shop(&self, vendor_id: UserId) -> Result<ShopRecord, DomainError> {
        self.store
            .shop_for_vendor(vendor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("shop", vendor_id))
    }

    /// Opens the vendor's shop. A vendor runs at most one.
    #[tracing::instrument(skip(self))]
    pub async fn open_shop(
        &self,
        vendor_id: UserId,
        name: &str,
    ) -> Result<ShopRecord, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::Validation("name is required".to_string()));
        }
        if self.store.shop_for_vendor(vendor_id).await?.is_some() {
            return Err(DomainError::ShopAlreadyOpen);
        }

        let shop = ShopRecord {
            id: ShopId::new(),
            vendor_id,
            name: name.trim().to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        self.store.insert_shop(shop.clone()).await?;

        tracing::info!(shop_id = %shop.id, "shop opened");
        Ok(shop)
    }

    /// Lists a product in the vendor's shop with its opening stock.
    #[tracing::instrument(skip(self, input))]
    pub async fn create_product(
        &self,
        vendor_id: UserId,
        input: ProductInput,
    ) -> Result<ProductRecord, DomainError> {
        input.validate()?;
        let shop = self.vendor_shop(vendor_id).await?;

        let now = Utc::now();
        let product = ProductRecord {
            id: ProductId::new(),
            shop_id: shop.id,
            name: input.name.trim().to_string(),
            sku: input
                .sku
                .map(|sku| sku.trim().to_string())
                .filter(|sku| !sku.is_empty()),
            price: input.price,
            stock_quantity: input.stock_quantity,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_product(product.clone()).await?;

        metrics::counter!("products_created_total").increment(1);
        tracing::info!(product_id = %product.id, shop_id = %shop.id, "product created");
        Ok(product)
    }

    /// Lists the vendor's own active products.
    ///
    /// The query is always narrowed to the vendor's shop, and pages are
    /// capped at [`MAX_PAGE_SIZE`].
    #[tracing::instrument(skip(self, query))]
    pub async fn list_vendor_products(
        &self,
        vendor_id: UserId,
        mut query: ProductQuery,
    ) -> Result<Vec<ProductRecord>, DomainError> {
        let shop = self.vendor_shop(vendor_id).await?;
        query.shop_id = Some(shop.id);
        query.limit = Some(query.limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE));
        Ok(self.store.list_products(query).await?)
    }
}
