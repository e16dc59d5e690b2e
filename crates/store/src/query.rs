use common::ShopId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sort order for product listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Name,
}

impl ProductSort {
    pub(crate) fn order_by(&self) -> &'static str {
        match self {
            ProductSort::Newest => "created_at DESC",
            ProductSort::PriceAsc => "price ASC",
            ProductSort::PriceDesc => "price DESC",
            ProductSort::Name => "name ASC",
        }
    }
}

/// Builder for product listing queries.
///
/// Only active products are ever listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductQuery {
    /// Case-insensitive substring match on the product name.
    pub search: Option<String>,

    /// Minimum price (inclusive).
    pub min_price: Option<Decimal>,

    /// Maximum price (inclusive).
    pub max_price: Option<Decimal>,

    pub shop_id: Option<ShopId>,

    #[serde(default)]
    pub sort: ProductSort,

    pub limit: Option<usize>,

    pub offset: Option<usize>,
}

impl ProductQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a single shop's products.
    pub fn for_shop(shop_id: ShopId) -> Self {
        Self {
            shop_id: Some(shop_id),
            ..Default::default()
        }
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn price_between(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_price = Some(min);
        self.max_price = Some(max);
        self
    }

    pub fn sort(mut self, sort: ProductSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}
