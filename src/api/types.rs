use serde::{Deserialize, Serialize};

/// Source tag prepended to provider ids so items from a future second
/// source cannot collide on the UNIQUE external_id column.
pub const ID_PREFIX: &str = "mp";

/// Search parameters for one catalog query, copied out of a stored
/// SearchQuery row.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query_text: String,
    pub category_id: Option<String>,
    pub brand: Option<String>,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub sort_order: String,
}

impl SearchParams {
    pub fn from_query(query: &crate::store::SearchQuery) -> Self {
        Self {
            query_text: query.query_text.clone(),
            category_id: query.category_id.clone(),
            brand: query.brand.clone(),
            price_from: query.price_from,
            price_to: query.price_to,
            sort_order: query.sort_order.clone(),
        }
    }
}

/// A marketplace listing as surfaced by the search provider. Built once at
/// the provider boundary and passed through the pipeline unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub external_id: String,
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub url: String,
    pub image_urls: Vec<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub seller: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

// ── Raw provider DTOs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogResponse {
    pub items: Vec<RawListing>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawListing {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: RawPrice,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub photos: Vec<RawPhoto>,
    #[serde(default)]
    pub brand_title: Option<String>,
    #[serde(default)]
    pub size_title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub seller_login: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub category_title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPrice {
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub currency_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPhoto {
    pub url: String,
}

impl RawListing {
    /// Boundary conversion: one named-field Listing, provider id prefixed.
    /// A listing the provider returned without an id keeps an empty
    /// external_id; the ingestion pipeline rejects and counts it.
    pub fn into_listing(self, base_url: &str) -> Listing {
        let url = match (self.url.is_empty(), self.id) {
            (false, _) => self.url,
            (true, Some(id)) => format!("{}/items/{}", base_url.trim_end_matches('/'), id),
            (true, None) => String::new(),
        };

        Listing {
            external_id: self
                .id
                .map(|id| format!("{}-{}", ID_PREFIX, id))
                .unwrap_or_default(),
            title: self.title,
            price: self.price.amount.parse().unwrap_or(0.0),
            currency: if self.price.currency_code.is_empty() {
                "EUR".to_string()
            } else {
                self.price.currency_code
            },
            url,
            image_urls: self.photos.into_iter().map(|p| p.url).collect(),
            brand: self.brand_title,
            size: self.size_title,
            condition: self.status,
            seller: self.seller_login,
            location: self.city,
            category: self.category_title,
            description: self.description,
        }
    }
}
