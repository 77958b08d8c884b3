use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::{CatalogResponse, Listing, SearchParams};
use crate::core::config::MarketplaceConfig;
use crate::proxy::ProxyEntry;

/// Seam between the scan pipeline and the marketplace wire protocol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, params: &SearchParams, limit: usize) -> Result<Vec<Listing>>;
}

/// HTTP client for the marketplace catalog API.
///
/// Scan tasks each construct their own instance; the underlying session
/// state is not shared across concurrent tasks.
pub struct MarketplaceClient {
    http: Client,
    base_url: String,
}

impl MarketplaceClient {
    pub fn new(config: &MarketplaceConfig, proxy: Option<&ProxyEntry>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(entry) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(entry.canonical_url())?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Plain client for image downloads and probes; same timeout, no proxy.
    pub fn direct(config: &MarketplaceConfig) -> Result<Client> {
        Ok(Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Marketplace API error: {} - {}", status, body);
            anyhow::bail!("marketplace request failed: {} {}", status, path);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse marketplace response for {}", path))
    }
}

#[async_trait]
impl SearchProvider for MarketplaceClient {
    async fn search(&self, params: &SearchParams, limit: usize) -> Result<Vec<Listing>> {
        let mut query: Vec<(&str, String)> = vec![
            ("search_text", params.query_text.clone()),
            ("per_page", limit.to_string()),
            ("order", params.sort_order.clone()),
            ("page", "1".to_string()),
        ];
        if let Some(category_id) = &params.category_id {
            query.push(("catalog_ids", category_id.clone()));
        }
        if let Some(brand) = &params.brand {
            query.push(("brand_ids", brand.clone()));
        }
        if let Some(from) = params.price_from {
            query.push(("price_from", from.to_string()));
        }
        if let Some(to) = params.price_to {
            query.push(("price_to", to.to_string()));
        }

        let response: CatalogResponse = self.get_json("/api/v2/catalog/items", &query).await?;

        // Provider order is preserved; the caller's limit bounds the page
        // size but a generous provider is still truncated here.
        let mut listings: Vec<Listing> = response
            .items
            .into_iter()
            .map(|raw| raw.into_listing(&self.base_url))
            .collect();
        listings.truncate(limit);

        Ok(listings)
    }
}
