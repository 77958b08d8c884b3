use anyhow::Result;

use crate::api::images;
use crate::api::Listing;
use crate::core::ConfigSnapshot;
use crate::store::{Database, NewItem};

#[derive(Debug, Default)]
pub struct IngestReport {
    /// Row ids of newly inserted items, in provider order.
    pub inserted_ids: Vec<i64>,
    pub duplicates: usize,
    pub skipped_blacklisted: usize,
    pub skipped_missing_id: usize,
}

impl IngestReport {
    pub fn inserted(&self) -> usize {
        self.inserted_ids.len()
    }
}

/// First blacklist entry the category matches, if any. Containment is
/// deliberate: "Electronics>Phones" is rejected by a "Phones" entry.
fn blacklist_match<'a>(category: Option<&str>, blacklist: &'a [String]) -> Option<&'a str> {
    let category = category?.to_lowercase();
    blacklist
        .iter()
        .find(|entry| category.contains(&entry.to_lowercase()))
        .map(String::as_str)
}

/// Run one query's listings through the pipeline: reject malformed, filter
/// blacklisted categories, resolve + inline the image, insert-if-absent,
/// and seed price history. Stops once `limit` new items are persisted no
/// matter how many listings the provider returned.
pub async fn ingest_listings(
    db: &Database,
    query_id: i64,
    listings: Vec<Listing>,
    limit: usize,
    image_client: &reqwest::Client,
    snapshot: &ConfigSnapshot,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    for listing in listings {
        if report.inserted() >= limit {
            break;
        }

        if listing.external_id.is_empty() {
            tracing::warn!("Skipping listing without external id: '{}'", listing.title);
            report.skipped_missing_id += 1;
            continue;
        }

        // Cheap rejection before any image traffic
        if let Some(entry) =
            blacklist_match(listing.category.as_deref(), &snapshot.blacklisted_categories)
        {
            tracing::debug!(
                "Skipping {} - category '{}' matches blacklist entry '{}'",
                listing.external_id,
                listing.category.as_deref().unwrap_or(""),
                entry
            );
            report.skipped_blacklisted += 1;
            continue;
        }

        let image_url = listing
            .image_urls
            .first()
            .map(|url| images::resolve_full_image_url(url));

        let image_data = match &image_url {
            Some(url) => {
                images::download_inline_image(image_client, url, snapshot.max_image_bytes).await
            }
            None => None,
        };

        let item = NewItem {
            external_id: listing.external_id.clone(),
            query_id,
            title: listing.title,
            price: listing.price,
            currency: listing.currency,
            url: listing.url,
            image_url,
            image_data,
            brand: listing.brand,
            size: listing.size,
            condition: listing.condition,
            seller: listing.seller,
            location: listing.location,
            category: listing.category,
            description: listing.description,
        };

        match db.insert_item_if_absent(&item).await? {
            Some(item_id) => {
                db.append_price_history(item_id, item.price).await?;
                tracing::info!(
                    "New item {}: '{}' at {} {}",
                    item.external_id,
                    item.title,
                    item.price,
                    item.currency
                );
                report.inserted_ids.push(item_id);
            }
            None => {
                report.duplicates += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewQuery;

    fn listing(external_id: &str, category: Option<&str>) -> Listing {
        Listing {
            external_id: external_id.to_string(),
            title: format!("item {}", external_id),
            price: 10.0,
            currency: "EUR".to_string(),
            url: format!("https://www.marketplace.example/items/{}", external_id),
            image_urls: vec![],
            brand: None,
            size: None,
            condition: None,
            seller: None,
            location: None,
            category: category.map(String::from),
            description: None,
        }
    }

    async fn db_with_query() -> (Database, i64) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let query_id = db
            .insert_query(&NewQuery {
                label: "test".to_string(),
                query_text: "coat".to_string(),
                sort_order: "newest_first".to_string(),
                scan_interval_secs: 300,
                scan_limit: 20,
                ..NewQuery::default()
            })
            .await
            .unwrap();
        (db, query_id)
    }

    #[test]
    fn test_blacklist_substring_containment() {
        let blacklist = vec!["Phones".to_string(), "Toys".to_string()];

        assert_eq!(
            blacklist_match(Some("Electronics>Phones"), &blacklist),
            Some("Phones")
        );
        assert_eq!(blacklist_match(Some("phones"), &blacklist), Some("Phones"));
        assert_eq!(blacklist_match(Some("Electronics"), &blacklist), None);
        assert_eq!(blacklist_match(None, &blacklist), None);
    }

    #[tokio::test]
    async fn test_scenario_blacklist_and_rerun() {
        let (db, query_id) = db_with_query().await;
        let client = reqwest::Client::new();
        let snapshot = ConfigSnapshot {
            blacklisted_categories: vec!["Phones".to_string()],
            ..ConfigSnapshot::default()
        };

        let batch = || {
            vec![
                listing("mp-1", Some("Clothing>Coats")),
                listing("mp-2", Some("Electronics>Phones")),
                listing("mp-3", None),
            ]
        };

        let report = ingest_listings(&db, query_id, batch(), 20, &client, &snapshot)
            .await
            .unwrap();
        assert_eq!(report.inserted(), 2);
        assert_eq!(report.skipped_blacklisted, 1);

        // Same provider response again: everything already known
        let rerun = ingest_listings(&db, query_id, batch(), 20, &client, &snapshot)
            .await
            .unwrap();
        assert_eq!(rerun.inserted(), 0);
        assert_eq!(rerun.duplicates, 2);
        assert_eq!(rerun.skipped_blacklisted, 1);
    }

    #[tokio::test]
    async fn test_limit_invariant() {
        let (db, query_id) = db_with_query().await;
        let client = reqwest::Client::new();
        let snapshot = ConfigSnapshot::default();

        let listings: Vec<Listing> =
            (0..5).map(|i| listing(&format!("mp-{}", i), None)).collect();

        let report = ingest_listings(&db, query_id, listings, 2, &client, &snapshot)
            .await
            .unwrap();

        assert_eq!(report.inserted(), 2);
        assert_eq!(db.count_items_for_query(query_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_id_skipped_not_fatal() {
        let (db, query_id) = db_with_query().await;
        let client = reqwest::Client::new();
        let snapshot = ConfigSnapshot::default();

        let report = ingest_listings(
            &db,
            query_id,
            vec![listing("", None), listing("mp-9", None)],
            20,
            &client,
            &snapshot,
        )
        .await
        .unwrap();

        assert_eq!(report.skipped_missing_id, 1);
        assert_eq!(report.inserted(), 1);
    }

    #[tokio::test]
    async fn test_first_insert_seeds_price_history() {
        let (db, query_id) = db_with_query().await;
        let client = reqwest::Client::new();
        let snapshot = ConfigSnapshot::default();

        let report = ingest_listings(
            &db,
            query_id,
            vec![listing("mp-7", None)],
            20,
            &client,
            &snapshot,
        )
        .await
        .unwrap();
        let item_id = report.inserted_ids[0];
        assert_eq!(db.price_history(item_id).await.unwrap().len(), 1);

        // Duplicate insert appends nothing
        ingest_listings(
            &db,
            query_id,
            vec![listing("mp-7", None)],
            20,
            &client,
            &snapshot,
        )
        .await
        .unwrap();
        assert_eq!(db.price_history(item_id).await.unwrap().len(), 1);
    }
}
