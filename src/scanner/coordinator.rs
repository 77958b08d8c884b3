use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::ingest::{self, IngestReport};
use crate::api::client::{MarketplaceClient, SearchProvider};
use crate::api::SearchParams;
use crate::core::config::MarketplaceConfig;
use crate::core::ConfigSnapshot;
use crate::proxy::{ProxyEntry, ProxyRotator};
use crate::store::{Database, SearchQuery};

/// Builds the per-task search client. Every scan task gets its own
/// instance; nothing session-shaped crosses task boundaries.
pub trait ProviderFactory: Send + Sync {
    fn make(&self, proxy: Option<&ProxyEntry>) -> Result<Box<dyn SearchProvider>>;
}

pub struct MarketplaceProviderFactory {
    config: MarketplaceConfig,
}

impl MarketplaceProviderFactory {
    pub fn new(config: MarketplaceConfig) -> Self {
        Self { config }
    }
}

impl ProviderFactory for MarketplaceProviderFactory {
    fn make(&self, proxy: Option<&ProxyEntry>) -> Result<Box<dyn SearchProvider>> {
        Ok(Box::new(MarketplaceClient::new(&self.config, proxy)?))
    }
}

#[derive(Debug, Default, Clone)]
pub struct TickStats {
    pub due: usize,
    pub scanned: usize,
    pub failed: usize,
    pub new_items: usize,
}

struct ScanOutcome {
    report: IngestReport,
    fetched: usize,
}

/// Executes one tick's due queries on a bounded worker pool with bulkhead
/// isolation between tasks.
pub struct ScanCoordinator {
    db: Arc<Database>,
    factory: Arc<dyn ProviderFactory>,
    rotator: Arc<ProxyRotator>,
    marketplace: MarketplaceConfig,
}

impl ScanCoordinator {
    pub fn new(
        db: Arc<Database>,
        factory: Arc<dyn ProviderFactory>,
        rotator: Arc<ProxyRotator>,
        marketplace: MarketplaceConfig,
    ) -> Self {
        Self {
            db,
            factory,
            rotator,
            marketplace,
        }
    }

    pub async fn run_tick(
        &self,
        now: DateTime<Utc>,
        snapshot: &Arc<ConfigSnapshot>,
    ) -> Result<TickStats> {
        let due = self.db.list_due_queries(now).await?;
        if due.is_empty() {
            return Ok(TickStats::default());
        }

        let mut stats = TickStats {
            due: due.len(),
            ..TickStats::default()
        };
        tracing::info!("Tick: {} due queries", due.len());

        let cap = due.len().min(snapshot.scan_worker_cap.max(1));
        let semaphore = Arc::new(Semaphore::new(cap));

        let mut handles = Vec::with_capacity(due.len());
        for query in due {
            let semaphore = semaphore.clone();
            let db = self.db.clone();
            let factory = self.factory.clone();
            let rotator = self.rotator.clone();
            let marketplace = self.marketplace.clone();
            let snapshot = snapshot.clone();
            let query_id = query.id;

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("scan semaphore");
                scan_query(&db, factory.as_ref(), &rotator, &marketplace, &snapshot, query).await
            });
            handles.push((query_id, handle));
        }

        for (query_id, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    stats.scanned += 1;
                    stats.new_items += outcome.report.inserted();

                    if outcome.report.inserted() > 0 {
                        if let Err(e) = self
                            .db
                            .add_items_found(query_id, outcome.report.inserted() as i64)
                            .await
                        {
                            tracing::error!("Failed to bump item counter for {}: {}", query_id, e);
                        }
                    }

                    tracing::info!(
                        "Query {} scanned: {} fetched, {} new, {} duplicate, {} blacklisted",
                        query_id,
                        outcome.fetched,
                        outcome.report.inserted(),
                        outcome.report.duplicates,
                        outcome.report.skipped_blacklisted
                    );
                }
                Ok(Err(e)) => {
                    // Bulkhead: this query's failure stops here
                    stats.failed += 1;
                    tracing::error!("Scan failed for query {}: {:#}", query_id, e);
                    if let Err(log_err) = self
                        .db
                        .log_error(&format!("scan failed for query {}: {:#}", query_id, e), "search")
                        .await
                    {
                        tracing::error!("Failed to record scan error: {}", log_err);
                    }
                }
                Err(join_err) => {
                    stats.failed += 1;
                    tracing::error!("Scan task for query {} panicked: {}", query_id, join_err);
                    if let Err(log_err) = self
                        .db
                        .log_error(&format!("scan task panicked for query {}", query_id), "search")
                        .await
                    {
                        tracing::error!("Failed to record scan panic: {}", log_err);
                    }
                }
            }

            // Exactly once per dispatched query, success or failure, so a
            // permanently failing query cannot hot-loop.
            if let Err(e) = self.db.mark_scanned(query_id, Utc::now()).await {
                tracing::error!("Failed to mark query {} scanned: {}", query_id, e);
            }
        }

        Ok(stats)
    }
}

/// Effective fetch limit: a query with no persisted items yet gets a
/// boosted first scan to backfill, hard-capped.
fn effective_limit(scan_limit: i64, owned_items: i64, snapshot: &ConfigSnapshot) -> usize {
    let base = scan_limit.max(0) as usize;
    if owned_items == 0 {
        (base * snapshot.first_scan_multiplier as usize).min(snapshot.first_scan_cap)
    } else {
        base
    }
}

async fn scan_query(
    db: &Database,
    factory: &dyn ProviderFactory,
    rotator: &ProxyRotator,
    marketplace: &MarketplaceConfig,
    snapshot: &ConfigSnapshot,
    query: SearchQuery,
) -> Result<ScanOutcome> {
    let owned = db.count_items_for_query(query.id).await?;
    let limit = effective_limit(query.scan_limit, owned, snapshot);

    let proxy = rotator.current().await;
    let provider = factory.make(proxy.as_ref())?;
    let params = SearchParams::from_query(&query);

    let listings = match provider.search(&params, limit).await {
        Ok(listings) => listings,
        Err(e) => {
            // A dead proxy looks like a failed search; rotate past it and
            // let the next tick retry directly or through another proxy.
            if proxy.is_some() {
                rotator.mark_failed().await;
            }
            return Err(e);
        }
    };

    let fetched = listings.len();
    let image_client = MarketplaceClient::direct(marketplace)?;
    let report = ingest::ingest_listings(db, query.id, listings, limit, &image_client, snapshot).await?;

    Ok(ScanOutcome { report, fetched })
}
