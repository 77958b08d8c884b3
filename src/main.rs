use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use marketplace_scout_bot::core::{self, Config, HealthChecker, ReloadOutcome, SettingsStore};
use marketplace_scout_bot::notifier::{NotificationDispatcher, TelegramClient};
use marketplace_scout_bot::proxy::{ProxyPool, ProxyRotator, SelectionStrategy};
use marketplace_scout_bot::scanner::{MarketplaceProviderFactory, ScanCoordinator};
use marketplace_scout_bot::store::Database;

#[tokio::main]
async fn main() -> Result<()> {
    // Missing credentials abort here and only here
    let config = Config::from_env()?;

    core::logging::init_logging(&config.monitoring.log_level);

    tracing::info!("🔎 Marketplace Scout Bot starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Marketplace: {}", config.marketplace.base_url);

    let db = Arc::new(Database::new(&config.database.sqlite_path).await?);
    let stats = db.get_statistics().await?;
    tracing::info!(
        "Store: {} queries ({} active), {} items ({} unsent)",
        stats.total_queries,
        stats.active_queries,
        stats.total_items,
        stats.unsent_items
    );

    let health_checker = Arc::new(HealthChecker::new());
    health_checker.update_component("database", true).await;

    let health_clone = health_checker.clone();
    let health_port = config.monitoring.health_port;
    tokio::spawn(async move { start_health_server(health_clone, health_port).await });
    tracing::info!("✅ Health endpoint running on port {}", health_port);

    let settings = Arc::new(SettingsStore::new(
        db.clone(),
        Duration::from_secs(config.runtime.min_reload_interval_secs),
    ));
    let snapshot = settings.load().await?;

    let pool = Arc::new(ProxyPool::new(
        config.marketplace.base_url.clone(),
        SelectionStrategy::from_name(&snapshot.proxy_strategy),
    ));
    pool.rebuild(
        &snapshot.proxy_list,
        SelectionStrategy::from_name(&snapshot.proxy_strategy),
    )
    .await;

    let factory = Arc::new(MarketplaceProviderFactory::new(config.marketplace.clone()));
    let mut rotator = Arc::new(ProxyRotator::new(pool.clone(), snapshot.proxy_rotate_every));
    let mut coordinator = ScanCoordinator::new(
        db.clone(),
        factory.clone(),
        rotator.clone(),
        config.marketplace.clone(),
    );

    let sink = Arc::new(TelegramClient::new(&config.telegram)?);
    let dispatcher =
        NotificationDispatcher::new(db.clone(), sink, config.telegram.chat_id.clone());

    let revalidate_interval = Duration::from_secs(config.runtime.proxy_revalidate_interval_secs);
    let mut last_revalidation = Instant::now();

    // One cooperative loop drives everything: reload check, proxy upkeep,
    // due-query scans, then notification dispatch.
    let mut interval =
        tokio::time::interval(Duration::from_secs(config.runtime.tick_interval_secs));

    loop {
        interval.tick().await;

        match settings.maybe_reload().await {
            Ok(ReloadOutcome::Changed { proxies_changed }) if proxies_changed => {
                let snap = settings.snapshot().await;
                let strategy = SelectionStrategy::from_name(&snap.proxy_strategy);
                // Partial patching of rotation state is unsafe; tear down
                // and rebuild, and drop any rotator affinity with it.
                pool.rebuild(&snap.proxy_list, strategy).await;
                rotator = Arc::new(ProxyRotator::new(pool.clone(), snap.proxy_rotate_every));
                coordinator = ScanCoordinator::new(
                    db.clone(),
                    factory.clone(),
                    rotator.clone(),
                    config.marketplace.clone(),
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Settings reload failed: {:#}", e);
                let _ = db.log_error(&format!("settings reload failed: {:#}", e), "config").await;
            }
        }

        if last_revalidation.elapsed() >= revalidate_interval {
            last_revalidation = Instant::now();
            pool.revalidate_failed().await;
        }

        let snapshot = settings.snapshot().await;
        let pool_ok = snapshot.proxy_list.is_empty() || !pool.is_empty().await;
        health_checker.update_component("proxy_pool", pool_ok).await;

        match coordinator.run_tick(Utc::now(), &snapshot).await {
            Ok(stats) => {
                if stats.due > 0 {
                    tracing::info!(
                        "Tick done: {}/{} queries scanned, {} new items",
                        stats.scanned,
                        stats.due,
                        stats.new_items
                    );
                }
                health_checker
                    .update_component("marketplace_api", stats.failed < stats.due || stats.due == 0)
                    .await;
            }
            Err(e) => {
                tracing::error!("Scan tick failed: {:#}", e);
                health_checker.update_component("marketplace_api", false).await;
                let _ = db.log_error(&format!("scan tick failed: {:#}", e), "search").await;
            }
        }

        match dispatcher.dispatch_pending(&snapshot).await {
            Ok(stats) => {
                health_checker
                    .update_component("telegram_api", stats.failed == 0)
                    .await;
            }
            Err(e) => {
                tracing::error!("Dispatch failed: {:#}", e);
                health_checker.update_component("telegram_api", false).await;
                let _ = db.log_error(&format!("dispatch failed: {:#}", e), "notify").await;
            }
        }
    }
}

async fn start_health_server(health_checker: Arc<HealthChecker>, port: u16) {
    use warp::Filter;

    let health = warp::path("health")
        .and(warp::any().map(move || health_checker.clone()))
        .and_then(|checker: Arc<HealthChecker>| async move {
            let status = checker.get_status().await;
            Ok::<_, warp::Rejection>(warp::reply::json(&status))
        });

    warp::serve(health).run(([0, 0, 0, 0], port)).await;
}
