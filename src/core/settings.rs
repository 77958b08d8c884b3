use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::store::Database;

/// Keys read from the persisted config table. Anything else in the table
/// belongs to the management UI and is ignored here.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "blacklisted_categories",
    "proxy_list",
    "proxy_strategy",
    "proxy_rotate_every",
    "currency_rate",
    "display_currency",
    "dispatch_batch_size",
    "send_attempts",
    "send_retry_delay_secs",
    "first_scan_multiplier",
    "first_scan_cap",
    "scan_worker_cap",
    "max_image_bytes",
];

/// Immutable view of the mutable tunables. Replaced wholesale on reload,
/// never patched in place; dependents hold the Arc they were handed for the
/// duration of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub blacklisted_categories: Vec<String>,
    pub proxy_list: Vec<String>,
    pub proxy_strategy: String,
    pub proxy_rotate_every: u32,
    pub currency_rate: f64,
    pub display_currency: String,
    pub dispatch_batch_size: usize,
    pub send_attempts: u32,
    pub send_retry_delay_secs: u64,
    pub first_scan_multiplier: u32,
    pub first_scan_cap: usize,
    pub scan_worker_cap: usize,
    pub max_image_bytes: usize,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            version: 1,
            blacklisted_categories: Vec::new(),
            proxy_list: Vec::new(),
            proxy_strategy: "round_robin".to_string(),
            proxy_rotate_every: 25,
            currency_rate: 1.0,
            display_currency: "EUR".to_string(),
            dispatch_batch_size: 10,
            send_attempts: 3,
            send_retry_delay_secs: 5,
            first_scan_multiplier: 10,
            first_scan_cap: 200,
            scan_worker_cap: 5,
            max_image_bytes: 1_500_000,
        }
    }
}

impl ConfigSnapshot {
    /// Build a candidate snapshot from the persisted key/value map, keeping
    /// `prev`'s value for any key that is absent or fails to parse.
    fn from_map(prev: &ConfigSnapshot, map: &HashMap<String, String>) -> Self {
        let mut next = prev.clone();

        if let Some(raw) = map.get("blacklisted_categories") {
            next.blacklisted_categories = split_list(raw);
        }
        if let Some(raw) = map.get("proxy_list") {
            next.proxy_list = split_list(raw);
        }
        if let Some(raw) = map.get("proxy_strategy") {
            next.proxy_strategy = raw.trim().to_string();
        }
        parse_into(map, "proxy_rotate_every", &mut next.proxy_rotate_every);
        parse_into(map, "currency_rate", &mut next.currency_rate);
        if let Some(raw) = map.get("display_currency") {
            next.display_currency = raw.trim().to_string();
        }
        parse_into(map, "dispatch_batch_size", &mut next.dispatch_batch_size);
        parse_into(map, "send_attempts", &mut next.send_attempts);
        parse_into(map, "send_retry_delay_secs", &mut next.send_retry_delay_secs);
        parse_into(map, "first_scan_multiplier", &mut next.first_scan_multiplier);
        parse_into(map, "first_scan_cap", &mut next.first_scan_cap);
        parse_into(map, "scan_worker_cap", &mut next.scan_worker_cap);
        parse_into(map, "max_image_bytes", &mut next.max_image_bytes);

        next
    }

    fn proxy_settings_differ(&self, other: &ConfigSnapshot) -> bool {
        self.proxy_list != other.proxy_list
            || self.proxy_strategy != other.proxy_strategy
            || self.proxy_rotate_every != other.proxy_rotate_every
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_into<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, slot: &mut T) {
    if let Some(raw) = map.get(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => {
                tracing::warn!("Ignoring unparsable config value for '{}': {}", key, raw);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReloadOutcome {
    /// Attempted too soon after the previous attempt.
    Skipped,
    /// Persisted values match the applied snapshot; nothing happened.
    Unchanged,
    Changed { proxies_changed: bool },
}

/// Hot-reloadable settings backed by the store's config table.
pub struct SettingsStore {
    db: Arc<Database>,
    current: RwLock<Arc<ConfigSnapshot>>,
    last_attempt: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl SettingsStore {
    pub fn new(db: Arc<Database>, min_interval: Duration) -> Self {
        Self {
            db,
            current: RwLock::new(Arc::new(ConfigSnapshot::default())),
            last_attempt: Mutex::new(None),
            min_interval,
        }
    }

    /// Initial load at startup. Unlike `maybe_reload` this is never skipped
    /// and never a no-op.
    pub async fn load(&self) -> Result<Arc<ConfigSnapshot>> {
        let map = self.db.get_config_map().await?;
        let snapshot = Arc::new(ConfigSnapshot::from_map(&ConfigSnapshot::default(), &map));
        *self.current.write().await = snapshot.clone();
        *self.last_attempt.lock().await = Some(Instant::now());

        tracing::info!(
            "Settings loaded: {} blacklisted categories, {} proxies, worker cap {}",
            snapshot.blacklisted_categories.len(),
            snapshot.proxy_list.len(),
            snapshot.scan_worker_cap
        );

        Ok(snapshot)
    }

    pub async fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().await.clone()
    }

    /// Re-read the config table and swap in a new snapshot if anything
    /// recognized changed. Rate-limited to one attempt per `min_interval`.
    pub async fn maybe_reload(&self) -> Result<ReloadOutcome> {
        {
            let mut last = self.last_attempt.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < self.min_interval {
                    return Ok(ReloadOutcome::Skipped);
                }
            }
            *last = Some(Instant::now());
        }

        let map = self.db.get_config_map().await?;
        let prev = self.current.read().await.clone();
        let candidate = ConfigSnapshot::from_map(&prev, &map);

        if candidate == *prev {
            return Ok(ReloadOutcome::Unchanged);
        }

        let proxies_changed = candidate.proxy_settings_differ(&prev);
        let next = Arc::new(ConfigSnapshot {
            version: prev.version + 1,
            ..candidate
        });

        tracing::info!(
            "Settings reloaded: v{} -> v{}{}",
            prev.version,
            next.version,
            if proxies_changed {
                " (proxy settings changed, pool rebuild required)"
            } else {
                ""
            }
        );

        *self.current.write().await = next;
        Ok(ReloadOutcome::Changed { proxies_changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_map_parses_recognized_keys() {
        let map = map_of(&[
            ("blacklisted_categories", "Phones, Accessories"),
            ("currency_rate", "4.32"),
            ("scan_worker_cap", "8"),
            ("unrelated_ui_key", "whatever"),
        ]);

        let snapshot = ConfigSnapshot::from_map(&ConfigSnapshot::default(), &map);

        assert_eq!(
            snapshot.blacklisted_categories,
            vec!["Phones".to_string(), "Accessories".to_string()]
        );
        assert_eq!(snapshot.currency_rate, 4.32);
        assert_eq!(snapshot.scan_worker_cap, 8);
        // Unrecognized keys leave defaults untouched
        assert_eq!(snapshot.dispatch_batch_size, 10);
    }

    #[test]
    fn test_from_map_keeps_previous_on_parse_failure() {
        let prev = ConfigSnapshot {
            send_attempts: 7,
            ..ConfigSnapshot::default()
        };
        let map = map_of(&[("send_attempts", "not-a-number")]);

        let snapshot = ConfigSnapshot::from_map(&prev, &map);
        assert_eq!(snapshot.send_attempts, 7);
    }

    #[test]
    fn test_proxy_settings_diff_detection() {
        let base = ConfigSnapshot::default();
        let mut other = base.clone();
        assert!(!base.proxy_settings_differ(&other));

        other.proxy_list = vec!["10.0.0.1:8080".to_string()];
        assert!(base.proxy_settings_differ(&other));

        let mut strategy_only = base.clone();
        strategy_only.proxy_strategy = "random".to_string();
        assert!(base.proxy_settings_differ(&strategy_only));
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        db.set_config_value("currency_rate", "2.5").await.unwrap();

        let settings = SettingsStore::new(db.clone(), Duration::ZERO);
        settings.load().await.unwrap();
        assert_eq!(settings.snapshot().await.currency_rate, 2.5);

        // Nothing changed since load
        assert_eq!(
            settings.maybe_reload().await.unwrap(),
            ReloadOutcome::Unchanged
        );

        db.set_config_value("currency_rate", "3.0").await.unwrap();
        assert_eq!(
            settings.maybe_reload().await.unwrap(),
            ReloadOutcome::Changed {
                proxies_changed: false
            }
        );
        assert_eq!(settings.snapshot().await.currency_rate, 3.0);
        assert_eq!(settings.snapshot().await.version, 2);

        // And again: same rows, no side effects
        assert_eq!(
            settings.maybe_reload().await.unwrap(),
            ReloadOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_reload_flags_proxy_change() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let settings = SettingsStore::new(db.clone(), Duration::ZERO);
        settings.load().await.unwrap();

        db.set_config_value("proxy_list", "10.0.0.1:8080,10.0.0.2:8080")
            .await
            .unwrap();
        assert_eq!(
            settings.maybe_reload().await.unwrap(),
            ReloadOutcome::Changed {
                proxies_changed: true
            }
        );
    }

    #[tokio::test]
    async fn test_reload_respects_min_interval() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let settings = SettingsStore::new(db.clone(), Duration::from_secs(3600));
        settings.load().await.unwrap();

        db.set_config_value("currency_rate", "9.9").await.unwrap();
        // Too soon after load; the change is not picked up yet
        assert_eq!(
            settings.maybe_reload().await.unwrap(),
            ReloadOutcome::Skipped
        );
        assert_eq!(settings.snapshot().await.currency_rate, 1.0);
    }
}
