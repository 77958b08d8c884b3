use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;

use crate::scanner::scheduler;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SearchQuery {
    pub id: i64,
    pub label: String,
    pub query_text: String,
    pub category_id: Option<String>,
    pub brand: Option<String>,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub sort_order: String,
    pub scan_interval_secs: i64,
    pub scan_limit: i64,
    pub active: bool,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub total_scans: i64,
    pub total_items: i64,
}

/// Query parameters as written by the management collaborator.
#[derive(Debug, Clone, Default)]
pub struct NewQuery {
    pub label: String,
    pub query_text: String,
    pub category_id: Option<String>,
    pub brand: Option<String>,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub sort_order: String,
    pub scan_interval_secs: i64,
    pub scan_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ItemRecord {
    pub id: i64,
    pub external_id: String,
    pub query_id: i64,
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub url: String,
    pub image_url: Option<String>,
    /// Base64-encoded inline image, size-bounded at ingestion time.
    pub image_data: Option<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub seller: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub is_sent: bool,
    pub found_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub external_id: String,
    pub query_id: i64,
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub url: String,
    pub image_url: Option<String>,
    pub image_data: Option<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub seller: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceHistoryRecord {
    pub id: i64,
    pub item_id: i64,
    pub price: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_queries: usize,
    pub active_queries: usize,
    pub total_items: usize,
    pub unsent_items: usize,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connection_string = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else {
            format!("sqlite://{}?mode=rwc", database_path)
        };

        // An in-memory database is per-connection; pooling more than one
        // connection would hand out empty databases.
        let max_connections = if connection_string.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&connection_string)
            .await?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                query_text TEXT NOT NULL,
                category_id TEXT,
                brand TEXT,
                price_from REAL,
                price_to REAL,
                sort_order TEXT NOT NULL DEFAULT 'newest_first',
                scan_interval_secs INTEGER NOT NULL,
                scan_limit INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                last_scanned_at DATETIME,
                total_scans INTEGER NOT NULL DEFAULT 0,
                total_items INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                query_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                price REAL NOT NULL,
                currency TEXT NOT NULL,
                url TEXT NOT NULL,
                image_url TEXT,
                image_data TEXT,
                brand TEXT,
                size TEXT,
                condition TEXT,
                seller TEXT,
                location TEXT,
                category TEXT,
                description TEXT,
                is_sent INTEGER NOT NULL DEFAULT 0,
                found_at DATETIME NOT NULL,
                sent_at DATETIME,
                FOREIGN KEY (query_id) REFERENCES search_queries(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                price REAL NOT NULL,
                recorded_at DATETIME NOT NULL,
                FOREIGN KEY (item_id) REFERENCES items(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS error_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_items_unsent
            ON items(is_sent, found_at ASC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_items_query
            ON items(query_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_price_history_item
            ON price_history(item_id, recorded_at ASC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Store schema initialized");

        Ok(())
    }

    // ── Search queries ────────────────────────────────────────────────

    pub async fn insert_query(&self, query: &NewQuery) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO search_queries (
                label, query_text, category_id, brand, price_from, price_to,
                sort_order, scan_interval_secs, scan_limit
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&query.label)
        .bind(&query.query_text)
        .bind(&query.category_id)
        .bind(&query.brand)
        .bind(query.price_from)
        .bind(query.price_to)
        .bind(&query.sort_order)
        .bind(query.scan_interval_secs)
        .bind(query.scan_limit)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn set_query_active(&self, query_id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE search_queries SET active = ? WHERE id = ?")
            .bind(active)
            .bind(query_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_active_queries(&self) -> Result<Vec<SearchQuery>> {
        let queries = sqlx::query_as::<_, SearchQuery>(
            r#"
            SELECT * FROM search_queries WHERE active = 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(queries)
    }

    /// Active queries whose scan interval has elapsed, never-scanned first,
    /// then oldest-scanned first.
    pub async fn list_due_queries(&self, now: DateTime<Utc>) -> Result<Vec<SearchQuery>> {
        let active = self.list_active_queries().await?;
        Ok(scheduler::due_queries(active, now))
    }

    /// Records a completed scan attempt, successful or not. One call per
    /// dispatched query per tick.
    pub async fn mark_scanned(&self, query_id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE search_queries
            SET last_scanned_at = ?, total_scans = total_scans + 1
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(query_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn add_items_found(&self, query_id: i64, count: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE search_queries SET total_items = total_items + ? WHERE id = ?
            "#,
        )
        .bind(count)
        .bind(query_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_items_for_query(&self, query_id: i64) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM items WHERE query_id = ?")
                .bind(query_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    // ── Items ─────────────────────────────────────────────────────────

    /// Insert keyed by external id; the UNIQUE constraint is the dedup
    /// guarantee under concurrent scan tasks. Returns the new row id, or
    /// `None` when the listing was already known.
    pub async fn insert_item_if_absent(&self, item: &NewItem) -> Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (
                external_id, query_id, title, price, currency, url,
                image_url, image_data, brand, size, condition, seller,
                location, category, description, is_sent, found_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(&item.external_id)
        .bind(item.query_id)
        .bind(&item.title)
        .bind(item.price)
        .bind(&item.currency)
        .bind(&item.url)
        .bind(&item.image_url)
        .bind(&item.image_data)
        .bind(&item.brand)
        .bind(&item.size)
        .bind(&item.condition)
        .bind(&item.seller)
        .bind(&item.location)
        .bind(&item.category)
        .bind(&item.description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(None)
        } else {
            Ok(Some(result.last_insert_rowid()))
        }
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Option<ItemRecord>> {
        let item = sqlx::query_as::<_, ItemRecord>("SELECT * FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    pub async fn get_item_by_external_id(&self, external_id: &str) -> Result<Option<ItemRecord>> {
        let item = sqlx::query_as::<_, ItemRecord>("SELECT * FROM items WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    pub async fn list_unsent(&self, limit: i64) -> Result<Vec<ItemRecord>> {
        let items = sqlx::query_as::<_, ItemRecord>(
            r#"
            SELECT * FROM items
            WHERE is_sent = 0
            ORDER BY found_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    pub async fn mark_sent(&self, item_id: i64) -> Result<()> {
        sqlx::query("UPDATE items SET is_sent = 1, sent_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ── Price history ─────────────────────────────────────────────────

    pub async fn append_price_history(&self, item_id: i64, price: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history (item_id, price, recorded_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(item_id)
        .bind(price)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn price_history(&self, item_id: i64) -> Result<Vec<PriceHistoryRecord>> {
        let records = sqlx::query_as::<_, PriceHistoryRecord>(
            r#"
            SELECT * FROM price_history
            WHERE item_id = ?
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    // ── Config key/value ──────────────────────────────────────────────

    pub async fn get_config_map(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().collect())
    }

    pub async fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Diagnostics ───────────────────────────────────────────────────

    pub async fn log_error(&self, message: &str, kind: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO error_log (message, kind, created_at) VALUES (?, ?, ?)
            "#,
        )
        .bind(message)
        .bind(kind)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_statistics(&self) -> Result<StoreStatistics> {
        let (total_queries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM search_queries")
            .fetch_one(&self.pool)
            .await?;
        let (active_queries,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM search_queries WHERE active = 1")
                .fetch_one(&self.pool)
                .await?;
        let (total_items,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        let (unsent_items,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM items WHERE is_sent = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreStatistics {
            total_queries: total_queries as usize,
            active_queries: active_queries as usize,
            total_items: total_items as usize,
            unsent_items: unsent_items as usize,
        })
    }
}
