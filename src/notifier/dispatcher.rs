use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::message;
use super::telegram::{LinkButton, MessagingSink, PhotoSource, SendOutcome};
use crate::core::ConfigSnapshot;
use crate::store::{Database, ItemRecord};

#[derive(Debug, Default, Clone)]
pub struct DispatchStats {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
}

enum Payload {
    Photo(PhotoSource),
    Text,
}

/// Delivers unsent items oldest-first in bounded batches. Items are marked
/// sent only after a confirmed delivery; anything else stays queued for the
/// next invocation (at-least-once).
pub struct NotificationDispatcher {
    db: Arc<Database>,
    sink: Arc<dyn MessagingSink>,
    chat_id: String,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<Database>, sink: Arc<dyn MessagingSink>, chat_id: String) -> Self {
        Self { db, sink, chat_id }
    }

    pub async fn dispatch_pending(&self, snapshot: &ConfigSnapshot) -> Result<DispatchStats> {
        let items = self
            .db
            .list_unsent(snapshot.dispatch_batch_size as i64)
            .await?;

        let mut stats = DispatchStats::default();

        for item in items {
            stats.processed += 1;

            match self.deliver(&item, snapshot).await {
                Ok(true) => {
                    self.db.mark_sent(item.id).await?;
                    stats.sent += 1;
                }
                Ok(false) => {
                    stats.failed += 1;
                    tracing::warn!(
                        "Giving up on {} this round after {} attempts; will retry next invocation",
                        item.external_id,
                        snapshot.send_attempts
                    );
                    if let Err(e) = self
                        .db
                        .log_error(
                            &format!("notification attempts exhausted for {}", item.external_id),
                            "notify",
                        )
                        .await
                    {
                        tracing::error!("Failed to record notify error: {}", e);
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!("Delivery error for {}: {:#}", item.external_id, e);
                    if let Err(log_err) = self
                        .db
                        .log_error(
                            &format!("notification error for {}: {:#}", item.external_id, e),
                            "notify",
                        )
                        .await
                    {
                        tracing::error!("Failed to record notify error: {}", log_err);
                    }
                }
            }
        }

        if stats.processed > 0 {
            tracing::info!(
                "Dispatched {}/{} notifications ({} failed)",
                stats.sent,
                stats.processed,
                stats.failed
            );
        }

        Ok(stats)
    }

    /// True when the item was delivered in photo or text form.
    async fn deliver(&self, item: &ItemRecord, snapshot: &ConfigSnapshot) -> Result<bool> {
        let caption = message::build_caption(item, snapshot);
        let actions = message::link_actions(item);

        match photo_source(item) {
            Some(photo) => {
                if self
                    .send_with_retries(Payload::Photo(photo), &caption, &actions, snapshot)
                    .await?
                {
                    return Ok(true);
                }

                // Photo attempts exhausted: one text-only fallback
                tracing::warn!(
                    "Photo delivery exhausted for {}, falling back to text",
                    item.external_id
                );
                let fallback = ConfigSnapshot {
                    send_attempts: 1,
                    ..snapshot.clone()
                };
                self.send_with_retries(Payload::Text, &caption, &actions, &fallback)
                    .await
            }
            None => {
                self.send_with_retries(Payload::Text, &caption, &actions, snapshot)
                    .await
            }
        }
    }

    /// Up to `send_attempts` tries with a fixed delay. A rate-limit signal
    /// sleeps the sink-specified cooldown and retries in place without
    /// consuming an attempt.
    async fn send_with_retries(
        &self,
        payload: Payload,
        caption: &str,
        actions: &[LinkButton],
        snapshot: &ConfigSnapshot,
    ) -> Result<bool> {
        let attempts = snapshot.send_attempts.max(1);
        let delay = Duration::from_secs(snapshot.send_retry_delay_secs);
        let mut attempt = 0u32;

        while attempt < attempts {
            let outcome = match &payload {
                Payload::Photo(photo) => {
                    self.sink
                        .send_photo(&self.chat_id, photo.clone(), caption, actions)
                        .await?
                }
                Payload::Text => self.sink.send_text(&self.chat_id, caption, actions).await?,
            };

            match outcome {
                SendOutcome::Sent => return Ok(true),
                SendOutcome::RateLimited { retry_after_secs } => {
                    tracing::warn!("Sink rate limited, cooling down {}s", retry_after_secs);
                    sleep(Duration::from_secs(retry_after_secs)).await;
                }
                SendOutcome::Rejected { description } => {
                    attempt += 1;
                    tracing::warn!(
                        "Send rejected (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        description
                    );
                    if attempt < attempts {
                        sleep(delay).await;
                    }
                }
            }
        }

        Ok(false)
    }
}

fn photo_source(item: &ItemRecord) -> Option<PhotoSource> {
    if let Some(data) = &item.image_data {
        match general_purpose::STANDARD.decode(data) {
            Ok(bytes) => return Some(PhotoSource::Inline(bytes)),
            Err(e) => {
                tracing::warn!("Corrupt inline image for {}: {}", item.external_id, e);
            }
        }
    }
    item.image_url.clone().map(PhotoSource::Url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::telegram::MockMessagingSink;
    use crate::store::{NewItem, NewQuery};

    fn fast_snapshot() -> ConfigSnapshot {
        ConfigSnapshot {
            send_attempts: 2,
            send_retry_delay_secs: 0,
            ..ConfigSnapshot::default()
        }
    }

    async fn db_with_items(specs: &[(&str, Option<&str>)]) -> Arc<Database> {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let query_id = db
            .insert_query(&NewQuery {
                label: "q".to_string(),
                query_text: "coat".to_string(),
                sort_order: "newest_first".to_string(),
                scan_interval_secs: 300,
                scan_limit: 20,
                ..NewQuery::default()
            })
            .await
            .unwrap();

        for (external_id, image_url) in specs {
            db.insert_item_if_absent(&NewItem {
                external_id: external_id.to_string(),
                query_id,
                title: format!("item {}", external_id),
                price: 10.0,
                currency: "EUR".to_string(),
                url: format!("https://www.marketplace.example/items/{}", external_id),
                image_url: image_url.map(String::from),
                ..NewItem::default()
            })
            .await
            .unwrap();
        }

        Arc::new(db)
    }

    #[tokio::test]
    async fn test_text_item_sent_and_marked() {
        let db = db_with_items(&[("mp-1", None)]).await;

        let mut sink = MockMessagingSink::new();
        sink.expect_send_text()
            .times(1)
            .returning(|_, _, _| Ok(SendOutcome::Sent));

        let dispatcher = NotificationDispatcher::new(db.clone(), Arc::new(sink), "42".to_string());
        let stats = dispatcher.dispatch_pending(&fast_snapshot()).await.unwrap();

        assert_eq!(stats.sent, 1);
        assert!(db.list_unsent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_item_stays_unsent_then_retries() {
        let db = db_with_items(&[("mp-1", None)]).await;

        let mut failing = MockMessagingSink::new();
        failing
            .expect_send_text()
            .times(2) // send_attempts
            .returning(|_, _, _| {
                Ok(SendOutcome::Rejected {
                    description: "boom".to_string(),
                })
            });

        let dispatcher =
            NotificationDispatcher::new(db.clone(), Arc::new(failing), "42".to_string());
        let stats = dispatcher.dispatch_pending(&fast_snapshot()).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(db.list_unsent(10).await.unwrap().len(), 1);

        // Next invocation with a healthy sink delivers it
        let mut healthy = MockMessagingSink::new();
        healthy
            .expect_send_text()
            .times(1)
            .returning(|_, _, _| Ok(SendOutcome::Sent));
        let dispatcher =
            NotificationDispatcher::new(db.clone(), Arc::new(healthy), "42".to_string());
        let stats = dispatcher.dispatch_pending(&fast_snapshot()).await.unwrap();
        assert_eq!(stats.sent, 1);

        // Once sent, never resent
        let mut silent = MockMessagingSink::new();
        silent.expect_send_text().times(0);
        silent.expect_send_photo().times(0);
        let dispatcher = NotificationDispatcher::new(db, Arc::new(silent), "42".to_string());
        let stats = dispatcher.dispatch_pending(&fast_snapshot()).await.unwrap();
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_not_counted_against_attempts() {
        let db = db_with_items(&[("mp-1", None)]).await;

        let mut sink = MockMessagingSink::new();
        let mut calls = 0;
        sink.expect_send_text().times(2).returning(move |_, _, _| {
            calls += 1;
            if calls == 1 {
                Ok(SendOutcome::RateLimited {
                    retry_after_secs: 0,
                })
            } else {
                Ok(SendOutcome::Sent)
            }
        });

        let snapshot = ConfigSnapshot {
            send_attempts: 1, // a counted failure would already give up
            send_retry_delay_secs: 0,
            ..ConfigSnapshot::default()
        };

        let dispatcher = NotificationDispatcher::new(db.clone(), Arc::new(sink), "42".to_string());
        let stats = dispatcher.dispatch_pending(&snapshot).await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn test_photo_falls_back_to_text_once() {
        let db = db_with_items(&[("mp-1", Some("https://images.marketplace.example/f140/x.jpeg"))])
            .await;

        let mut sink = MockMessagingSink::new();
        sink.expect_send_photo()
            .times(2) // send_attempts
            .returning(|_, _, _, _| {
                Ok(SendOutcome::Rejected {
                    description: "can't fetch".to_string(),
                })
            });
        sink.expect_send_text()
            .times(1)
            .returning(|_, _, _| Ok(SendOutcome::Sent));

        let dispatcher = NotificationDispatcher::new(db.clone(), Arc::new(sink), "42".to_string());
        let stats = dispatcher.dispatch_pending(&fast_snapshot()).await.unwrap();

        assert_eq!(stats.sent, 1);
        assert!(db.list_unsent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_bounds_one_invocation() {
        let db = db_with_items(&[("mp-1", None), ("mp-2", None), ("mp-3", None)]).await;

        let mut sink = MockMessagingSink::new();
        sink.expect_send_text()
            .times(2)
            .returning(|_, _, _| Ok(SendOutcome::Sent));

        let snapshot = ConfigSnapshot {
            dispatch_batch_size: 2,
            send_retry_delay_secs: 0,
            ..ConfigSnapshot::default()
        };

        let dispatcher = NotificationDispatcher::new(db.clone(), Arc::new(sink), "42".to_string());
        let stats = dispatcher.dispatch_pending(&snapshot).await.unwrap();

        assert_eq!(stats.processed, 2);
        assert_eq!(db.list_unsent(10).await.unwrap().len(), 1);
    }
}
