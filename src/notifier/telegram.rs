use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::core::config::TelegramConfig;

/// Inline bytes are preferred; the sink may be unable to fetch URLs the
/// marketplace CDN blocks for datacenter egress.
#[derive(Debug, Clone)]
pub enum PhotoSource {
    Inline(Vec<u8>),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent,
    /// Sink asked us to back off; distinguishable from a hard error.
    RateLimited { retry_after_secs: u64 },
    Rejected { description: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingSink: Send + Sync {
    async fn send_photo(
        &self,
        chat_id: &str,
        photo: PhotoSource,
        caption: &str,
        actions: &[LinkButton],
    ) -> Result<SendOutcome>;

    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        actions: &[LinkButton],
    ) -> Result<SendOutcome>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram Bot API client.
pub struct TelegramClient {
    http: Client,
    token: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Ok(Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            token: config.bot_token.clone(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.token, method)
    }

    fn reply_markup(actions: &[LinkButton]) -> serde_json::Value {
        let rows: Vec<Vec<serde_json::Value>> = actions
            .iter()
            .map(|a| vec![json!({ "text": a.label, "url": a.url })])
            .collect();
        json!({ "inline_keyboard": rows })
    }

    async fn parse_outcome(response: reqwest::Response) -> Result<SendOutcome> {
        let api: ApiResponse = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if api.ok {
            return Ok(SendOutcome::Sent);
        }

        if api.error_code == Some(429) {
            let retry_after_secs = api
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(30);
            return Ok(SendOutcome::RateLimited { retry_after_secs });
        }

        Ok(SendOutcome::Rejected {
            description: api.description.unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[async_trait]
impl MessagingSink for TelegramClient {
    async fn send_photo(
        &self,
        chat_id: &str,
        photo: PhotoSource,
        caption: &str,
        actions: &[LinkButton],
    ) -> Result<SendOutcome> {
        let url = self.api_url("sendPhoto");
        let markup = Self::reply_markup(actions).to_string();

        let response = match photo {
            PhotoSource::Inline(bytes) => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name("photo.jpg")
                    .mime_str("image/jpeg")?;
                let form = reqwest::multipart::Form::new()
                    .text("chat_id", chat_id.to_string())
                    .text("caption", caption.to_string())
                    .text("reply_markup", markup)
                    .part("photo", part);

                self.http.post(&url).multipart(form).send().await?
            }
            PhotoSource::Url(photo_url) => {
                let body = json!({
                    "chat_id": chat_id,
                    "photo": photo_url,
                    "caption": caption,
                    "reply_markup": Self::reply_markup(actions),
                });
                self.http.post(&url).json(&body).send().await?
            }
        };

        Self::parse_outcome(response).await
    }

    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        actions: &[LinkButton],
    ) -> Result<SendOutcome> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": false,
            "reply_markup": Self::reply_markup(actions),
        });

        let response = self
            .http
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        Self::parse_outcome(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_markup_one_row_per_button() {
        let actions = vec![
            LinkButton {
                label: "Open listing".to_string(),
                url: "https://www.marketplace.example/items/1".to_string(),
            },
            LinkButton {
                label: "Seller".to_string(),
                url: "https://www.marketplace.example/member/9".to_string(),
            },
        ];

        let markup = TelegramClient::reply_markup(&actions);
        let rows = markup["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0]["text"], "Open listing");
    }
}
