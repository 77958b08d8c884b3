use anyhow::{bail, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub marketplace: MarketplaceConfig,
    pub telegram: TelegramConfig,
    pub database: DatabaseConfig,
    pub runtime: RuntimeConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub tick_interval_secs: u64,
    pub proxy_revalidate_interval_secs: u64,
    pub min_reload_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub health_port: u16,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        // Credentials are the only fatal startup requirement; everything else
        // has a working default and the tunables live in the config table.
        let bot_token = match env::var("TELEGRAM_BOT_TOKEN") {
            Ok(v) if !v.is_empty() => v,
            _ => bail!("TELEGRAM_BOT_TOKEN is not set"),
        };
        let chat_id = match env::var("TELEGRAM_CHAT_ID") {
            Ok(v) if !v.is_empty() => v,
            _ => bail!("TELEGRAM_CHAT_ID is not set"),
        };

        let config = Config {
            marketplace: MarketplaceConfig {
                base_url: env::var("MARKETPLACE_BASE_URL")
                    .unwrap_or_else(|_| "https://www.marketplace.example".to_string()),
                user_agent: env::var("MARKETPLACE_USER_AGENT").unwrap_or_else(|_| {
                    "Mozilla/5.0 (X11; Linux x86_64; rv:122.0) Gecko/20100101 Firefox/122.0"
                        .to_string()
                }),
                request_timeout_secs: env::var("MARKETPLACE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            },
            telegram: TelegramConfig { bot_token, chat_id },
            database: DatabaseConfig {
                sqlite_path: env::var("SQLITE_PATH")
                    .unwrap_or_else(|_| "data/scout.db".to_string()),
            },
            runtime: RuntimeConfig {
                tick_interval_secs: env::var("TICK_INTERVAL_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
                proxy_revalidate_interval_secs: env::var("PROXY_REVALIDATE_INTERVAL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600),
                min_reload_interval_secs: env::var("MIN_RELOAD_INTERVAL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            },
            monitoring: MonitoringConfig {
                health_port: env::var("HEALTH_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.runtime.tick_interval_secs == 0 {
            bail!("TICK_INTERVAL_SECS must be at least 1");
        }
        if self.marketplace.base_url.is_empty() {
            bail!("MARKETPLACE_BASE_URL must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_tick() {
        let mut config = Config {
            marketplace: MarketplaceConfig {
                base_url: "https://www.marketplace.example".to_string(),
                user_agent: "test".to_string(),
                request_timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: "token".to_string(),
                chat_id: "1".to_string(),
            },
            database: DatabaseConfig {
                sqlite_path: ":memory:".to_string(),
            },
            runtime: RuntimeConfig {
                tick_interval_secs: 60,
                proxy_revalidate_interval_secs: 3600,
                min_reload_interval_secs: 30,
            },
            monitoring: MonitoringConfig {
                health_port: 3000,
                log_level: "info".to_string(),
            },
        };

        assert!(config.validate().is_ok());

        config.runtime.tick_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
