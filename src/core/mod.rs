pub mod config;
pub mod health;
pub mod logging;
pub mod settings;

pub use config::Config;
pub use health::HealthChecker;
pub use settings::{ConfigSnapshot, ReloadOutcome, SettingsStore};
