use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

/// Application configuration, layered from `config/default.toml`, an
/// optional `config/{run_mode}.toml`, and `APP_*` environment variables
/// (highest precedence).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(length(min = 1))]
    pub database_url: String,

    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_json")]
    pub log_json: bool,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[validate]
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: Decimal,

    #[serde(default = "default_expiry_alert_days")]
    pub expiry_alert_days: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SchedulerConfig {
    #[serde(default = "default_expiry_check_interval_secs")]
    pub expiry_check_interval_secs: u64,

    #[serde(default = "default_low_stock_interval_secs")]
    pub low_stock_interval_secs: u64,

    #[serde(default = "default_reservation_cleanup_interval_secs")]
    pub reservation_cleanup_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_check_interval_secs: default_expiry_check_interval_secs(),
            low_stock_interval_secs: default_low_stock_interval_secs(),
            reservation_cleanup_interval_secs: default_reservation_cleanup_interval_secs(),
        }
    }
}

fn default_auto_migrate() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    false
}

fn default_event_buffer() -> usize {
    1000
}

fn default_low_stock_threshold() -> Decimal {
    rust_decimal_macros::dec!(10)
}

fn default_expiry_alert_days() -> Vec<i32> {
    vec![90, 30, 7]
}

// Daily expiry sweep, hourly low-stock and reservation cleanup.
fn default_expiry_check_interval_secs() -> u64 {
    86_400
}

fn default_low_stock_interval_secs() -> u64 {
    3_600
}

fn default_reservation_cleanup_interval_secs() -> u64 {
    3_600
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config
            .validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;
        Ok(app_config)
    }
}
