// src/config.rs
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::day_window::{parse_offset, DayWindow};
use crate::error::ConfigError;
use crate::hours::DEFAULT_DELAY_GRACE_MINUTES;
use crate::run::MAX_DAY_COUNT;
use crate::scheduler::CronSchedule;

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    3000
}
fn default_lock_ttl_ms() -> u64 {
    30 * 60 * 1000
}
fn default_cron() -> String {
    "0 2 * * *".to_string()
}
fn default_tz_offset() -> String {
    "-03:00".to_string()
}
fn default_history_days() -> u32 {
    30
}
fn default_grace_minutes() -> i64 {
    DEFAULT_DELAY_GRACE_MINUTES
}
fn default_today_grace_hours() -> i64 {
    12
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Server
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// HTTPS is served only when both paths are set.
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub seed_file: Option<PathBuf>,

    // Reconciliation
    #[serde(default = "default_lock_ttl_ms")]
    pub reconciliation_lock_ttl_ms: u64,
    #[serde(default = "default_cron")]
    pub reconciliation_cron: String,
    #[serde(default = "default_tz_offset")]
    pub reconciliation_tz_offset: String,
    #[serde(default = "default_history_days")]
    pub reconciliation_history_days: u32,
    #[serde(default = "default_grace_minutes")]
    pub reconciliation_grace_minutes: i64,
    #[serde(default = "default_today_grace_hours")]
    pub reconciliation_today_grace_hours: i64,
    #[serde(default = "default_true")]
    pub reconciliation_scheduler_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Config>(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconciliation_lock_ttl_ms == 0 {
            return Err(ConfigError::invalid(
                "RECONCILIATION_LOCK_TTL_MS",
                "must be greater than zero",
            ));
        }
        if self.reconciliation_history_days == 0
            || self.reconciliation_history_days > MAX_DAY_COUNT
        {
            return Err(ConfigError::invalid(
                "RECONCILIATION_HISTORY_DAYS",
                format!("must be between 1 and {}", MAX_DAY_COUNT),
            ));
        }
        if self.reconciliation_grace_minutes < 0 {
            return Err(ConfigError::invalid(
                "RECONCILIATION_GRACE_MINUTES",
                "must not be negative",
            ));
        }
        if !(0..=24).contains(&self.reconciliation_today_grace_hours) {
            return Err(ConfigError::invalid(
                "RECONCILIATION_TODAY_GRACE_HOURS",
                "must be between 0 and 24",
            ));
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(ConfigError::invalid(
                "CERT_PATH/KEY_PATH",
                "set both to serve HTTPS, or neither",
            ));
        }
        self.day_window()?;
        self.schedule()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        Some((self.cert_path.as_deref()?, self.key_path.as_deref()?))
    }

    pub fn day_window(&self) -> Result<DayWindow, ConfigError> {
        parse_offset(&self.reconciliation_tz_offset)
            .map(DayWindow::new)
            .ok_or_else(|| {
                ConfigError::invalid(
                    "RECONCILIATION_TZ_OFFSET",
                    format!(
                        "expected +HH:MM or -HH:MM, got '{}'",
                        self.reconciliation_tz_offset
                    ),
                )
            })
    }

    pub fn schedule(&self) -> Result<CronSchedule, ConfigError> {
        self.reconciliation_cron.parse()
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.reconciliation_lock_ttl_ms)
    }

    pub fn delay_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reconciliation_grace_minutes)
    }

    pub fn today_grace(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reconciliation_today_grace_hours)
    }
}
