use std::{env, str::FromStr};

use chrono::Duration;
use log::*;
use loyalty_engine::{config::positive_from_env, RetentionWindow};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/loyalty.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_EXPIRATION_INTERVAL_HOURS: i64 = 720;
const DEFAULT_RETENTION_INTERVAL_HOURS: i64 = 24;
const DEFAULT_BALANCE_REPAIR_INTERVAL_HOURS: i64 = 24;

/// How the retention job frames its streak window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetentionMode {
    /// The last `LOYALTY_RETENTION_WINDOW_DAYS` days, up to now.
    #[default]
    Rolling,
    /// The current calendar month, up to now.
    Monthly,
}

impl FromStr for RetentionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rolling" => Ok(Self::Rolling),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("'{other}' is not a retention mode. Use 'rolling' or 'monthly'.")),
        }
    }
}

impl RetentionMode {
    pub fn window(&self, rolling_days: i64) -> RetentionWindow {
        match self {
            RetentionMode::Rolling => RetentionWindow::Rolling(rolling_days),
            RetentionMode::Monthly => RetentionWindow::Monthly,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Time between point expiry runs.
    pub expiration_interval: Duration,
    /// Time between retention streak evaluations.
    pub retention_interval: Duration,
    /// Time between cached-balance repair runs.
    pub balance_repair_interval: Duration,
    pub retention_mode: RetentionMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            expiration_interval: Duration::hours(DEFAULT_EXPIRATION_INTERVAL_HOURS),
            retention_interval: Duration::hours(DEFAULT_RETENTION_INTERVAL_HOURS),
            balance_repair_interval: Duration::hours(DEFAULT_BALANCE_REPAIR_INTERVAL_HOURS),
            retention_mode: RetentionMode::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("LOYALTY_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ LOYALTY_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let max_connections = positive_from_env("LOYALTY_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
        let expiration_interval =
            Duration::hours(positive_from_env("LOYALTY_EXPIRATION_INTERVAL_HOURS", DEFAULT_EXPIRATION_INTERVAL_HOURS));
        let retention_interval =
            Duration::hours(positive_from_env("LOYALTY_RETENTION_INTERVAL_HOURS", DEFAULT_RETENTION_INTERVAL_HOURS));
        let balance_repair_interval = Duration::hours(positive_from_env(
            "LOYALTY_BALANCE_REPAIR_INTERVAL_HOURS",
            DEFAULT_BALANCE_REPAIR_INTERVAL_HOURS,
        ));
        let retention_mode = match env::var("LOYALTY_RETENTION_MODE") {
            Ok(s) => s.parse::<RetentionMode>().unwrap_or_else(|e| {
                error!("🪛️ {e} Using the default, rolling windows, instead.");
                RetentionMode::default()
            }),
            Err(_) => RetentionMode::default(),
        };
        Self {
            database_url,
            max_connections,
            expiration_interval,
            retention_interval,
            balance_repair_interval,
            retention_mode,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retention_modes() {
        assert_eq!("Monthly".parse::<RetentionMode>(), Ok(RetentionMode::Monthly));
        assert_eq!(" rolling ".parse::<RetentionMode>(), Ok(RetentionMode::Rolling));
        assert!("weekly".parse::<RetentionMode>().is_err());
        assert_eq!(RetentionMode::Rolling.window(14), RetentionWindow::Rolling(14));
    }

    #[test]
    fn intervals_fall_back_to_defaults() {
        env::set_var("LOYALTY_EXPIRATION_INTERVAL_HOURS", "0");
        env::set_var("LOYALTY_RETENTION_INTERVAL_HOURS", "six");
        env::set_var("LOYALTY_BALANCE_REPAIR_INTERVAL_HOURS", "12");
        env::set_var("LOYALTY_RETENTION_MODE", "fortnightly");
        let config = WorkerConfig::from_env_or_default();
        assert_eq!(config.expiration_interval, Duration::hours(720));
        assert_eq!(config.retention_interval, Duration::hours(24));
        assert_eq!(config.balance_repair_interval, Duration::hours(12));
        assert_eq!(config.retention_mode, RetentionMode::Rolling);
    }
}
