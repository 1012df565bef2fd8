use std::{env, fmt::Display, str::FromStr};

use log::*;
use loyalty_common::{parse_boolean_flag, parse_env_number};

pub const DEFAULT_REFERRAL_MONTHLY_CAP: i64 = 50;
pub const DEFAULT_REFERRAL_COOLDOWN_HOURS: i64 = 24;
pub const DEFAULT_REDEMPTION_CODE_TTL_DAYS: i64 = 30;
pub const DEFAULT_REDEMPTION_CODE_ATTEMPTS: u32 = 10;
pub const DEFAULT_BALANCE_BATCH_SIZE: usize = 100;
pub const DEFAULT_RETENTION_WINDOW_DAYS: i64 = 30;

/// Tunables for the engine services. Everything here has a sensible default, so the engine works without any
/// configuration at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// The most referrals a member may create in one calendar month.
    pub referral_monthly_cap: i64,
    /// A member may only be referred once within this many hours.
    pub referral_cooldown_hours: i64,
    pub redemption_code_ttl_days: i64,
    /// How many random codes are tried before a redemption gives up on finding a free one.
    pub redemption_code_attempts: u32,
    pub balance_batch_size: usize,
    /// Length of the rolling retention window.
    pub retention_window_days: i64,
    /// Publish a `RuleEvaluationEvent` for every eligibility decision.
    pub emit_rule_trace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            referral_monthly_cap: DEFAULT_REFERRAL_MONTHLY_CAP,
            referral_cooldown_hours: DEFAULT_REFERRAL_COOLDOWN_HOURS,
            redemption_code_ttl_days: DEFAULT_REDEMPTION_CODE_TTL_DAYS,
            redemption_code_attempts: DEFAULT_REDEMPTION_CODE_ATTEMPTS,
            balance_batch_size: DEFAULT_BALANCE_BATCH_SIZE,
            retention_window_days: DEFAULT_RETENTION_WINDOW_DAYS,
            emit_rule_trace: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env_or_default() -> Self {
        let referral_monthly_cap = positive_from_env("LOYALTY_REFERRAL_MONTHLY_CAP", DEFAULT_REFERRAL_MONTHLY_CAP);
        let referral_cooldown_hours =
            positive_from_env("LOYALTY_REFERRAL_COOLDOWN_HOURS", DEFAULT_REFERRAL_COOLDOWN_HOURS);
        let redemption_code_ttl_days =
            positive_from_env("LOYALTY_REDEMPTION_CODE_TTL_DAYS", DEFAULT_REDEMPTION_CODE_TTL_DAYS);
        let redemption_code_attempts =
            positive_from_env("LOYALTY_REDEMPTION_CODE_ATTEMPTS", DEFAULT_REDEMPTION_CODE_ATTEMPTS);
        let balance_batch_size = positive_from_env("LOYALTY_BALANCE_BATCH_SIZE", DEFAULT_BALANCE_BATCH_SIZE);
        let retention_window_days = positive_from_env("LOYALTY_RETENTION_WINDOW_DAYS", DEFAULT_RETENTION_WINDOW_DAYS);
        let emit_rule_trace = parse_boolean_flag(env::var("LOYALTY_EMIT_RULE_TRACE").ok(), false);
        Self {
            referral_monthly_cap,
            referral_cooldown_hours,
            redemption_code_ttl_days,
            redemption_code_attempts,
            balance_batch_size,
            retention_window_days,
            emit_rule_trace,
        }
    }

    pub fn with_rule_trace(mut self, emit: bool) -> Self {
        self.emit_rule_trace = emit;
        self
    }
}

/// Reads a strictly positive number from the environment, falling back to `default` (with a log message) when the
/// value is malformed or not positive.
pub fn positive_from_env<T>(var: &str, default: T) -> T
where
    T: FromStr + Display + PartialOrd + Default + Copy,
    T::Err: Display,
{
    match parse_env_number(env::var(var).ok(), default) {
        Ok(v) if v > T::default() => v,
        Ok(v) => {
            warn!("🪛️ {var} must be positive, but got {v}. Using the default, {default}, instead.");
            default
        },
        Err(e) => {
            error!("🪛️ {e} Could not read {var}. Using the default, {default}, instead.");
            default
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::default();
        assert_eq!(config.referral_monthly_cap, 50);
        assert_eq!(config.referral_cooldown_hours, 24);
        assert_eq!(config.redemption_code_ttl_days, 30);
        assert_eq!(config.redemption_code_attempts, 10);
        assert!(!config.emit_rule_trace);
    }

    #[test]
    fn invalid_values_fall_back() {
        env::set_var("LOYALTY_TEST_POSITIVE_A", "-3");
        env::set_var("LOYALTY_TEST_POSITIVE_B", "lots");
        env::set_var("LOYALTY_TEST_POSITIVE_C", "7");
        assert_eq!(positive_from_env("LOYALTY_TEST_POSITIVE_A", 5i64), 5);
        assert_eq!(positive_from_env("LOYALTY_TEST_POSITIVE_B", 5u32), 5);
        assert_eq!(positive_from_env("LOYALTY_TEST_POSITIVE_C", 5usize), 7);
        assert_eq!(positive_from_env("LOYALTY_TEST_POSITIVE_UNSET", 9i64), 9);
    }
}
