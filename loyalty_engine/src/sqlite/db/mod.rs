//! # SQLite Database methods
//!
//! This module contains the "low-level" SQLite database interactions.
//!
//! All these interactions are simple functions (rather than stateful structs) that accept a `&mut SqliteConnection`
//! argument. Callers can obtain a connection from a pool, or open an atomic transaction as the need arises, and call
//! through to the functions without any other changes.
//!
//! Timestamps are stored as integer unix milliseconds. Each submodule reads rows into a private `*Row` struct and
//! converts it into the public domain record, so stored text and JSON columns are validated on the way out.
use std::{env, str::FromStr};

use chrono::{DateTime, TimeZone, Utc};
use log::info;
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, SqlitePool};

use crate::db_types::ConversionError;

pub mod ledger;
pub mod memberships;
pub mod programs;
pub mod referrals;
pub mod rewards;
pub mod tenants;

const SQLITE_DB_URL: &str = "sqlite://data/loyalty.db";

pub fn db_url() -> String {
    let result = env::var("LOYALTY_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ LOYALTY_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?;
    Ok(pool)
}

pub(crate) fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn opt_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(millis)
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| format!("{ms} is not a valid timestamp"))
}

pub(crate) fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, String> {
    ms.map(from_millis).transpose()
}

pub(crate) fn parse_text<T>(s: &str) -> Result<T, String>
where T: FromStr<Err = ConversionError> {
    s.parse::<T>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn millis_round_trip_keeps_precision() {
        let now = Utc.timestamp_millis_opt(1_717_171_717_123).single().unwrap();
        assert_eq!(from_millis(millis(now)).unwrap(), now);
        assert_eq!(opt_from_millis(None).unwrap(), None);
    }
}
