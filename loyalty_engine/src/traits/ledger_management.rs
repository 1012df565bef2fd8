use chrono::{DateTime, Utc};
use loyalty_common::Points;
use thiserror::Error;

use crate::{
    db_types::{NewPointsTransaction, PointsTransaction, TransactionValidationError},
    traits::InsertTransactionResult,
};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Ledger transaction {0} does not exist")]
    TransactionNotFound(i64),
    #[error("Invalid ledger transaction. {0}")]
    InvalidTransaction(#[from] TransactionValidationError),
    #[error("Stored ledger record is invalid: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}

/// The points ledger.
///
/// Rows are immutable once written. Balances are always computed from the rows; nothing here reads the cached points
/// value on the membership.
#[allow(async_fn_in_trait)]
pub trait LedgerManagement {
    /// Appends a row to the ledger.
    ///
    /// If a row with the same idempotency key already exists, nothing is written and
    /// [`InsertTransactionResult::AlreadyExists`] is returned with the id of the existing row. Concurrent inserts of
    /// the same key are resolved by the storage layer's uniqueness constraint.
    async fn insert_transaction(&self, tx: NewPointsTransaction) -> Result<InsertTransactionResult, LedgerError>;

    async fn fetch_transaction(&self, id: i64) -> Result<Option<PointsTransaction>, LedgerError>;

    async fn fetch_transaction_by_key(&self, idempotency_key: &str) -> Result<Option<PointsTransaction>, LedgerError>;

    async fn fetch_transactions_by_keys(&self, keys: &[String]) -> Result<Vec<PointsTransaction>, LedgerError>;

    /// Fetches the EARNING rows written by `rule_id` of `program_id` for the membership, created within
    /// `[start, end]`.
    async fn fetch_earnings_in_period(
        &self,
        membership_id: i64,
        program_id: i64,
        rule_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError>;

    /// Fetches every row of the membership created within `[start, end]`, oldest first.
    async fn fetch_for_tier_evaluation(
        &self,
        membership_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError>;

    /// Fetches every row of the membership, oldest first.
    async fn fetch_transactions_for_membership(&self, membership_id: i64)
        -> Result<Vec<PointsTransaction>, LedgerError>;

    /// Fetches the EARNING rows of the membership whose expiry date lies before `now`, oldest first.
    async fn fetch_expired_earnings(
        &self,
        membership_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError>;

    async fn fetch_reversals_of(&self, transaction_id: i64) -> Result<Vec<PointsTransaction>, LedgerError>;

    /// The number of REDEEM rows the membership holds for the reward.
    async fn count_redemptions(&self, membership_id: i64, reward_id: i64) -> Result<i64, LedgerError>;

    /// `SUM(points_delta)` over all of the membership's rows.
    async fn calculate_balance(&self, membership_id: i64) -> Result<Points, LedgerError>;

    /// `SUM(points_delta)` over the membership's rows that belong to one program.
    async fn calculate_program_balance(&self, membership_id: i64, program_id: i64) -> Result<Points, LedgerError>;
}
