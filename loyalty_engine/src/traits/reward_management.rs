use thiserror::Error;

use crate::{
    db_types::{RedemptionCode, Reward},
    traits::{LedgerError, NewRedemption, RedemptionOutcome},
};

#[derive(Debug, Clone, Error)]
pub enum RewardError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Stored reward record is invalid: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for RewardError {
    fn from(e: sqlx::Error) -> Self {
        RewardError::DatabaseError(e.to_string())
    }
}

impl From<LedgerError> for RewardError {
    fn from(e: LedgerError) -> Self {
        RewardError::DatabaseError(e.to_string())
    }
}

/// Rewards and the redemption codes issued against them.
#[allow(async_fn_in_trait)]
pub trait RewardManagement {
    async fn fetch_reward(&self, reward_id: i64) -> Result<Option<Reward>, RewardError>;

    /// Debits a redemption in one atomic step. One unit of stock is taken (unlimited stock is left alone), the
    /// balance is checked against the cost, the REDEEM row is written and the first free candidate code is stored.
    ///
    /// Any outcome other than [`RedemptionOutcome::Redeemed`] leaves storage untouched.
    async fn redeem(&self, redemption: NewRedemption) -> Result<RedemptionOutcome, RewardError>;

    async fn fetch_redemption_code(&self, code: &str) -> Result<Option<RedemptionCode>, RewardError>;

    async fn fetch_redemption_code_for_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Option<RedemptionCode>, RewardError>;

    /// Persists the status and usage fields of the code.
    async fn update_redemption_code(&self, code: &RedemptionCode) -> Result<(), RewardError>;
}
