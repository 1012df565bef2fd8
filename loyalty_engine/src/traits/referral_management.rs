use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{NewReferral, Referral};

#[derive(Debug, Clone, Error)]
pub enum ReferralError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Stored referral record is invalid: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for ReferralError {
    fn from(e: sqlx::Error) -> Self {
        ReferralError::DatabaseError(e.to_string())
    }
}

#[allow(async_fn_in_trait)]
pub trait ReferralManagement {
    async fn insert_referral(&self, referral: NewReferral) -> Result<Referral, ReferralError>;

    async fn fetch_referral(&self, referral_id: i64) -> Result<Option<Referral>, ReferralError>;

    /// Fetches the non-cancelled referral between the two memberships, if there is one.
    async fn fetch_active_referral_between(
        &self,
        referrer_membership_id: i64,
        referred_membership_id: i64,
    ) -> Result<Option<Referral>, ReferralError>;

    /// Counts the referrals created by the referrer within `[start, end]`.
    async fn count_referrals_in_period(
        &self,
        referrer_membership_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, ReferralError>;

    /// Fetches referrals targeting the membership that were created at or after `since`.
    async fn fetch_referrals_for_referred_since(
        &self,
        referred_membership_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Referral>, ReferralError>;

    /// Fetches the pending referrals targeting the membership.
    async fn fetch_pending_for_referred(&self, referred_membership_id: i64) -> Result<Vec<Referral>, ReferralError>;

    /// Fetches referrals of the tenant whose first purchase is complete but whose reward has not been granted.
    async fn fetch_completed_without_reward(&self, tenant_id: i64) -> Result<Vec<Referral>, ReferralError>;

    /// Persists the lifecycle fields of the referral.
    async fn save_referral(&self, referral: &Referral) -> Result<(), ReferralError>;
}
