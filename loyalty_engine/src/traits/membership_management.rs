use chrono::{DateTime, Utc};
use loyalty_common::Points;
use thiserror::Error;

use crate::db_types::CustomerMembership;

#[derive(Debug, Clone, Error)]
pub enum MembershipError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Membership {0} does not exist")]
    NotFound(i64),
    #[error("Stored membership record is invalid: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for MembershipError {
    fn from(e: sqlx::Error) -> Self {
        MembershipError::DatabaseError(e.to_string())
    }
}

/// Lookup and persistence of customer memberships.
///
/// Memberships are created at enrollment time by an external administration service; the engine only reads them,
/// updates their activity counters and refreshes the cached points projection.
#[allow(async_fn_in_trait)]
pub trait MembershipManagement {
    async fn fetch_membership(&self, membership_id: i64) -> Result<Option<CustomerMembership>, MembershipError>;

    /// Fetches the membership a customer holds with the given tenant.
    async fn fetch_membership_for_customer(
        &self,
        customer_id: i64,
        tenant_id: i64,
    ) -> Result<Option<CustomerMembership>, MembershipError>;

    async fn fetch_membership_by_qr_code(&self, qr_code: &str) -> Result<Option<CustomerMembership>, MembershipError>;

    async fn fetch_memberships_for_tenant(&self, tenant_id: i64) -> Result<Vec<CustomerMembership>, MembershipError>;

    /// Counts one visit and stamps `last_visit`. The counter is incremented in place, so concurrent events for the
    /// same membership are all counted.
    async fn record_visit(&self, membership_id: i64, at: DateTime<Utc>) -> Result<(), MembershipError>;

    /// Adds a positive `amount` to the membership's total spend. Returns true when this was the membership's first
    /// spend. Exactly one caller sees true, however many purchases race.
    async fn record_purchase(&self, membership_id: i64, amount: f64) -> Result<bool, MembershipError>;

    /// Overwrites the cached points projection. The balance projection service is the only caller of this method.
    async fn update_cached_points(&self, membership_id: i64, points: Points) -> Result<(), MembershipError>;

    async fn assign_tier(&self, membership_id: i64, tier_id: Option<i64>) -> Result<(), MembershipError>;
}
