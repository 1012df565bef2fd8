use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::{LedgerError, MembershipError, TenantError};

#[derive(Debug, Clone, Error)]
pub enum TierChangeError {
    #[error("No active tier policy for tenant {0}")]
    NoTierPolicy(i64),
    #[error("Membership {0} does not exist")]
    MembershipNotFound(i64),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<MembershipError> for TierChangeError {
    fn from(e: MembershipError) -> Self {
        TierChangeError::DatabaseError(e.to_string())
    }
}

impl From<LedgerError> for TierChangeError {
    fn from(e: LedgerError) -> Self {
        TierChangeError::DatabaseError(e.to_string())
    }
}

impl From<TenantError> for TierChangeError {
    fn from(e: TenantError) -> Self {
        TierChangeError::DatabaseError(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierChangeResult {
    pub membership_id: i64,
    pub previous_tier_id: Option<i64>,
    pub new_tier_id: Option<i64>,
}

impl TierChangeResult {
    pub fn changed(&self) -> bool {
        self.previous_tier_id != self.new_tier_id
    }
}

/// Re-evaluates a membership's tier after its balance changed.
///
/// Tier policy lives outside the engine. The engine only tells the collaborator when to look again.
#[allow(async_fn_in_trait)]
pub trait TierChangeService {
    async fn evaluate_and_apply_tier_change(
        &self,
        membership_id: i64,
        tenant_id: i64,
    ) -> Result<TierChangeResult, TierChangeError>;
}
