use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::text_enum;

text_enum! {
    ReferralStatus {
        /// Created, the referred member has not purchased yet.
        Pending => "pending",
        /// The referred member completed a first purchase.
        Active => "active",
        /// The referrer has been rewarded.
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReferralStateError {
    #[error("Referral #{0} is cancelled")]
    Cancelled(i64),
    #[error("Referral #{0} cannot be rewarded before the referred member's first purchase")]
    FirstPurchasePending(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: i64,
    pub tenant_id: i64,
    pub referrer_membership_id: i64,
    pub referred_membership_id: i64,
    pub referral_code: Option<String>,
    pub status: ReferralStatus,
    pub first_purchase_completed: bool,
    pub first_purchase_completed_at: Option<DateTime<Utc>>,
    pub reward_granted: bool,
    pub reward_granted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Referral {
    pub fn is_active(&self) -> bool {
        self.status != ReferralStatus::Cancelled
    }

    /// Moves a pending referral to `active`. Returns `false` if nothing changed.
    pub fn mark_first_purchase_completed(&mut self, at: DateTime<Utc>) -> Result<bool, ReferralStateError> {
        if self.status == ReferralStatus::Cancelled {
            return Err(ReferralStateError::Cancelled(self.id));
        }
        if self.first_purchase_completed {
            return Ok(false);
        }
        self.first_purchase_completed = true;
        self.first_purchase_completed_at = Some(at);
        if self.status == ReferralStatus::Pending {
            self.status = ReferralStatus::Active;
        }
        Ok(true)
    }

    /// Moves an active referral to `completed`. Returns `false` if the reward was already granted.
    pub fn mark_reward_granted(&mut self, at: DateTime<Utc>) -> Result<bool, ReferralStateError> {
        if self.status == ReferralStatus::Cancelled {
            return Err(ReferralStateError::Cancelled(self.id));
        }
        if !self.first_purchase_completed {
            return Err(ReferralStateError::FirstPurchasePending(self.id));
        }
        if self.reward_granted {
            return Ok(false);
        }
        self.reward_granted = true;
        self.reward_granted_at = Some(at);
        self.status = ReferralStatus::Completed;
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReferral {
    pub tenant_id: i64,
    pub referrer_membership_id: i64,
    pub referred_membership_id: i64,
    pub referral_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn referral() -> Referral {
        Referral {
            id: 3,
            tenant_id: 1,
            referrer_membership_id: 1,
            referred_membership_id: 2,
            referral_code: None,
            status: ReferralStatus::Pending,
            first_purchase_completed: false,
            first_purchase_completed_at: None,
            reward_granted: false,
            reward_granted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn lifecycle() {
        let now = Utc::now();
        let mut r = referral();
        assert_eq!(r.mark_reward_granted(now), Err(ReferralStateError::FirstPurchasePending(3)));
        assert_eq!(r.mark_first_purchase_completed(now), Ok(true));
        assert_eq!(r.status, ReferralStatus::Active);
        assert_eq!(r.mark_first_purchase_completed(now), Ok(false));
        assert_eq!(r.mark_reward_granted(now), Ok(true));
        assert_eq!(r.status, ReferralStatus::Completed);
        assert_eq!(r.mark_reward_granted(now), Ok(false));
    }

    #[test]
    fn cancelled_is_terminal() {
        let mut r = referral();
        r.status = ReferralStatus::Cancelled;
        assert!(!r.is_active());
        assert_eq!(r.mark_first_purchase_completed(Utc::now()), Err(ReferralStateError::Cancelled(3)));
    }
}
