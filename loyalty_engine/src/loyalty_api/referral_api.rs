use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::{EngineConfig, DEFAULT_REFERRAL_COOLDOWN_HOURS, DEFAULT_REFERRAL_MONTHLY_CAP},
    db_types::{NewReferral, Referral},
    helpers::start_of_month,
    loyalty_api::errors::ReferralServiceError,
    traits::{MembershipManagement, ReferralManagement},
};

/// What [`ReferralApi::create_referral`] would make of a referral, without creating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// The referral lifecycle, with its anti-fraud checks.
///
/// A referral is `pending` until the referred member's first purchase makes it `active`. The event pipeline then
/// rewards the referrer and marks the referral `completed`.
pub struct ReferralApi<B> {
    db: B,
    monthly_cap: i64,
    cooldown_hours: i64,
}

impl<B: Debug> Debug for ReferralApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReferralApi ({:?})", self.db)
    }
}

impl<B> ReferralApi<B> {
    pub fn new(db: B) -> Self {
        Self { db, monthly_cap: DEFAULT_REFERRAL_MONTHLY_CAP, cooldown_hours: DEFAULT_REFERRAL_COOLDOWN_HOURS }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.monthly_cap = config.referral_monthly_cap;
        self.cooldown_hours = config.referral_cooldown_hours;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> ReferralApi<B>
where B: ReferralManagement + MembershipManagement
{
    /// Creates a pending referral, provided that
    /// * nobody refers themselves,
    /// * both memberships exist and belong to `tenant_id`,
    /// * there is no active referral between the two already,
    /// * the referrer has created fewer than the monthly cap of referrals this calendar month, and
    /// * the referred member was not referred by anyone within the cooldown period.
    pub async fn create_referral(
        &self,
        referrer_membership_id: i64,
        referred_membership_id: i64,
        tenant_id: i64,
        referral_code: Option<String>,
    ) -> Result<Referral, ReferralServiceError> {
        let now = Utc::now();
        let violations = self.violations(referrer_membership_id, referred_membership_id, tenant_id, now).await?;
        if let Some(e) = violations.into_iter().next() {
            debug!("🤝️ Referral {referrer_membership_id} -> {referred_membership_id} rejected. {e}");
            return Err(e);
        }
        let referral = NewReferral {
            tenant_id,
            referrer_membership_id,
            referred_membership_id,
            referral_code,
            created_at: now,
        };
        let referral = self.db.insert_referral(referral).await?;
        info!("🤝️ Referral #{} created: {referrer_membership_id} -> {referred_membership_id}", referral.id);
        Ok(referral)
    }

    /// Reports every reason [`Self::create_referral`] would reject the referral for.
    pub async fn validate_referral(
        &self,
        referrer_membership_id: i64,
        referred_membership_id: i64,
        tenant_id: i64,
    ) -> Result<ReferralValidation, ReferralServiceError> {
        let violations =
            self.violations(referrer_membership_id, referred_membership_id, tenant_id, Utc::now()).await?;
        let errors = violations.iter().map(ToString::to_string).collect::<Vec<_>>();
        Ok(ReferralValidation { is_valid: errors.is_empty(), errors })
    }

    async fn violations(
        &self,
        referrer_id: i64,
        referred_id: i64,
        tenant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReferralServiceError>, ReferralServiceError> {
        let mut violations = Vec::new();
        if referrer_id == referred_id {
            violations.push(ReferralServiceError::SelfReferral);
        }
        let referrer = self.db.fetch_membership(referrer_id).await?;
        let referred = self.db.fetch_membership(referred_id).await?;
        for (id, membership) in [(referrer_id, &referrer), (referred_id, &referred)] {
            match membership {
                None => violations.push(ReferralServiceError::MembershipNotFound(id)),
                Some(m) if m.tenant_id != tenant_id => {
                    violations.push(ReferralServiceError::TenantMismatch { membership_id: id, tenant_id })
                },
                Some(_) => {},
            }
        }
        if referrer.is_none() || referred.is_none() {
            return Ok(violations);
        }
        if self.db.fetch_active_referral_between(referrer_id, referred_id).await?.is_some() {
            violations.push(ReferralServiceError::DuplicateReferral(referrer_id, referred_id));
        }
        let this_month = self.db.count_referrals_in_period(referrer_id, start_of_month(now), now).await?;
        if this_month >= self.monthly_cap {
            violations.push(ReferralServiceError::MonthlyCapReached(referrer_id, self.monthly_cap));
        }
        let cooldown_start = now - Duration::hours(self.cooldown_hours);
        let recent = self.db.fetch_referrals_for_referred_since(referred_id, cooldown_start).await?;
        if !recent.is_empty() {
            violations.push(ReferralServiceError::CooldownActive(referred_id, self.cooldown_hours));
        }
        Ok(violations)
    }

    /// Marks the pending referrals of a member who just made their first purchase. Returns the referrals that
    /// changed, each of which is now owed a reward.
    pub async fn process_first_purchase(
        &self,
        referred_membership_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Referral>, ReferralServiceError> {
        let pending = self.db.fetch_pending_for_referred(referred_membership_id).await?;
        let mut completed = Vec::with_capacity(pending.len());
        for mut referral in pending {
            if referral.mark_first_purchase_completed(at)? {
                self.db.save_referral(&referral).await?;
                debug!("🤝️ Referral #{} completed its first purchase", referral.id);
                completed.push(referral);
            }
        }
        Ok(completed)
    }

    pub async fn completed_without_reward(&self, tenant_id: i64) -> Result<Vec<Referral>, ReferralServiceError> {
        Ok(self.db.fetch_completed_without_reward(tenant_id).await?)
    }

    /// Records that the referrer was rewarded. Marking an already rewarded referral again changes nothing.
    pub async fn mark_reward_granted(
        &self,
        referral_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Referral, ReferralServiceError> {
        let mut referral =
            self.db.fetch_referral(referral_id).await?.ok_or(ReferralServiceError::ReferralNotFound(referral_id))?;
        if referral.mark_reward_granted(at)? {
            self.db.save_referral(&referral).await?;
            info!("🤝️ Referral #{referral_id} rewarded");
        }
        Ok(referral)
    }
}
