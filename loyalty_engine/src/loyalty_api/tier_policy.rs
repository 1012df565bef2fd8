use std::fmt::Debug;

use log::*;

use crate::{
    db_types::CustomerTier,
    traits::{
        LedgerManagement,
        MembershipManagement,
        TenantManagement,
        TierChangeError,
        TierChangeResult,
        TierChangeService,
    },
};

/// The shipped [`TierChangeService`]: a membership belongs to the most senior active tier whose points range contains
/// its ledger balance.
///
/// Memberships whose balance falls outside every tier keep their current tier.
pub struct ThresholdTierPolicy<B> {
    db: B,
}

impl<B: Debug> Debug for ThresholdTierPolicy<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThresholdTierPolicy ({:?})", self.db)
    }
}

impl<B> ThresholdTierPolicy<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> TierChangeService for ThresholdTierPolicy<B>
where B: LedgerManagement + MembershipManagement + TenantManagement
{
    async fn evaluate_and_apply_tier_change(
        &self,
        membership_id: i64,
        tenant_id: i64,
    ) -> Result<TierChangeResult, TierChangeError> {
        let membership =
            self.db.fetch_membership(membership_id).await?.ok_or(TierChangeError::MembershipNotFound(membership_id))?;
        let tiers = self.db.fetch_tiers_for_tenant(tenant_id).await?;
        let tiers = tiers.into_iter().filter(CustomerTier::is_active).collect::<Vec<_>>();
        if tiers.is_empty() {
            return Err(TierChangeError::NoTierPolicy(tenant_id));
        }
        let balance = self.db.calculate_balance(membership_id).await?;
        let previous_tier_id = membership.tier_id;
        let new_tier_id = tiers
            .iter()
            .filter(|t| t.contains(balance))
            .max_by_key(|t| t.priority)
            .map(|t| t.id)
            .or(previous_tier_id);
        let result = TierChangeResult { membership_id, previous_tier_id, new_tier_id };
        if result.changed() {
            self.db.assign_tier(membership_id, new_tier_id).await?;
            info!(
                "🎯️ Membership #{membership_id} moved from tier {previous_tier_id:?} to {new_tier_id:?} at {balance}"
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        db_types::{NewCustomerTier, NewPointsTransaction, Points},
        test_utils::{
            prepare_env::fresh_database,
            seed::{BasicScene, Seeder},
        },
    };

    #[tokio::test]
    async fn promotes_to_the_most_senior_matching_tier() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        let t = scene.tenant.id;
        let policy = ThresholdTierPolicy::new(db.clone());
        let m = scene.membership.id;

        let err = policy.evaluate_and_apply_tier_change(m, t).await.unwrap_err();
        assert!(matches!(err, TierChangeError::NoTierPolicy(_)));

        let bronze = seeder.tier(NewCustomerTier::new(t, "Bronze", 0, Some(499), 1)).await;
        let silver = seeder.tier(NewCustomerTier::new(t, "Silver", 500, None, 2)).await;
        let result = policy.evaluate_and_apply_tier_change(m, t).await.unwrap();
        assert_eq!(result.new_tier_id, Some(bronze.id));
        assert!(result.changed());

        let tx = NewPointsTransaction::earning(t, scene.membership.user_id, m, Points::from(650), "k".into()).unwrap();
        seeder.ledger_row(tx).await;
        let result = policy.evaluate_and_apply_tier_change(m, t).await.unwrap();
        assert_eq!(result.previous_tier_id, Some(bronze.id));
        assert_eq!(result.new_tier_id, Some(silver.id));
        let stored = db.fetch_membership(m).await.unwrap().unwrap();
        assert_eq!(stored.tier_id, Some(silver.id));

        let again = policy.evaluate_and_apply_tier_change(m, t).await.unwrap();
        assert!(!again.changed());
    }
}
