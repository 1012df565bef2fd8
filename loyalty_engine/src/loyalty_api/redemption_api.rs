use std::{cmp::Reverse, fmt::Debug};

use chrono::{DateTime, Duration, Utc};
use log::*;
use loyalty_common::Points;
use serde::{Deserialize, Serialize};

use crate::{
    config::{EngineConfig, DEFAULT_REDEMPTION_CODE_ATTEMPTS, DEFAULT_REDEMPTION_CODE_TTL_DAYS},
    db_types::{
        CustomerMembership,
        LoyaltyProgram,
        NewPointsTransaction,
        ProgramType,
        RedemptionCode,
        RedemptionCodeStatus,
        Reward,
    },
    events::{EventProducers, RewardRedeemedEvent},
    helpers::generate_redemption_code,
    loyalty_api::{balance_api::BalanceApi, errors::RedemptionError, expiration_api::ExpirationPolicyResolver},
    traits::{LoyaltyDatabase, NewRedemption, RedemptionOutcome},
};

pub const REWARD_REDEMPTION_REASON: &str = "REWARD_REDEMPTION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionResult {
    pub transaction_id: i64,
    pub points_used: Points,
    pub new_balance: Points,
    pub redemption_code: String,
    pub expires_at: DateTime<Utc>,
}

/// A redemption code that was just accepted at the counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRedemption {
    pub id: i64,
    pub code: String,
    pub transaction_id: i64,
    pub reward_id: i64,
    pub reward_name: Option<String>,
    pub points_used: Points,
    pub membership_id: i64,
    pub status: RedemptionCodeStatus,
    pub used_at: Option<DateTime<Utc>>,
}

/// Spending points on rewards, and honouring the codes that redemption hands out.
pub struct RedemptionApi<B> {
    db: B,
    producers: EventProducers,
    balance: BalanceApi<B>,
    code_ttl_days: i64,
    code_attempts: u32,
}

impl<B: Debug> Debug for RedemptionApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RedemptionApi ({:?})", self.db)
    }
}

impl<B> RedemptionApi<B>
where B: Clone
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        let balance = BalanceApi::new(db.clone());
        Self {
            db,
            producers,
            balance,
            code_ttl_days: DEFAULT_REDEMPTION_CODE_TTL_DAYS,
            code_attempts: DEFAULT_REDEMPTION_CODE_ATTEMPTS,
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.code_ttl_days = config.redemption_code_ttl_days;
        self.code_attempts = config.redemption_code_attempts.max(1);
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> RedemptionApi<B>
where B: LoyaltyDatabase
{
    /// Redeems a reward for a member.
    ///
    /// The checks run in this order, and the first failure is returned:
    /// 1. the reward and the membership exist and belong to the same tenant,
    /// 2. the membership is active and the reward is available,
    /// 3. the reward costs at least the effective minimum redeemable amount,
    /// 4. the member's balance covers the cost, and
    /// 5. the member has not reached the reward's per-user redemption limit.
    ///
    /// The stock decrement, a second balance check, the REDEEM ledger row and the redemption code are then written in
    /// one database transaction, so a failure at any of these steps leaves no trace. Finally the balance is
    /// re-projected.
    pub async fn redeem_reward(&self, membership_id: i64, reward_id: i64) -> Result<RedemptionResult, RedemptionError> {
        let now = Utc::now();
        let reward = self.db.fetch_reward(reward_id).await?.ok_or(RedemptionError::RewardNotFound(reward_id))?;
        let membership =
            self.db.fetch_membership(membership_id).await?.ok_or(RedemptionError::MembershipNotFound(membership_id))?;
        if membership.tenant_id != reward.tenant_id {
            return Err(RedemptionError::TenantMismatch { membership_id, reward_id });
        }
        if !membership.is_active() {
            return Err(RedemptionError::MembershipInactive(membership_id));
        }
        if !reward.is_available(now) {
            return Err(RedemptionError::RewardUnavailable(reward_id));
        }
        let tenant = self
            .db
            .fetch_tenant(membership.tenant_id)
            .await?
            .ok_or(RedemptionError::TenantNotFound(membership.tenant_id))?;
        let program = self.base_program(membership_id, now).await?;
        let minimum = ExpirationPolicyResolver::effective_min_points_to_redeem(program.as_ref(), &tenant);
        let cost = reward.points_required;
        if cost < minimum {
            return Err(RedemptionError::BelowMinimumRedeem { minimum: minimum.value(), cost: cost.value() });
        }
        let available = self.db.calculate_balance(membership_id).await?;
        if available < cost {
            return Err(RedemptionError::InsufficientBalance { required: cost.value(), available: available.value() });
        }
        let previous = self.db.count_redemptions(membership_id, reward_id).await?;
        if !reward.can_redeem(previous) {
            let limit = reward.max_redemptions_per_user.unwrap_or_default();
            return Err(RedemptionError::RedemptionLimitReached { membership_id, reward_id, limit });
        }

        let expires_at = now + Duration::days(self.code_ttl_days);
        let redemption = NewRedemption {
            reward_id,
            transaction: redemption_row(&membership, &reward, now)?,
            candidate_codes: (0..self.code_attempts).map(|_| generate_redemption_code()).collect(),
            expires_at,
        };
        let (transaction_id, code) = match self.db.redeem(redemption).await? {
            RedemptionOutcome::Redeemed { transaction_id, code } => (transaction_id, code),
            RedemptionOutcome::OutOfStock => return Err(RedemptionError::RewardUnavailable(reward_id)),
            RedemptionOutcome::InsufficientBalance { available } => {
                return Err(RedemptionError::InsufficientBalance {
                    required: cost.value(),
                    available: available.value(),
                });
            },
            RedemptionOutcome::Duplicate(id) => return Err(RedemptionError::DuplicateRedemption(id)),
            RedemptionOutcome::NoFreeCode => {
                error!("🎁️ No free redemption code for reward #{reward_id} and membership #{membership_id}");
                return Err(RedemptionError::CodeGenerationFailed(self.code_attempts));
            },
        };
        let new_balance = self.balance.sync_after_transaction(membership_id).await?;
        info!("🎁️ Membership #{membership_id} redeemed reward #{reward_id} for {cost}. Code {code}");
        self.producers
            .publish_reward_redeemed(RewardRedeemedEvent {
                tenant_id: tenant.id,
                membership_id,
                reward_id,
                transaction_id,
                points_used: cost,
                redemption_code: code.clone(),
            })
            .await;
        Ok(RedemptionResult { transaction_id, points_used: cost, new_balance, redemption_code: code, expires_at })
    }

    /// Accepts a redemption code on behalf of `validating_user_id` and marks it used.
    ///
    /// An expired code is marked as such and rejected. Used and cancelled codes are rejected.
    pub async fn validate_redemption_code(
        &self,
        code: &str,
        validating_user_id: i64,
    ) -> Result<ValidatedRedemption, RedemptionError> {
        let code = code.trim().to_uppercase();
        let mut redemption =
            self.db.fetch_redemption_code(&code).await?.ok_or_else(|| RedemptionError::CodeNotFound(code.clone()))?;
        let now = Utc::now();
        match redemption.status {
            RedemptionCodeStatus::Used => return Err(RedemptionError::CodeAlreadyUsed(code)),
            RedemptionCodeStatus::Cancelled => return Err(RedemptionError::CodeCancelled(code)),
            RedemptionCodeStatus::Expired => return Err(RedemptionError::CodeExpired(code)),
            RedemptionCodeStatus::Pending if redemption.is_expired(now) => {
                redemption.status = RedemptionCodeStatus::Expired;
                self.db.update_redemption_code(&redemption).await?;
                debug!("🎁️ Redemption code {code} expired at {}", redemption.expires_at);
                return Err(RedemptionError::CodeExpired(code));
            },
            RedemptionCodeStatus::Pending => {},
        }
        redemption.status = RedemptionCodeStatus::Used;
        redemption.used_at = Some(now);
        redemption.used_by = Some(validating_user_id);
        self.db.update_redemption_code(&redemption).await?;
        info!("🎁️ Redemption code {code} accepted by user #{validating_user_id}");

        let reward = self.db.fetch_reward(redemption.reward_id).await?;
        let points_used = match self.db.fetch_transaction(redemption.transaction_id).await? {
            Some(tx) => -tx.points_delta,
            None => reward.as_ref().map(|r| r.points_required).unwrap_or_default(),
        };
        Ok(validated(redemption, reward, points_used))
    }

    /// The highest ranked active BASE program the membership is enrolled in.
    async fn base_program(
        &self,
        membership_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<LoyaltyProgram>, RedemptionError> {
        let ids = self
            .db
            .fetch_active_enrollments(membership_id, now)
            .await?
            .into_iter()
            .map(|e| e.program_id)
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(None);
        }
        let mut programs = self
            .db
            .fetch_programs(&ids)
            .await?
            .into_iter()
            .filter(|p| p.program_type == ProgramType::Base && p.is_active(now))
            .collect::<Vec<_>>();
        programs.sort_by_key(|p| (Reverse(p.priority_rank), p.id));
        Ok(programs.into_iter().next())
    }
}

fn redemption_row(
    membership: &CustomerMembership,
    reward: &Reward,
    now: DateTime<Utc>,
) -> Result<NewPointsTransaction, RedemptionError> {
    let key = format!("REDEEM-{}-{}-{}", membership.id, reward.id, now.timestamp_millis());
    let tx = NewPointsTransaction::redeem(
        membership.tenant_id,
        membership.user_id,
        membership.id,
        reward.id,
        reward.points_required,
        key,
    )?
    .with_reason_code(REWARD_REDEMPTION_REASON)
    .with_created_by(membership.user_id.to_string())
    .with_metadata(serde_json::json!({ "rewardName": reward.name, "rewardCategory": reward.category }))
    .with_created_at(now);
    Ok(tx)
}

fn validated(code: RedemptionCode, reward: Option<Reward>, points_used: Points) -> ValidatedRedemption {
    ValidatedRedemption {
        id: code.id,
        code: code.code,
        transaction_id: code.transaction_id,
        reward_id: code.reward_id,
        reward_name: reward.map(|r| r.name),
        points_used,
        membership_id: code.membership_id,
        status: code.status,
        used_at: code.used_at,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        db_types::{MembershipStatus, NewMembership, NewReward, NewTenant, TransactionType},
        helpers::is_well_formed_redemption_code,
        test_utils::{
            prepare_env::fresh_database,
            seed::{BasicScene, Seeder},
        },
        traits::{LedgerManagement, MembershipManagement, NewRedemption, RedemptionOutcome, RewardManagement},
    };

    async fn fund(seeder: &Seeder, scene: &BasicScene, points: i64) {
        let m = &scene.membership;
        let tx = NewPointsTransaction::earning(scene.tenant.id, m.user_id, m.id, Points::from(points), "fund".into())
            .unwrap()
            .with_program(scene.program.id);
        seeder.ledger_row(tx).await;
    }

    #[tokio::test]
    async fn redeem_then_validate() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        fund(&seeder, &scene, 500).await;
        let reward = seeder.reward(NewReward::new(scene.tenant.id, "Free coffee", 300).with_stock(2)).await;
        let api = RedemptionApi::new(db.clone(), EventProducers::default());

        let result = api.redeem_reward(scene.membership.id, reward.id).await.unwrap();
        assert_eq!(result.points_used, Points::from(300));
        assert_eq!(result.new_balance, Points::from(200));
        assert!(is_well_formed_redemption_code(&result.redemption_code));
        assert!(result.expires_at > Utc::now() + Duration::days(29));
        let row = db.fetch_transaction(result.transaction_id).await.unwrap().unwrap();
        assert_eq!(row.tx_type, TransactionType::Redeem);
        assert_eq!(row.points_delta, Points::from(-300));
        assert_eq!(row.reward_id, Some(reward.id));
        assert_eq!(db.fetch_reward(reward.id).await.unwrap().unwrap().stock, 1);
        assert_eq!(db.fetch_membership(scene.membership.id).await.unwrap().unwrap().points, Points::from(200));

        let err = api.redeem_reward(scene.membership.id, reward.id).await.unwrap_err();
        assert!(matches!(err, RedemptionError::InsufficientBalance { required: 300, available: 200 }));

        let accepted = api.validate_redemption_code(&result.redemption_code.to_lowercase(), 77).await.unwrap();
        assert_eq!(accepted.status, RedemptionCodeStatus::Used);
        assert_eq!(accepted.points_used, Points::from(300));
        assert_eq!(accepted.reward_name.as_deref(), Some("Free coffee"));
        let err = api.validate_redemption_code(&result.redemption_code, 77).await.unwrap_err();
        assert!(matches!(err, RedemptionError::CodeAlreadyUsed(_)));
        let err = api.validate_redemption_code("ZZZZZZZZ", 77).await.unwrap_err();
        assert!(matches!(err, RedemptionError::CodeNotFound(_)));
    }

    #[tokio::test]
    async fn redemption_preconditions() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        fund(&seeder, &scene, 1_000).await;
        let t = scene.tenant.id;
        let m = scene.membership.id;
        let api = RedemptionApi::new(db.clone(), EventProducers::default());

        let cheap = seeder.reward(NewReward::new(t, "Sticker", 50)).await;
        let err = api.redeem_reward(m, cheap.id).await.unwrap_err();
        assert!(matches!(err, RedemptionError::BelowMinimumRedeem { minimum: 100, cost: 50 }));

        let sold_out = seeder.reward(NewReward::new(t, "Mug", 200).with_stock(0)).await;
        assert!(matches!(api.redeem_reward(m, sold_out.id).await.unwrap_err(), RedemptionError::RewardUnavailable(_)));

        let other = seeder.tenant(NewTenant::new("Elsewhere")).await;
        let foreign = seeder.reward(NewReward::new(other.id, "Hat", 200)).await;
        assert!(matches!(api.redeem_reward(m, foreign.id).await.unwrap_err(), RedemptionError::TenantMismatch { .. }));

        let once = seeder.reward(NewReward::new(t, "Tote", 200).with_max_redemptions_per_user(1)).await;
        api.redeem_reward(m, once.id).await.unwrap();
        let err = api.redeem_reward(m, once.id).await.unwrap_err();
        assert!(matches!(err, RedemptionError::RedemptionLimitReached { limit: 1, .. }));

        let inactive = seeder.membership(NewMembership::new(5, t).with_status(MembershipStatus::Inactive)).await;
        let err = api.redeem_reward(inactive.id, once.id).await.unwrap_err();
        assert!(matches!(err, RedemptionError::MembershipInactive(_)));
        assert!(matches!(api.redeem_reward(m, 9_999).await.unwrap_err(), RedemptionError::RewardNotFound(9_999)));
    }

    #[tokio::test]
    async fn expired_codes_are_marked() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        fund(&seeder, &scene, 500).await;
        let reward = seeder.reward(NewReward::new(scene.tenant.id, "Cake", 100)).await;
        let config = EngineConfig { redemption_code_ttl_days: -1, ..Default::default() };
        let api = RedemptionApi::new(db.clone(), EventProducers::default()).with_config(&config);

        let result = api.redeem_reward(scene.membership.id, reward.id).await.unwrap();
        let err = api.validate_redemption_code(&result.redemption_code, 1).await.unwrap_err();
        assert!(matches!(err, RedemptionError::CodeExpired(_)));
        let stored = db.fetch_redemption_code(&result.redemption_code).await.unwrap().unwrap();
        assert_eq!(stored.status, RedemptionCodeStatus::Expired);
        assert_eq!(stored.transaction_id, result.transaction_id);
    }

    #[tokio::test]
    async fn a_redemption_without_a_free_code_leaves_no_trace() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        fund(&seeder, &scene, 1_000).await;
        let m = &scene.membership;
        let reward = seeder.reward(NewReward::new(scene.tenant.id, "Muffin", 200).with_stock(3)).await;
        let api = RedemptionApi::new(db.clone(), EventProducers::default());
        let first = api.redeem_reward(m.id, reward.id).await.unwrap();
        let rows = db.fetch_transactions_for_membership(m.id).await.unwrap().len();

        let later = Utc::now() + Duration::seconds(5);
        let redemption = NewRedemption {
            reward_id: reward.id,
            transaction: redemption_row(m, &reward, later).unwrap(),
            candidate_codes: vec![first.redemption_code.clone(), first.redemption_code.clone()],
            expires_at: later + Duration::days(1),
        };
        assert_eq!(db.redeem(redemption).await.unwrap(), RedemptionOutcome::NoFreeCode);
        assert_eq!(db.fetch_reward(reward.id).await.unwrap().unwrap().stock, 2);
        assert_eq!(db.fetch_transactions_for_membership(m.id).await.unwrap().len(), rows);
        assert_eq!(db.calculate_balance(m.id).await.unwrap(), Points::from(800));
        let code = db.fetch_redemption_code(&first.redemption_code).await.unwrap().unwrap();
        assert_eq!(code.transaction_id, first.transaction_id);
    }

    #[tokio::test]
    async fn redeem_rechecks_the_balance_and_the_ledger_key() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        fund(&seeder, &scene, 250).await;
        let m = &scene.membership;
        let t = scene.tenant.id;
        let now = Utc::now();
        let candidates = || vec![generate_redemption_code(), generate_redemption_code()];

        let pricey = seeder.reward(NewReward::new(t, "Blender", 300).with_stock(1)).await;
        let redemption = NewRedemption {
            reward_id: pricey.id,
            transaction: redemption_row(m, &pricey, now).unwrap(),
            candidate_codes: candidates(),
            expires_at: now + Duration::days(1),
        };
        let outcome = db.redeem(redemption).await.unwrap();
        assert_eq!(outcome, RedemptionOutcome::InsufficientBalance { available: Points::from(250) });
        assert_eq!(db.fetch_reward(pricey.id).await.unwrap().unwrap().stock, 1);

        let scone = seeder.reward(NewReward::new(t, "Scone", 100).with_stock(4)).await;
        let redemption = || NewRedemption {
            reward_id: scone.id,
            transaction: redemption_row(m, &scone, now).unwrap(),
            candidate_codes: candidates(),
            expires_at: now + Duration::days(1),
        };
        let transaction_id = match db.redeem(redemption()).await.unwrap() {
            RedemptionOutcome::Redeemed { transaction_id, .. } => transaction_id,
            other => panic!("Expected a redemption, got {other:?}"),
        };
        assert_eq!(db.redeem(redemption()).await.unwrap(), RedemptionOutcome::Duplicate(transaction_id));
        assert_eq!(db.fetch_reward(scone.id).await.unwrap().unwrap().stock, 3);
        assert_eq!(db.calculate_balance(m.id).await.unwrap(), Points::from(150));
        assert!(db.fetch_redemption_code_for_transaction(transaction_id).await.unwrap().is_some());

        let sold_out = seeder.reward(NewReward::new(t, "Tart", 100).with_stock(0)).await;
        let redemption = NewRedemption {
            reward_id: sold_out.id,
            transaction: redemption_row(m, &sold_out, now).unwrap(),
            candidate_codes: candidates(),
            expires_at: now + Duration::days(1),
        };
        assert_eq!(db.redeem(redemption).await.unwrap(), RedemptionOutcome::OutOfStock);
        assert_eq!(db.calculate_balance(m.id).await.unwrap(), Points::from(150));
    }
}
