//! `SqliteDatabase` is the concrete storage backend shipped with the loyalty engine.
//!
//! It implements every repository trait defined in the [`crate::traits`] module by delegating to the low-level
//! functions in [`super::db`].
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use loyalty_common::Points;
use sqlx::SqlitePool;

use super::db::{db_url, ledger, memberships, millis, new_pool, programs, referrals, rewards, tenants};
use crate::{
    db_types::{
        CustomerMembership,
        CustomerTier,
        Enrollment,
        EventType,
        LoyaltyProgram,
        NewPointsTransaction,
        NewRedemptionCode,
        NewReferral,
        PointsTransaction,
        ProgramType,
        RedemptionCode,
        Referral,
        Reward,
        RewardRule,
        Tenant,
        TierBenefit,
    },
    traits::{
        InsertCodeResult,
        InsertTransactionResult,
        LedgerError,
        LedgerManagement,
        LoyaltyDatabase,
        MembershipError,
        MembershipManagement,
        NewRedemption,
        ProgramError,
        ProgramManagement,
        RedemptionOutcome,
        ReferralError,
        ReferralManagement,
        RewardError,
        RewardManagement,
        TenantError,
        TenantManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl LoyaltyDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

impl MembershipManagement for SqliteDatabase {
    async fn fetch_membership(&self, membership_id: i64) -> Result<Option<CustomerMembership>, MembershipError> {
        let mut conn = self.pool.acquire().await?;
        memberships::fetch_membership(membership_id, &mut conn).await
    }

    async fn fetch_membership_for_customer(
        &self,
        customer_id: i64,
        tenant_id: i64,
    ) -> Result<Option<CustomerMembership>, MembershipError> {
        let mut conn = self.pool.acquire().await?;
        memberships::fetch_membership_for_customer(customer_id, tenant_id, &mut conn).await
    }

    async fn fetch_membership_by_qr_code(&self, qr_code: &str) -> Result<Option<CustomerMembership>, MembershipError> {
        let mut conn = self.pool.acquire().await?;
        memberships::fetch_membership_by_qr_code(qr_code, &mut conn).await
    }

    async fn fetch_memberships_for_tenant(&self, tenant_id: i64) -> Result<Vec<CustomerMembership>, MembershipError> {
        let mut conn = self.pool.acquire().await?;
        memberships::fetch_memberships_for_tenant(tenant_id, &mut conn).await
    }

    async fn record_visit(&self, membership_id: i64, at: DateTime<Utc>) -> Result<(), MembershipError> {
        let mut conn = self.pool.acquire().await?;
        memberships::record_visit(membership_id, millis(at), &mut conn).await?;
        trace!("🗃️ Visit recorded for membership #{membership_id}");
        Ok(())
    }

    async fn record_purchase(&self, membership_id: i64, amount: f64) -> Result<bool, MembershipError> {
        let mut conn = self.pool.acquire().await?;
        let first = memberships::record_purchase(membership_id, amount, &mut conn).await?;
        trace!("🗃️ Spend of {amount} recorded for membership #{membership_id}. First purchase: {first}");
        Ok(first)
    }

    async fn update_cached_points(&self, membership_id: i64, points: Points) -> Result<(), MembershipError> {
        let mut conn = self.pool.acquire().await?;
        memberships::update_cached_points(membership_id, points, &mut conn).await?;
        trace!("🗃️ Cached balance of membership #{membership_id} set to {points}");
        Ok(())
    }

    async fn assign_tier(&self, membership_id: i64, tier_id: Option<i64>) -> Result<(), MembershipError> {
        let mut conn = self.pool.acquire().await?;
        memberships::assign_tier(membership_id, tier_id, &mut conn).await
    }
}

impl ProgramManagement for SqliteDatabase {
    async fn fetch_program(&self, program_id: i64) -> Result<Option<LoyaltyProgram>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        programs::fetch_program(program_id, &mut conn).await
    }

    async fn fetch_programs(&self, program_ids: &[i64]) -> Result<Vec<LoyaltyProgram>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        programs::fetch_programs(program_ids, &mut conn).await
    }

    async fn fetch_programs_for_tenant(
        &self,
        tenant_id: i64,
        program_type: Option<ProgramType>,
    ) -> Result<Vec<LoyaltyProgram>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        programs::fetch_programs_for_tenant(tenant_id, program_type, &mut conn).await
    }

    async fn fetch_active_enrollments(
        &self,
        membership_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Enrollment>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        memberships::fetch_active_enrollments(membership_id, millis(now), &mut conn).await
    }

    async fn fetch_rule(&self, rule_id: i64) -> Result<Option<RewardRule>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        programs::fetch_rule(rule_id, &mut conn).await
    }

    async fn fetch_rules(&self, rule_ids: &[i64]) -> Result<Vec<RewardRule>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        programs::fetch_rules(rule_ids, &mut conn).await
    }

    async fn fetch_rules_for_trigger(
        &self,
        program_id: i64,
        trigger: EventType,
    ) -> Result<Vec<RewardRule>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        programs::fetch_rules_for_programs(&[program_id], trigger, &mut conn).await
    }

    async fn fetch_rules_for_programs(
        &self,
        program_ids: &[i64],
        trigger: EventType,
    ) -> Result<Vec<RewardRule>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        programs::fetch_rules_for_programs(program_ids, trigger, &mut conn).await
    }

    async fn fetch_tenant_rules_for_trigger(
        &self,
        tenant_id: i64,
        trigger: EventType,
        now: DateTime<Utc>,
    ) -> Result<Vec<RewardRule>, ProgramError> {
        let mut conn = self.pool.acquire().await?;
        programs::fetch_tenant_rules_for_trigger(tenant_id, trigger, millis(now), &mut conn).await
    }
}

impl LedgerManagement for SqliteDatabase {
    async fn insert_transaction(&self, tx: NewPointsTransaction) -> Result<InsertTransactionResult, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let tx_type = tx.tx_type;
        let delta = tx.points_delta;
        let result = ledger::idempotent_insert(tx, &mut conn).await?;
        if result.is_new() {
            debug!("🗃️ {tx_type} ledger row #{} written for {delta}", result.id());
        }
        Ok(result)
    }

    async fn fetch_transaction(&self, id: i64) -> Result<Option<PointsTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_transaction(id, &mut conn).await
    }

    async fn fetch_transaction_by_key(&self, idempotency_key: &str) -> Result<Option<PointsTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_by_idempotency_key(idempotency_key, &mut conn).await
    }

    async fn fetch_transactions_by_keys(&self, keys: &[String]) -> Result<Vec<PointsTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_by_idempotency_keys(keys, &mut conn).await
    }

    async fn fetch_earnings_in_period(
        &self,
        membership_id: i64,
        program_id: i64,
        rule_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_earnings_in_period(membership_id, program_id, rule_id, millis(start), millis(end), &mut conn)
            .await
    }

    async fn fetch_for_tier_evaluation(
        &self,
        membership_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_for_membership_in_period(membership_id, millis(start), millis(end), &mut conn).await
    }

    async fn fetch_transactions_for_membership(
        &self,
        membership_id: i64,
    ) -> Result<Vec<PointsTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_for_membership(membership_id, &mut conn).await
    }

    async fn fetch_expired_earnings(
        &self,
        membership_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_expired_earnings(membership_id, millis(now), &mut conn).await
    }

    async fn fetch_reversals_of(&self, transaction_id: i64) -> Result<Vec<PointsTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_reversals_of(transaction_id, &mut conn).await
    }

    async fn count_redemptions(&self, membership_id: i64, reward_id: i64) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::count_redemptions(membership_id, reward_id, &mut conn).await
    }

    async fn calculate_balance(&self, membership_id: i64) -> Result<Points, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::calculate_balance(membership_id, &mut conn).await
    }

    async fn calculate_program_balance(&self, membership_id: i64, program_id: i64) -> Result<Points, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        ledger::calculate_program_balance(membership_id, program_id, &mut conn).await
    }
}

impl TenantManagement for SqliteDatabase {
    async fn fetch_tenant(&self, tenant_id: i64) -> Result<Option<Tenant>, TenantError> {
        let mut conn = self.pool.acquire().await?;
        tenants::fetch_tenant(tenant_id, &mut conn).await
    }

    async fn fetch_active_tenants(&self) -> Result<Vec<Tenant>, TenantError> {
        let mut conn = self.pool.acquire().await?;
        tenants::fetch_active_tenants(&mut conn).await
    }

    async fn fetch_tier(&self, tier_id: i64) -> Result<Option<CustomerTier>, TenantError> {
        let mut conn = self.pool.acquire().await?;
        tenants::fetch_tier(tier_id, &mut conn).await
    }

    async fn fetch_tiers_for_tenant(&self, tenant_id: i64) -> Result<Vec<CustomerTier>, TenantError> {
        let mut conn = self.pool.acquire().await?;
        tenants::fetch_tiers_for_tenant(tenant_id, &mut conn).await
    }

    async fn fetch_tier_benefit(&self, program_id: i64, tier_id: i64) -> Result<Option<TierBenefit>, TenantError> {
        let mut conn = self.pool.acquire().await?;
        tenants::fetch_tier_benefit(program_id, tier_id, &mut conn).await
    }
}

impl ReferralManagement for SqliteDatabase {
    async fn insert_referral(&self, referral: NewReferral) -> Result<Referral, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        let referral = referrals::insert_referral(referral, &mut conn).await?;
        debug!(
            "🗃️ Referral #{} from membership #{} to #{} saved",
            referral.id, referral.referrer_membership_id, referral.referred_membership_id
        );
        Ok(referral)
    }

    async fn fetch_referral(&self, referral_id: i64) -> Result<Option<Referral>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::fetch_referral(referral_id, &mut conn).await
    }

    async fn fetch_active_referral_between(
        &self,
        referrer_membership_id: i64,
        referred_membership_id: i64,
    ) -> Result<Option<Referral>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::fetch_active_referral_between(referrer_membership_id, referred_membership_id, &mut conn).await
    }

    async fn count_referrals_in_period(
        &self,
        referrer_membership_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::count_referrals_in_period(referrer_membership_id, millis(start), millis(end), &mut conn).await
    }

    async fn fetch_referrals_for_referred_since(
        &self,
        referred_membership_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Referral>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::fetch_referrals_for_referred_since(referred_membership_id, millis(since), &mut conn).await
    }

    async fn fetch_pending_for_referred(&self, referred_membership_id: i64) -> Result<Vec<Referral>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::fetch_pending_for_referred(referred_membership_id, &mut conn).await
    }

    async fn fetch_completed_without_reward(&self, tenant_id: i64) -> Result<Vec<Referral>, ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::fetch_completed_without_reward(tenant_id, &mut conn).await
    }

    async fn save_referral(&self, referral: &Referral) -> Result<(), ReferralError> {
        let mut conn = self.pool.acquire().await?;
        referrals::save_referral(referral, &mut conn).await
    }
}

impl RewardManagement for SqliteDatabase {
    async fn fetch_reward(&self, reward_id: i64) -> Result<Option<Reward>, RewardError> {
        let mut conn = self.pool.acquire().await?;
        rewards::fetch_reward(reward_id, &mut conn).await
    }

    /// Takes the redemption in a single atomic transaction:
    /// * takes one unit of stock. This is the first statement, so it also takes the write lock and concurrent
    ///   redemptions queue up behind it,
    /// * re-reads the balance and compares it with the cost,
    /// * writes the REDEEM row, and
    /// * stores the first candidate code that is not already taken.
    ///
    /// The transaction is only committed when all of the above succeed.
    async fn redeem(&self, redemption: NewRedemption) -> Result<RedemptionOutcome, RewardError> {
        let cost = redemption.cost();
        let NewRedemption { reward_id, transaction, candidate_codes, expires_at } = redemption;
        let membership_id = transaction.membership_id;
        let tenant_id = transaction.tenant_id;
        let mut tx = self.pool.begin().await?;
        if !rewards::decrement_stock(reward_id, &mut tx).await? {
            tx.rollback().await?;
            return Ok(RedemptionOutcome::OutOfStock);
        }
        let available = ledger::calculate_balance(membership_id, &mut tx).await?;
        if available < cost {
            tx.rollback().await?;
            return Ok(RedemptionOutcome::InsufficientBalance { available });
        }
        let transaction_id = match ledger::idempotent_insert(transaction, &mut tx).await? {
            InsertTransactionResult::Inserted(id) => id,
            InsertTransactionResult::AlreadyExists(id) => {
                tx.rollback().await?;
                return Ok(RedemptionOutcome::Duplicate(id));
            },
        };
        for code in candidate_codes {
            let new_code = NewRedemptionCode {
                code: code.clone(),
                transaction_id,
                reward_id,
                membership_id,
                tenant_id,
                expires_at,
            };
            match rewards::insert_redemption_code(new_code, &mut tx).await? {
                InsertCodeResult::Inserted(_) => {
                    tx.commit().await?;
                    debug!("🗃️ Reward #{reward_id} redeemed by membership #{membership_id}, row #{transaction_id}");
                    return Ok(RedemptionOutcome::Redeemed { transaction_id, code });
                },
                InsertCodeResult::Collision => trace!("🗃️ Redemption code {code} is taken"),
            }
        }
        tx.rollback().await?;
        Ok(RedemptionOutcome::NoFreeCode)
    }

    async fn fetch_redemption_code(&self, code: &str) -> Result<Option<RedemptionCode>, RewardError> {
        let mut conn = self.pool.acquire().await?;
        rewards::fetch_redemption_code(code, &mut conn).await
    }

    async fn fetch_redemption_code_for_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Option<RedemptionCode>, RewardError> {
        let mut conn = self.pool.acquire().await?;
        rewards::fetch_redemption_code_for_transaction(transaction_id, &mut conn).await
    }

    async fn update_redemption_code(&self, code: &RedemptionCode) -> Result<(), RewardError> {
        let mut conn = self.pool.acquire().await?;
        rewards::update_redemption_code(code, &mut conn).await
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL from `LOYALTY_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }
}
