//! Fixture helpers that write configuration straight into a test database.
//!
//! The engine never creates tenants, programs or rules itself, so tests use these to set the scene.
use chrono::{DateTime, Utc};
use loyalty_common::Points;
use sqlx::SqlitePool;

use crate::{
    db_types::{
        CustomerMembership,
        CustomerTier,
        LoyaltyProgram,
        NewCustomerTier,
        NewEnrollment,
        NewLoyaltyProgram,
        NewMembership,
        NewPointsTransaction,
        NewReferral,
        NewReward,
        NewRewardRule,
        NewTenant,
        NewTierBenefit,
        Referral,
        Reward,
        RewardRule,
        Tenant,
        TierBenefit,
        TierStatus,
    },
    sqlite::db::{ledger, memberships, programs, referrals, rewards, tenants},
    traits::InsertTransactionResult,
    SqliteDatabase,
};

#[derive(Clone)]
pub struct Seeder {
    pool: SqlitePool,
}

impl Seeder {
    pub fn new(db: &SqliteDatabase) -> Self {
        Self { pool: db.pool().clone() }
    }

    pub async fn tenant(&self, tenant: NewTenant) -> Tenant {
        let mut conn = self.pool.acquire().await.expect("No connection");
        tenants::insert_tenant(tenant, &mut conn).await.expect("Error seeding tenant")
    }

    pub async fn tier(&self, tier: NewCustomerTier) -> CustomerTier {
        let mut conn = self.pool.acquire().await.expect("No connection");
        tenants::insert_tier(tier, &mut conn).await.expect("Error seeding tier")
    }

    pub async fn tier_benefit(&self, benefit: NewTierBenefit) -> TierBenefit {
        let mut conn = self.pool.acquire().await.expect("No connection");
        tenants::insert_tier_benefit(benefit, &mut conn).await.expect("Error seeding tier benefit")
    }

    pub async fn membership(&self, membership: NewMembership) -> CustomerMembership {
        let mut conn = self.pool.acquire().await.expect("No connection");
        memberships::insert_membership(membership, &mut conn).await.expect("Error seeding membership")
    }

    pub async fn program(&self, program: NewLoyaltyProgram) -> LoyaltyProgram {
        let mut conn = self.pool.acquire().await.expect("No connection");
        programs::insert_program(program, &mut conn).await.expect("Error seeding program")
    }

    pub async fn enroll(&self, membership_id: i64, program_id: i64) -> i64 {
        self.enrollment(NewEnrollment::new(membership_id, program_id)).await
    }

    pub async fn enrollment(&self, enrollment: NewEnrollment) -> i64 {
        let mut conn = self.pool.acquire().await.expect("No connection");
        memberships::insert_enrollment(enrollment, &mut conn).await.expect("Error seeding enrollment")
    }

    pub async fn rule(&self, rule: NewRewardRule) -> RewardRule {
        let mut conn = self.pool.acquire().await.expect("No connection");
        programs::insert_rule(rule, &mut conn).await.expect("Error seeding rule")
    }

    pub async fn reward(&self, reward: NewReward) -> Reward {
        let mut conn = self.pool.acquire().await.expect("No connection");
        rewards::insert_reward(reward, &mut conn).await.expect("Error seeding reward")
    }

    pub async fn referral(&self, tenant_id: i64, referrer: i64, referred: i64, created_at: DateTime<Utc>) -> Referral {
        let mut conn = self.pool.acquire().await.expect("No connection");
        let referral = NewReferral {
            tenant_id,
            referrer_membership_id: referrer,
            referred_membership_id: referred,
            referral_code: None,
            created_at,
        };
        referrals::insert_referral(referral, &mut conn).await.expect("Error seeding referral")
    }

    /// Writes a ledger row directly, bypassing the event pipeline.
    pub async fn ledger_row(&self, tx: NewPointsTransaction) -> i64 {
        let mut conn = self.pool.acquire().await.expect("No connection");
        match ledger::idempotent_insert(tx, &mut conn).await.expect("Error seeding ledger row") {
            InsertTransactionResult::Inserted(id) => id,
            InsertTransactionResult::AlreadyExists(id) => panic!("Seeded ledger row clashes with #{id}"),
        }
    }
}

/// Materializes a rule without touching a database, for tests of pure evaluation logic.
pub fn rule_with_id(id: i64, r: NewRewardRule) -> RewardRule {
    RewardRule {
        id,
        program_id: r.program_id,
        name: r.name,
        trigger: r.trigger,
        scope: r.scope,
        eligibility: r.eligibility,
        points_formula: r.points_formula,
        limits: r.limits,
        conflict: r.conflict,
        idempotency_scope: r.idempotency_scope,
        earning_domain: r.earning_domain,
        status: r.status,
        version: 1,
        active_from: r.active_from,
        active_to: r.active_to,
    }
}

pub fn program_with_id(id: i64, p: NewLoyaltyProgram) -> LoyaltyProgram {
    LoyaltyProgram {
        id,
        tenant_id: p.tenant_id,
        name: p.name,
        program_type: p.program_type,
        earning_domains: p.earning_domains,
        priority_rank: p.priority_rank,
        stacking: p.stacking,
        expiration_policy: p.expiration_policy,
        currency: p.currency,
        min_points_to_redeem: p.min_points_to_redeem,
        status: p.status,
        version: 1,
        active_from: p.active_from,
        active_to: p.active_to,
    }
}

pub fn membership_with_id(id: i64, m: NewMembership) -> CustomerMembership {
    CustomerMembership {
        id,
        user_id: m.user_id,
        tenant_id: m.tenant_id,
        points: Points::zero(),
        tier_id: m.tier_id,
        total_spent: 0.0,
        total_visits: 0,
        last_visit: None,
        joined_date: m.joined_date,
        qr_code: m.qr_code,
        status: m.status,
        updated_at: m.joined_date,
    }
}

pub fn tier_with_id(id: i64, t: NewCustomerTier) -> CustomerTier {
    CustomerTier {
        id,
        tenant_id: t.tenant_id,
        name: t.name,
        min_points: t.min_points,
        max_points: t.max_points,
        multiplier: t.multiplier,
        priority: t.priority,
        status: TierStatus::Active,
    }
}

/// A tenant with one member enrolled in a single BASE program. Enough to exercise most of the pipeline.
pub struct BasicScene {
    pub tenant: Tenant,
    pub membership: CustomerMembership,
    pub program: LoyaltyProgram,
}

impl BasicScene {
    pub async fn create(seeder: &Seeder) -> Self {
        let tenant = seeder.tenant(NewTenant::new("Coffee Co")).await;
        let membership = seeder.membership(NewMembership::new(100, tenant.id).with_qr_code("QR-100")).await;
        let program = seeder
            .program(NewLoyaltyProgram::new(
                tenant.id,
                "Coffee Rewards",
                crate::db_types::ProgramType::Base,
                &[crate::db_types::BASE_PURCHASE, crate::db_types::BASE_VISIT],
                10,
            ))
            .await;
        seeder.enroll(membership.id, program.id).await;
        Self { tenant, membership, program }
    }
}
