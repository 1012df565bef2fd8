//! Points expiry: when earned points expire, and the batch that removes them from the ledger.
//!
//! Expiry dates are stamped on EARNING rows at write time
//! (see [`ExpirationPolicyResolver::calculate_expiration_date`]).
//! The processor later finds rows whose date has passed and offsets them with EXPIRATION rows, using the policy of the
//! program that granted them:
//! * `simple`: one aggregate row per membership, program and month.
//! * `bucketed`: one row per expired EARNING row, oldest first.
//!
//! Both are idempotent through their idempotency keys, and neither ever expires more than the membership holds.
use std::{
    collections::{BTreeMap, HashMap},
    fmt::Debug,
};

use chrono::{DateTime, Duration, Utc};
use log::*;
use loyalty_common::Points;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    db_types::{
        CustomerMembership,
        ExpirationPolicyType,
        LoyaltyProgram,
        NewPointsTransaction,
        PointsTransaction,
        Tenant,
        TransactionType,
    },
    events::{EventProducers, PointsExpiredEvent},
    helpers::month_key,
    loyalty_api::{balance_api::BalanceApi, errors::ExpirationError},
    traits::{LedgerManagement, MembershipManagement, ProgramManagement, TenantManagement},
};

pub const SIMPLE_EXPIRATION_REASON: &str = "POINTS_EXPIRATION";
pub const BUCKETED_EXPIRATION_REASON: &str = "POINTS_EXPIRATION_BUCKETED";

/// Resolves the effective expiry and redemption settings from a program and its tenant.
pub struct ExpirationPolicyResolver;

impl ExpirationPolicyResolver {
    /// The program's threshold if it sets one, otherwise the tenant's.
    pub fn effective_min_points_to_redeem(program: Option<&LoyaltyProgram>, tenant: &Tenant) -> Points {
        match program.map(|p| p.min_points_to_redeem).filter(|p| p.is_positive()) {
            Some(points) => points,
            None => tenant.min_points_to_redeem,
        }
    }

    /// A program decides for itself. Without a program the tenant's default expiry applies.
    pub fn is_expiration_enabled(program: Option<&LoyaltyProgram>, tenant: &Tenant) -> bool {
        match program {
            Some(p) => p.expiration_policy.enabled,
            None => tenant.points_expire_days > 0,
        }
    }

    /// When points earned at `earned_at` expire, or `None` if they never do.
    ///
    /// The program's `days_to_expire` takes precedence over the tenant default, and the program's grace period is
    /// added on top. A resulting period of zero days or less means no expiry.
    pub fn calculate_expiration_date(
        program: Option<&LoyaltyProgram>,
        tenant: &Tenant,
        earned_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !Self::is_expiration_enabled(program, tenant) {
            return None;
        }
        let policy = program.map(|p| &p.expiration_policy);
        let days = policy.and_then(|p| p.days_to_expire).unwrap_or(tenant.points_expire_days);
        let grace = policy.and_then(|p| p.grace_period_days).unwrap_or(0).max(0);
        let total = days + grace;
        (total > 0).then(|| earned_at + Duration::days(total))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipExpiration {
    pub membership_id: i64,
    pub transactions_created: Vec<i64>,
    pub points_expired: Points,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantExpirationReport {
    pub tenant_id: i64,
    pub memberships_processed: usize,
    pub transactions_created: usize,
    pub points_expired: Points,
    pub failures: usize,
}

pub struct ExpirationApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B: Debug> Debug for ExpirationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExpirationApi ({:?})", self.db)
    }
}

impl<B> ExpirationApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> ExpirationApi<B>
where B: LedgerManagement + MembershipManagement + ProgramManagement + TenantManagement + Clone
{
    /// Runs the expiry batch over every active tenant. A failing tenant is logged and reported with a failure count;
    /// the remaining tenants are still processed.
    pub async fn process_all_tenants(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TenantExpirationReport>, ExpirationError> {
        let tenants = self.db.fetch_active_tenants().await?;
        let mut reports = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            match self.process_tenant(&tenant, now).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("⏳️ Expiration run for tenant #{} failed. {e}", tenant.id);
                    reports.push(TenantExpirationReport { tenant_id: tenant.id, failures: 1, ..Default::default() });
                },
            }
        }
        Ok(reports)
    }

    /// Expires points for every active membership of the tenant.
    pub async fn process_tenant(
        &self,
        tenant: &Tenant,
        now: DateTime<Utc>,
    ) -> Result<TenantExpirationReport, ExpirationError> {
        let memberships = self.db.fetch_memberships_for_tenant(tenant.id).await?;
        let mut report = TenantExpirationReport { tenant_id: tenant.id, ..Default::default() };
        for membership in memberships.iter().filter(|m| m.is_active()) {
            report.memberships_processed += 1;
            match self.process_membership(tenant, membership, now).await {
                Ok(result) => {
                    report.transactions_created += result.transactions_created.len();
                    report.points_expired += result.points_expired;
                },
                Err(e) => {
                    warn!("⏳️ Could not expire points for membership #{}. {e}", membership.id);
                    report.failures += 1;
                },
            }
        }
        info!(
            "⏳️ Tenant #{}: {} memberships checked, {} expiration rows, {} expired, {} failures",
            tenant.id,
            report.memberships_processed,
            report.transactions_created,
            report.points_expired,
            report.failures
        );
        Ok(report)
    }

    /// Writes the EXPIRATION rows due for one membership and re-projects its balance if anything was written.
    pub async fn process_membership(
        &self,
        tenant: &Tenant,
        membership: &CustomerMembership,
        now: DateTime<Utc>,
    ) -> Result<MembershipExpiration, ExpirationError> {
        let mut result = MembershipExpiration { membership_id: membership.id, ..Default::default() };
        let expired = self.db.fetch_expired_earnings(membership.id, now).await?;
        if expired.is_empty() {
            return Ok(result);
        }
        let history = self.db.fetch_transactions_for_membership(membership.id).await?;
        let reversed = reversed_amounts(&history);
        let mut by_program = BTreeMap::<Option<i64>, Vec<&PointsTransaction>>::new();
        for tx in &expired {
            by_program.entry(tx.program_id).or_default().push(tx);
        }
        let program_ids = by_program.keys().flatten().copied().collect::<Vec<_>>();
        let programs =
            self.db.fetch_programs(&program_ids).await?.into_iter().map(|p| (p.id, p)).collect::<HashMap<_, _>>();

        let mut available = self.db.calculate_balance(membership.id).await?;
        for (program_id, rows) in by_program {
            let policy = program_id
                .and_then(|id| programs.get(&id))
                .map(|p| p.expiration_policy.policy_type)
                .unwrap_or(ExpirationPolicyType::Simple);
            let pending = match policy {
                ExpirationPolicyType::Simple => {
                    simple_expiration(tenant, membership, program_id, &rows, &history, &reversed, now)?
                },
                ExpirationPolicyType::Bucketed => bucketed_expirations(tenant, membership, &rows, &reversed, now)?,
            };
            for mut tx in pending {
                let amount = (-tx.points_delta).min(available);
                if !amount.is_positive() {
                    debug!("⏳️ Membership #{} has nothing left to expire", membership.id);
                    break;
                }
                tx.points_delta = -amount;
                let inserted = self.db.insert_transaction(tx).await?;
                if !inserted.is_new() {
                    continue;
                }
                available -= amount;
                result.transactions_created.push(inserted.id());
                result.points_expired += amount;
                let event = PointsExpiredEvent {
                    tenant_id: tenant.id,
                    membership_id: membership.id,
                    program_id,
                    transaction_id: inserted.id(),
                    points_expired: amount,
                };
                self.producers.publish_points_expired(event).await;
            }
        }
        if !result.transactions_created.is_empty() {
            BalanceApi::new(self.db.clone()).sync_after_transaction(membership.id).await?;
            debug!("⏳️ Expired {} for membership #{}", result.points_expired, membership.id);
        }
        Ok(result)
    }
}

/// How much of each row has been cancelled by reversals, keyed by the reversed row's id.
fn reversed_amounts(history: &[PointsTransaction]) -> HashMap<i64, Points> {
    let mut reversed = HashMap::new();
    for tx in history.iter().filter(|tx| tx.tx_type == TransactionType::Reversal) {
        if let Some(original) = tx.reversal_of {
            *reversed.entry(original).or_insert_with(Points::zero) += -tx.points_delta;
        }
    }
    reversed
}

fn outstanding(tx: &PointsTransaction, reversed: &HashMap<i64, Points>) -> Points {
    (tx.points_delta - reversed.get(&tx.id).copied().unwrap_or_default()).non_negative()
}

/// The single aggregate row for the program. Points already expired in earlier runs are subtracted, so a row is only
/// produced for what is still outstanding.
fn simple_expiration(
    tenant: &Tenant,
    membership: &CustomerMembership,
    program_id: Option<i64>,
    rows: &[&PointsTransaction],
    history: &[PointsTransaction],
    reversed: &HashMap<i64, Points>,
    now: DateTime<Utc>,
) -> Result<Vec<NewPointsTransaction>, ExpirationError> {
    let expired_total = rows.iter().map(|tx| outstanding(tx, reversed)).sum::<Points>();
    let already_expired = history
        .iter()
        .filter(|tx| tx.tx_type == TransactionType::Expiration && tx.program_id == program_id)
        .map(|tx| -tx.points_delta)
        .sum::<Points>();
    let amount = expired_total - already_expired;
    if !amount.is_positive() {
        return Ok(Vec::new());
    }
    let program_tag = program_id.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string());
    let key = format!("EXPIRATION-{}-{program_tag}-{}", membership.id, month_key(now));
    let mut tx = NewPointsTransaction::expiration(tenant.id, membership.user_id, membership.id, amount, key)?
        .with_reason_code(SIMPLE_EXPIRATION_REASON)
        .with_metadata(json!({
            "expiredTransactionIds": rows.iter().map(|tx| tx.id).collect::<Vec<_>>(),
            "month": month_key(now),
        }))
        .with_created_at(now);
    if let Some(id) = program_id {
        tx = tx.with_program(id);
    }
    Ok(vec![tx])
}

/// One row per expired EARNING row, oldest first.
fn bucketed_expirations(
    tenant: &Tenant,
    membership: &CustomerMembership,
    rows: &[&PointsTransaction],
    reversed: &HashMap<i64, Points>,
    now: DateTime<Utc>,
) -> Result<Vec<NewPointsTransaction>, ExpirationError> {
    let mut sorted = rows.to_vec();
    sorted.sort_by_key(|tx| (tx.created_at, tx.id));
    let mut result = Vec::with_capacity(sorted.len());
    for earned in sorted {
        let amount = outstanding(earned, reversed);
        if !amount.is_positive() {
            continue;
        }
        let key = format!("EXPIRATION-{}-{}", membership.id, earned.id);
        let mut tx = NewPointsTransaction::expiration(tenant.id, membership.user_id, membership.id, amount, key)?
            .with_reason_code(BUCKETED_EXPIRATION_REASON)
            .with_correlation_id(Some(earned.id.to_string()))
            .with_metadata(json!({ "expiredTransactionId": earned.id, "earnedAt": earned.created_at }))
            .with_created_at(now);
        if let Some(id) = earned.program_id {
            tx = tx.with_program(id);
        }
        result.push(tx);
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::{
        db_types::{ExpirationPolicy, NewLoyaltyProgram, NewTenant, ProgramType, BASE_PURCHASE},
        test_utils::{
            prepare_env::fresh_database,
            seed::{program_with_id, BasicScene, Seeder},
        },
        traits::MembershipManagement,
    };

    fn tenant(expire_days: i64) -> Tenant {
        Tenant {
            id: 1,
            name: "T".into(),
            status: crate::db_types::TenantStatus::Active,
            points_expire_days: expire_days,
            min_points_to_redeem: Points::from(100),
            redemption_code_ttl_minutes: 15,
        }
    }

    fn program(policy: ExpirationPolicy, min_redeem: i64) -> LoyaltyProgram {
        program_with_id(
            1,
            NewLoyaltyProgram::new(1, "P", ProgramType::Base, &[BASE_PURCHASE], 1)
                .with_expiration_policy(policy)
                .with_min_points_to_redeem(min_redeem),
        )
    }

    #[test]
    fn expiry_dates() {
        let earned = Utc::now();
        let t = tenant(365);
        let expires = ExpirationPolicyResolver::calculate_expiration_date(None, &t, earned);
        assert_eq!(expires, Some(earned + Duration::days(365)));
        assert_eq!(ExpirationPolicyResolver::calculate_expiration_date(None, &tenant(0), earned), None);
        let disabled = program(ExpirationPolicy::default(), 0);
        assert_eq!(ExpirationPolicyResolver::calculate_expiration_date(Some(&disabled), &t, earned), None);
        let own = program(ExpirationPolicy::simple(90).with_grace_period(7), 0);
        assert_eq!(
            ExpirationPolicyResolver::calculate_expiration_date(Some(&own), &t, earned),
            Some(earned + Duration::days(97))
        );
        let mut inherits = program(ExpirationPolicy::simple(90), 0);
        inherits.expiration_policy.days_to_expire = None;
        assert_eq!(
            ExpirationPolicyResolver::calculate_expiration_date(Some(&inherits), &t, earned),
            Some(earned + Duration::days(365))
        );
    }

    #[test]
    fn min_redeem_threshold() {
        let t = tenant(0);
        assert_eq!(ExpirationPolicyResolver::effective_min_points_to_redeem(None, &t), Points::from(100));
        let p = program(ExpirationPolicy::default(), 250);
        assert_eq!(ExpirationPolicyResolver::effective_min_points_to_redeem(Some(&p), &t), Points::from(250));
        let zero = program(ExpirationPolicy::default(), 0);
        assert_eq!(ExpirationPolicyResolver::effective_min_points_to_redeem(Some(&zero), &t), Points::from(100));
    }

    async fn expired_row(
        seeder: &Seeder,
        scene: &BasicScene,
        program_id: i64,
        points: i64,
        key: &str,
        days_ago: i64,
    ) -> i64 {
        let earned = Utc::now() - Duration::days(days_ago);
        let tx = NewPointsTransaction::earning(
            scene.tenant.id,
            scene.membership.user_id,
            scene.membership.id,
            Points::from(points),
            key.to_string(),
        )
        .unwrap()
        .with_program(program_id)
        .with_created_at(earned)
        .with_expires_at(Some(earned + Duration::days(30)));
        seeder.ledger_row(tx).await
    }

    #[tokio::test]
    async fn simple_policy_writes_one_row_per_month() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        expired_row(&seeder, &scene, scene.program.id, 40, "old-1", 90).await;
        expired_row(&seeder, &scene, scene.program.id, 60, "old-2", 60).await;
        expired_row(&seeder, &scene, scene.program.id, 25, "fresh", 1).await;

        let api = ExpirationApi::new(db.clone(), EventProducers::default());
        let now = Utc::now();
        let result = api.process_membership(&scene.tenant, &scene.membership, now).await.unwrap();
        assert_eq!(result.transactions_created.len(), 1);
        assert_eq!(result.points_expired, Points::from(100));
        let row = db.fetch_transaction(result.transactions_created[0]).await.unwrap().unwrap();
        assert_eq!(row.points_delta, Points::from(-100));
        assert_eq!(row.reason_code.as_deref(), Some(SIMPLE_EXPIRATION_REASON));
        let expected_key = format!("EXPIRATION-{}-{}-{}", scene.membership.id, scene.program.id, month_key(now));
        assert_eq!(row.idempotency_key, expected_key);

        let again = api.process_membership(&scene.tenant, &scene.membership, now).await.unwrap();
        assert!(again.transactions_created.is_empty());
        let m = db.fetch_membership(scene.membership.id).await.unwrap().unwrap();
        assert_eq!(m.points, Points::from(25));
    }

    #[tokio::test]
    async fn bucketed_policy_expires_row_by_row_without_going_negative() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        let program = seeder
            .program(
                NewLoyaltyProgram::new(scene.tenant.id, "Fifo", ProgramType::Promo, &["BONUS_FIFO"], 1)
                    .with_expiration_policy(ExpirationPolicy::bucketed(30)),
            )
            .await;
        let first = expired_row(&seeder, &scene, program.id, 40, "old-1", 90).await;
        expired_row(&seeder, &scene, program.id, 60, "old-2", 60).await;
        let spent = NewPointsTransaction::adjustment(
            scene.tenant.id,
            scene.membership.user_id,
            scene.membership.id,
            Points::from(-70),
            "spent".into(),
        )
        .unwrap();
        seeder.ledger_row(spent).await;

        let api = ExpirationApi::new(db.clone(), EventProducers::default());
        let result = api.process_membership(&scene.tenant, &scene.membership, Utc::now()).await.unwrap();
        assert_eq!(result.transactions_created.len(), 1, "only 30 points were left to expire");
        assert_eq!(result.points_expired, Points::from(30));
        let row = db.fetch_transaction(result.transactions_created[0]).await.unwrap().unwrap();
        assert_eq!(row.idempotency_key, format!("EXPIRATION-{}-{first}", scene.membership.id));
        assert_eq!(row.correlation_id, Some(first.to_string()));
        assert_eq!(db.calculate_balance(scene.membership.id).await.unwrap(), Points::zero());
    }

    #[tokio::test]
    async fn tenant_runs_skip_inactive_tenants() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        seeder.tenant(NewTenant::new("Closed").with_status(crate::db_types::TenantStatus::Suspended)).await;
        expired_row(&seeder, &scene, scene.program.id, 10, "old", 45).await;
        let api = ExpirationApi::new(db.clone(), EventProducers::default());
        let reports = api.process_all_tenants(Utc::now()).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].memberships_processed, 1);
        assert_eq!(reports[0].points_expired, Points::from(10));
    }
}
