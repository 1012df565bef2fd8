//! The balance projection.
//!
//! A membership's balance is the sum of its ledger rows, nothing more. The cached `points` value on the membership is
//! a projection of that sum, and [`BalanceApi`] is the only code that writes it.
use std::fmt::Debug;

use log::*;
use loyalty_common::Points;
use serde::{Deserialize, Serialize};

use crate::{
    config::DEFAULT_BALANCE_BATCH_SIZE,
    loyalty_api::errors::BalanceError,
    traits::{LedgerManagement, MembershipManagement},
};

/// Cached and computed balances closer than this are considered consistent.
pub const BALANCE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub index: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The outcome of a batch re-projection. Failures are counted; they never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSyncReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: Vec<ChunkReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceIntegrity {
    pub membership_id: i64,
    pub cached: Points,
    pub computed: Points,
    pub consistent: bool,
}

pub struct BalanceApi<B> {
    db: B,
    batch_size: usize,
}

impl<B: Debug> Debug for BalanceApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BalanceApi ({:?})", self.db)
    }
}

impl<B> BalanceApi<B> {
    pub fn new(db: B) -> Self {
        Self { db, batch_size: DEFAULT_BALANCE_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> BalanceApi<B>
where B: LedgerManagement + MembershipManagement
{
    /// `SUM(points_delta)` over all of the membership's ledger rows.
    pub async fn calculate_membership_balance(&self, membership_id: i64) -> Result<Points, BalanceError> {
        Ok(self.db.calculate_balance(membership_id).await?)
    }

    /// `SUM(points_delta)` over the membership's ledger rows belonging to one program.
    pub async fn calculate_program_balance(&self, membership_id: i64, program_id: i64) -> Result<Points, BalanceError> {
        Ok(self.db.calculate_program_balance(membership_id, program_id).await?)
    }

    /// Recomputes the membership's balance from the ledger and stores it as the cached points value.
    ///
    /// Returns the new balance.
    pub async fn recalculate_balance(&self, membership_id: i64) -> Result<Points, BalanceError> {
        let membership =
            self.db.fetch_membership(membership_id).await?.ok_or(BalanceError::MembershipNotFound(membership_id))?;
        let balance = self.db.calculate_balance(membership_id).await?;
        if balance != membership.points {
            debug!("🧮️ Membership #{membership_id} balance: {} -> {balance}", membership.points);
        }
        self.db.update_cached_points(membership_id, balance).await?;
        Ok(balance)
    }

    /// The entry point for callers that have just written ledger rows for the membership.
    pub async fn sync_after_transaction(&self, membership_id: i64) -> Result<Points, BalanceError> {
        self.recalculate_balance(membership_id).await
    }

    /// Re-projects the given memberships in chunks of the configured batch size.
    pub async fn recalculate_batch(&self, membership_ids: &[i64]) -> BatchSyncReport {
        let mut report = BatchSyncReport::default();
        for (index, chunk) in membership_ids.chunks(self.batch_size).enumerate() {
            let mut chunk_report = ChunkReport { index, ..Default::default() };
            for id in chunk {
                match self.recalculate_balance(*id).await {
                    Ok(_) => chunk_report.succeeded += 1,
                    Err(e) => {
                        warn!("🧮️ Could not re-project the balance of membership #{id}. {e}");
                        chunk_report.failed += 1;
                    },
                }
            }
            report.processed += chunk.len();
            report.succeeded += chunk_report.succeeded;
            report.failed += chunk_report.failed;
            report.chunks.push(chunk_report);
        }
        report
    }

    /// Re-projects every membership of the tenant.
    pub async fn recalculate_tenant(&self, tenant_id: i64) -> Result<BatchSyncReport, BalanceError> {
        let ids = self.db.fetch_memberships_for_tenant(tenant_id).await?.iter().map(|m| m.id).collect::<Vec<_>>();
        let report = self.recalculate_batch(&ids).await;
        info!(
            "🧮️ Re-projected {} balances for tenant #{tenant_id}: {} ok, {} failed",
            report.processed, report.succeeded, report.failed
        );
        Ok(report)
    }

    /// Compares the cached balance with the ledger without changing anything.
    pub async fn validate_balance_integrity(&self, membership_id: i64) -> Result<BalanceIntegrity, BalanceError> {
        let membership =
            self.db.fetch_membership(membership_id).await?.ok_or(BalanceError::MembershipNotFound(membership_id))?;
        let computed = self.db.calculate_balance(membership_id).await?;
        let consistent = (membership.points.as_f64() - computed.as_f64()).abs() < BALANCE_TOLERANCE;
        if !consistent {
            warn!("🧮️ Membership #{membership_id} caches {} but the ledger says {computed}", membership.points);
        }
        Ok(BalanceIntegrity { membership_id, cached: membership.points, computed, consistent })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        db_types::{NewLoyaltyProgram, NewMembership, NewPointsTransaction, ProgramType, BASE_VISIT},
        test_utils::{
            prepare_env::fresh_database,
            seed::{BasicScene, Seeder},
        },
    };

    async fn earn(seeder: &Seeder, scene: &BasicScene, program_id: i64, points: i64, key: &str) {
        let tx = NewPointsTransaction::earning(
            scene.tenant.id,
            scene.membership.user_id,
            scene.membership.id,
            Points::from(points),
            key.to_string(),
        )
        .unwrap()
        .with_program(program_id);
        seeder.ledger_row(tx).await;
    }

    #[tokio::test]
    async fn projection_follows_the_ledger() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        let other = seeder
            .program(NewLoyaltyProgram::new(scene.tenant.id, "Partner", ProgramType::Partner, &[BASE_VISIT], 1))
            .await;
        earn(&seeder, &scene, scene.program.id, 120, "a").await;
        earn(&seeder, &scene, other.id, 30, "b").await;
        let redeem = NewPointsTransaction::adjustment(
            scene.tenant.id,
            scene.membership.user_id,
            scene.membership.id,
            Points::from(-20),
            "c".into(),
        )
        .unwrap();
        seeder.ledger_row(redeem).await;

        let api = BalanceApi::new(db.clone());
        let integrity = api.validate_balance_integrity(scene.membership.id).await.unwrap();
        assert!(!integrity.consistent);
        assert_eq!(integrity.cached, Points::zero());
        assert_eq!(integrity.computed, Points::from(130));

        assert_eq!(api.sync_after_transaction(scene.membership.id).await.unwrap(), Points::from(130));
        assert_eq!(
            api.calculate_program_balance(scene.membership.id, scene.program.id).await.unwrap(),
            Points::from(120)
        );
        assert!(api.validate_balance_integrity(scene.membership.id).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn batches_count_failures_without_aborting() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        let second = seeder.membership(NewMembership::new(200, scene.tenant.id)).await;
        earn(&seeder, &scene, scene.program.id, 50, "a").await;

        let api = BalanceApi::new(db.clone()).with_batch_size(2);
        let report = api.recalculate_batch(&[scene.membership.id, 9_999, second.id]).await;
        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.chunks.len(), 2);
        assert_eq!(report.chunks[0], ChunkReport { index: 0, succeeded: 1, failed: 1 });

        let tenant_report = api.recalculate_tenant(scene.tenant.id).await.unwrap();
        assert_eq!(tenant_report.succeeded, 2);
        assert_eq!(api.calculate_membership_balance(scene.membership.id).await.unwrap(), Points::from(50));
    }
}
