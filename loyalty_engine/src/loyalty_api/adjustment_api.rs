//! Manual corrections to the ledger.
//!
//! The ledger is append-only, so corrections are new rows: an ADJUST row moves the balance by an arbitrary amount, and
//! a REVERSAL row cancels one earlier EARNING or REDEEM row exactly. Both must be attributable to a person.
use std::fmt::Debug;

use chrono::Utc;
use log::*;
use loyalty_common::Points;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    db_types::{NewPointsTransaction, RedemptionCodeStatus, TransactionType, SYSTEM_ACTOR},
    loyalty_api::{balance_api::BalanceApi, errors::AdjustmentError},
    traits::{LedgerManagement, MembershipManagement, RewardManagement, TierChangeService},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionResult {
    pub transaction_id: i64,
    pub points_delta: Points,
    pub new_balance: Points,
}

pub struct AdjustmentApi<B, T> {
    db: B,
    tier_service: T,
    balance: BalanceApi<B>,
}

impl<B: Debug, T> Debug for AdjustmentApi<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AdjustmentApi ({:?})", self.db)
    }
}

impl<B, T> AdjustmentApi<B, T>
where B: Clone
{
    pub fn new(db: B, tier_service: T) -> Self {
        let balance = BalanceApi::new(db.clone());
        Self { db, tier_service, balance }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B, T> AdjustmentApi<B, T>
where
    B: LedgerManagement + MembershipManagement + RewardManagement,
    T: TierChangeService,
{
    /// Writes an ADJUST row of `delta` points against the membership.
    ///
    /// A negative adjustment may not take the balance below zero. A positive one triggers tier re-evaluation.
    pub async fn create_adjustment(
        &self,
        membership_id: i64,
        delta: Points,
        reason_code: &str,
        created_by: &str,
        metadata: Option<Value>,
    ) -> Result<CorrectionResult, AdjustmentError> {
        check_actor(created_by, reason_code)?;
        if delta.is_zero() {
            return Err(AdjustmentError::ZeroDelta);
        }
        let membership =
            self.db.fetch_membership(membership_id).await?.ok_or(AdjustmentError::MembershipNotFound(membership_id))?;
        if delta.is_negative() {
            let balance = self.db.calculate_balance(membership_id).await?;
            let after = balance + delta;
            if after.is_negative() {
                return Err(AdjustmentError::NegativeBalance(after.value()));
            }
        }
        let now = Utc::now();
        let key = format!("ADJUST-{membership_id}-{}", now.timestamp_millis());
        let mut tx =
            NewPointsTransaction::adjustment(membership.tenant_id, membership.user_id, membership_id, delta, key)?
                .with_reason_code(reason_code.trim())
                .with_created_by(created_by.trim())
                .with_created_at(now);
        if let Some(metadata) = metadata {
            tx = tx.with_metadata(metadata);
        }
        let transaction_id = self.db.insert_transaction(tx).await?.id();
        let new_balance = self.balance.sync_after_transaction(membership_id).await?;
        info!("🧮️ {created_by} adjusted membership #{membership_id} by {delta} ({reason_code}). Balance {new_balance}");
        if delta.is_positive() {
            let tenant_id = membership.tenant_id;
            let tier_change = self.tier_service.evaluate_and_apply_tier_change(membership_id, tenant_id).await;
            if let Err(e) = tier_change {
                warn!("🧮️ Tier re-evaluation after adjustment of membership #{membership_id} failed. {e}");
            }
        }
        Ok(CorrectionResult { transaction_id, points_delta: delta, new_balance })
    }

    /// Cancels an EARNING or REDEEM row with a REVERSAL row of the opposite amount. A row can only be reversed once.
    ///
    /// Reversing a redemption also cancels its unused redemption code.
    pub async fn create_reversal(
        &self,
        transaction_id: i64,
        reason_code: &str,
        created_by: &str,
    ) -> Result<CorrectionResult, AdjustmentError> {
        check_actor(created_by, reason_code)?;
        let original =
            self.db
                .fetch_transaction(transaction_id)
                .await?
                .ok_or(AdjustmentError::TransactionNotFound(transaction_id))?;
        if !matches!(original.tx_type, TransactionType::Earning | TransactionType::Redeem) {
            return Err(AdjustmentError::NotReversible(original.tx_type.to_string()));
        }
        if !self.db.fetch_reversals_of(transaction_id).await?.is_empty() {
            return Err(AdjustmentError::AlreadyReversed(transaction_id));
        }
        let tx = NewPointsTransaction::reversal(&original, format!("REVERSAL-{transaction_id}"))?
            .with_reason_code(reason_code.trim())
            .with_created_by(created_by.trim())
            .with_created_at(Utc::now());
        let inserted = self.db.insert_transaction(tx).await?;
        if !inserted.is_new() {
            return Err(AdjustmentError::AlreadyReversed(transaction_id));
        }
        if original.tx_type == TransactionType::Redeem {
            if let Some(mut code) = self.db.fetch_redemption_code_for_transaction(transaction_id).await? {
                if code.status == RedemptionCodeStatus::Pending {
                    code.status = RedemptionCodeStatus::Cancelled;
                    self.db.update_redemption_code(&code).await?;
                    debug!("🎁️ Redemption code {} cancelled by reversal", code.code);
                }
            }
        }
        let new_balance = self.balance.sync_after_transaction(original.membership_id).await?;
        info!("🧮️ {created_by} reversed ledger row #{transaction_id} ({reason_code}). Balance {new_balance}");
        Ok(CorrectionResult { transaction_id: inserted.id(), points_delta: -original.points_delta, new_balance })
    }
}

fn check_actor(created_by: &str, reason_code: &str) -> Result<(), AdjustmentError> {
    let actor = created_by.trim();
    if actor.is_empty() || actor.eq_ignore_ascii_case(SYSTEM_ACTOR) {
        return Err(AdjustmentError::SystemActorNotAllowed(actor.to_string()));
    }
    if reason_code.trim().is_empty() {
        return Err(AdjustmentError::MissingReasonCode);
    }
    Ok(())
}
