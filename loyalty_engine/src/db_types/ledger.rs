use chrono::{DateTime, Utc};
use loyalty_common::Points;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::text_enum;

/// `createdBy` value for rows written by the engine itself.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

text_enum! {
    TransactionType {
        Earning => "EARNING",
        Redeem => "REDEEM",
        Expiration => "EXPIRATION",
        Adjust => "ADJUST",
        Reversal => "REVERSAL",
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionValidationError {
    #[error("{0} transactions must have a positive points delta, got {1}")]
    MustBePositive(TransactionType, i64),
    #[error("{0} transactions must have a negative points delta, got {1}")]
    MustBeNegative(TransactionType, i64),
    #[error("{0} transactions must have a non-zero points delta")]
    MustBeNonZero(TransactionType),
    #[error("The idempotency key cannot be empty")]
    EmptyIdempotencyKey,
}

//--------------------------------------   PointsTransaction   ---------------------------------------------------------
/// A row of the append-only points ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsTransaction {
    pub id: i64,
    pub tenant_id: i64,
    pub customer_id: i64,
    pub membership_id: i64,
    pub program_id: Option<i64>,
    pub reward_rule_id: Option<i64>,
    pub tx_type: TransactionType,
    pub points_delta: Points,
    pub idempotency_key: String,
    pub source_event_id: Option<String>,
    pub correlation_id: Option<String>,
    pub created_by: String,
    pub reason_code: Option<String>,
    pub metadata: Option<Value>,
    pub reversal_of: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reward_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PointsTransaction {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.get(key)).and_then(Value::as_str)
    }
}

/// A ledger row that has not been written yet. The constructors enforce the sign convention of each type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPointsTransaction {
    pub tenant_id: i64,
    pub customer_id: i64,
    pub membership_id: i64,
    pub program_id: Option<i64>,
    pub reward_rule_id: Option<i64>,
    pub tx_type: TransactionType,
    pub points_delta: Points,
    pub idempotency_key: String,
    pub source_event_id: Option<String>,
    pub correlation_id: Option<String>,
    pub created_by: String,
    pub reason_code: Option<String>,
    pub metadata: Option<Value>,
    pub reversal_of: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reward_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewPointsTransaction {
    fn base(
        tx_type: TransactionType,
        tenant_id: i64,
        customer_id: i64,
        membership_id: i64,
        points_delta: Points,
        idempotency_key: String,
    ) -> Result<Self, TransactionValidationError> {
        if idempotency_key.trim().is_empty() {
            return Err(TransactionValidationError::EmptyIdempotencyKey);
        }
        Ok(Self {
            tenant_id,
            customer_id,
            membership_id,
            program_id: None,
            reward_rule_id: None,
            tx_type,
            points_delta,
            idempotency_key,
            source_event_id: None,
            correlation_id: None,
            created_by: SYSTEM_ACTOR.to_string(),
            reason_code: None,
            metadata: None,
            reversal_of: None,
            expires_at: None,
            reward_id: None,
            branch_id: None,
            amount: None,
            currency: None,
            created_at: Utc::now(),
        })
    }

    pub fn earning(
        tenant_id: i64,
        customer_id: i64,
        membership_id: i64,
        points: Points,
        idempotency_key: String,
    ) -> Result<Self, TransactionValidationError> {
        if !points.is_positive() {
            return Err(TransactionValidationError::MustBePositive(TransactionType::Earning, points.value()));
        }
        Self::base(TransactionType::Earning, tenant_id, customer_id, membership_id, points, idempotency_key)
    }

    /// `points_used` is the (positive) cost of the reward. The ledger row carries its negation.
    pub fn redeem(
        tenant_id: i64,
        customer_id: i64,
        membership_id: i64,
        reward_id: i64,
        points_used: Points,
        idempotency_key: String,
    ) -> Result<Self, TransactionValidationError> {
        if !points_used.is_positive() {
            return Err(TransactionValidationError::MustBeNegative(TransactionType::Redeem, -points_used.value()));
        }
        let mut tx =
            Self::base(TransactionType::Redeem, tenant_id, customer_id, membership_id, -points_used, idempotency_key)?;
        tx.reward_id = Some(reward_id);
        Ok(tx)
    }

    /// `points_expired` is the (positive) amount being removed. The ledger row carries its negation.
    pub fn expiration(
        tenant_id: i64,
        customer_id: i64,
        membership_id: i64,
        points_expired: Points,
        idempotency_key: String,
    ) -> Result<Self, TransactionValidationError> {
        if !points_expired.is_positive() {
            return Err(TransactionValidationError::MustBeNegative(
                TransactionType::Expiration,
                -points_expired.value(),
            ));
        }
        Self::base(TransactionType::Expiration, tenant_id, customer_id, membership_id, -points_expired, idempotency_key)
    }

    pub fn adjustment(
        tenant_id: i64,
        customer_id: i64,
        membership_id: i64,
        delta: Points,
        idempotency_key: String,
    ) -> Result<Self, TransactionValidationError> {
        if delta.is_zero() {
            return Err(TransactionValidationError::MustBeNonZero(TransactionType::Adjust));
        }
        Self::base(TransactionType::Adjust, tenant_id, customer_id, membership_id, delta, idempotency_key)
    }

    /// Builds the row that cancels `original`. It carries the opposite delta and links back to the original row.
    pub fn reversal(original: &PointsTransaction, idempotency_key: String) -> Result<Self, TransactionValidationError> {
        if original.points_delta.is_zero() {
            return Err(TransactionValidationError::MustBeNonZero(TransactionType::Reversal));
        }
        let mut tx = Self::base(
            TransactionType::Reversal,
            original.tenant_id,
            original.customer_id,
            original.membership_id,
            -original.points_delta,
            idempotency_key,
        )?;
        tx.program_id = original.program_id;
        tx.reward_rule_id = original.reward_rule_id;
        tx.source_event_id = original.source_event_id.clone();
        tx.correlation_id = original.correlation_id.clone();
        tx.reversal_of = Some(original.id);
        Ok(tx)
    }

    pub fn with_program(mut self, program_id: i64) -> Self {
        self.program_id = Some(program_id);
        self
    }

    pub fn with_rule(mut self, rule_id: i64) -> Self {
        self.reward_rule_id = Some(rule_id);
        self
    }

    pub fn with_source_event<S: Into<String>>(mut self, source_event_id: S) -> Self {
        self.source_event_id = Some(source_event_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_created_by<S: Into<String>>(mut self, created_by: S) -> Self {
        self.created_by = created_by.into();
        self
    }

    pub fn with_reason_code<S: Into<String>>(mut self, reason_code: S) -> Self {
        self.reason_code = Some(reason_code.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_branch(mut self, branch_id: Option<i64>) -> Self {
        self.branch_id = branch_id;
        self
    }

    pub fn with_amount(mut self, amount: f64, currency: &str) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.to_string());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sign_conventions() {
        let key = || "k".to_string();
        assert!(NewPointsTransaction::earning(1, 1, 1, Points::from(0), key()).is_err());
        let earning = NewPointsTransaction::earning(1, 1, 1, Points::from(10), key()).unwrap();
        assert_eq!(earning.points_delta, Points::from(10));
        let redeem = NewPointsTransaction::redeem(1, 1, 1, 7, Points::from(50), key()).unwrap();
        assert_eq!(redeem.points_delta, Points::from(-50));
        assert_eq!(redeem.reward_id, Some(7));
        let expired = NewPointsTransaction::expiration(1, 1, 1, Points::from(5), key()).unwrap();
        assert_eq!(expired.points_delta, Points::from(-5));
        assert!(NewPointsTransaction::adjustment(1, 1, 1, Points::zero(), key()).is_err());
        assert_eq!(
            NewPointsTransaction::earning(1, 1, 1, Points::from(1), "  ".into()),
            Err(TransactionValidationError::EmptyIdempotencyKey)
        );
    }
}
