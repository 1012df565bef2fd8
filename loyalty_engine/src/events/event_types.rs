use chrono::{DateTime, Utc};
use loyalty_common::Points;
use serde::{Deserialize, Serialize};

use crate::db_types::EventType;

/// Published once per processed event that wrote at least one new EARNING row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAwardedEvent {
    pub tenant_id: i64,
    pub membership_id: i64,
    pub event_type: EventType,
    pub source_event_id: String,
    pub total_points: Points,
    pub transaction_ids: Vec<i64>,
    pub program_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RuleDecision {
    Eligible { points: Points },
    Ineligible { reason: String },
}

/// A trace record of one rule-eligibility decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvaluationEvent {
    pub membership_id: i64,
    pub program_id: i64,
    pub rule_id: i64,
    pub source_event_id: String,
    pub decision: RuleDecision,
    pub evaluated_at: DateTime<Utc>,
}

impl RuleEvaluationEvent {
    pub fn is_eligible(&self) -> bool {
        matches!(self.decision, RuleDecision::Eligible { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsExpiredEvent {
    pub tenant_id: i64,
    pub membership_id: i64,
    pub program_id: Option<i64>,
    pub transaction_id: i64,
    pub points_expired: Points,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRedeemedEvent {
    pub tenant_id: i64,
    pub membership_id: i64,
    pub reward_id: i64,
    pub transaction_id: i64,
    pub points_used: Points,
    pub redemption_code: String,
}
