use loyalty_common::Points;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db_types::{EarningDomain, StackPolicy};

/// One rule's claim to points for an event, before conflicts between rules are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub rule_id: i64,
    pub program_id: i64,
    pub conflict_group: String,
    pub stack_policy: StackPolicy,
    pub priority_rank: i32,
    pub points: Points,
    pub earning_domain: EarningDomain,
    /// Empty until the pipeline attaches a key.
    pub idempotency_key: String,
    pub reason_code: String,
    pub metadata: Value,
}

/// Why part of an event produced no ledger row. These are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipReason {
    pub reason: String,
    pub rule_id: Option<i64>,
    pub program_id: Option<i64>,
}

impl SkipReason {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self { reason: reason.into(), rule_id: None, program_id: None }
    }

    pub fn for_program<S: Into<String>>(reason: S, program_id: i64) -> Self {
        Self { reason: reason.into(), rule_id: None, program_id: Some(program_id) }
    }

    pub fn for_rule<S: Into<String>>(reason: S, rule_id: i64, program_id: i64) -> Self {
        Self { reason: reason.into(), rule_id: Some(rule_id), program_id: Some(program_id) }
    }
}

/// The outcome of processing one loyalty event.
///
/// `transactions_created` lists the ledger rows that hold the event's grants, including rows written by an earlier
/// delivery of the same event, so a replay reports the same ids and total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEventResult {
    pub event_id: String,
    pub membership_id: i64,
    pub programs_processed: Vec<i64>,
    pub transactions_created: Vec<i64>,
    pub total_points_awarded: Points,
    pub evaluations: Vec<RuleEvaluation>,
    pub skipped: Vec<SkipReason>,
}

impl ProcessEventResult {
    pub fn empty(event_id: &str, membership_id: i64) -> Self {
        Self {
            event_id: event_id.to_string(),
            membership_id,
            programs_processed: Vec::new(),
            transactions_created: Vec::new(),
            total_points_awarded: Points::zero(),
            evaluations: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn skipped_with(mut self, reason: SkipReason) -> Self {
        self.skipped.push(reason);
        self
    }
}
