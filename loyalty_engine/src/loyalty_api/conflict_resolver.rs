use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use log::*;
use loyalty_common::Points;

use crate::{
    db_types::{PeriodType, RewardRule, StackPolicy},
    helpers::start_of_month,
    loyalty_api::{errors::ProcessEventError, event_objects::RuleEvaluation},
    traits::{LedgerManagement, ProgramManagement},
};

pub const DEFAULT_CAP_PERIOD_DAYS: i64 = 30;

/// Settles competing rule evaluations for one event.
///
/// Evaluations are grouped by conflict group. The stack policy of the first evaluation in a group decides how the
/// group is settled:
/// * `EXCLUSIVE`: only the highest `priority_rank` survives. Points break rank ties.
/// * `BEST_OF`: only the evaluation granting the most points survives.
/// * `PRIORITY`: only the highest `priority_rank` survives.
/// * `STACK`: every evaluation survives, each limited by its rule's per-event and per-period caps.
///
/// In every case the first evaluation wins a full tie.
pub struct ConflictResolver<B> {
    db: B,
}

impl<B> std::fmt::Debug for ConflictResolver<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConflictResolver")
    }
}

impl<B> ConflictResolver<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> ConflictResolver<B>
where B: LedgerManagement + ProgramManagement
{
    /// Returns the surviving evaluations, in group order. Only evaluations with positive points are returned.
    ///
    /// Every evaluation must already carry its idempotency key; cap usage never counts the row an evaluation would
    /// itself produce. `now` is the time of the event.
    pub async fn resolve(
        &self,
        evaluations: Vec<RuleEvaluation>,
        membership_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RuleEvaluation>, ProcessEventError> {
        let mut resolved = Vec::with_capacity(evaluations.len());
        for group in group_by_conflict(evaluations) {
            let policy = group[0].stack_policy;
            let name = group[0].conflict_group.clone();
            match policy {
                StackPolicy::Stack => {
                    let stacked = self.apply_caps(group, membership_id, now).await?;
                    resolved.extend(stacked);
                },
                _ => {
                    let count = group.len();
                    if let Some(winner) = pick_winner(group, policy) {
                        trace!(
                            "⚖️ Rule #{} wins conflict group '{name}' ({policy}) over {} other(s)",
                            winner.rule_id,
                            count - 1
                        );
                        resolved.push(winner);
                    }
                },
            }
        }
        resolved.retain(|e| e.points.is_positive());
        Ok(resolved)
    }

    async fn apply_caps(
        &self,
        group: Vec<RuleEvaluation>,
        membership_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RuleEvaluation>, ProcessEventError> {
        let rule_ids = group.iter().map(|e| e.rule_id).collect::<Vec<_>>();
        let rules =
            self.db.fetch_rules(&rule_ids).await?.into_iter().map(|r| (r.id, r)).collect::<HashMap<i64, RewardRule>>();
        let mut result = Vec::with_capacity(group.len());
        for mut evaluation in group {
            let Some(rule) = rules.get(&evaluation.rule_id) else {
                warn!("⚖️ Rule #{} disappeared during evaluation. Dropping its grant.", evaluation.rule_id);
                continue;
            };
            if let Some(cap) = rule.limits.per_event_cap {
                evaluation.points = evaluation.points.min(Points::from(cap));
            }
            if let Some(cap) = rule.limits.per_period_cap {
                let start = cap_window_start(rule, now);
                let used = self
                    .db
                    .fetch_earnings_in_period(membership_id, rule.program_id, rule.id, start, now)
                    .await?
                    .iter()
                    .filter(|tx| tx.idempotency_key != evaluation.idempotency_key)
                    .map(|tx| tx.points_delta)
                    .sum::<Points>();
                let remaining = Points::from(cap) - used;
                if !remaining.is_positive() {
                    debug!("⚖️ Rule #{} has used its period cap of {cap} points. Dropping its grant.", rule.id);
                    continue;
                }
                evaluation.points = evaluation.points.min(remaining);
            }
            result.push(evaluation);
        }
        Ok(result)
    }
}

/// Calendar caps run from the start of the month. Rolling caps look back `period_days`.
fn cap_window_start(rule: &RewardRule, now: DateTime<Utc>) -> DateTime<Utc> {
    match rule.limits.period_type {
        Some(PeriodType::Calendar) => start_of_month(now),
        _ => now - Duration::days(rule.limits.period_days.filter(|d| *d > 0).unwrap_or(DEFAULT_CAP_PERIOD_DAYS)),
    }
}

/// Groups evaluations by conflict group, keeping the order in which groups and members first appear.
fn group_by_conflict(evaluations: Vec<RuleEvaluation>) -> Vec<Vec<RuleEvaluation>> {
    let mut index = HashMap::<String, usize>::new();
    let mut groups: Vec<Vec<RuleEvaluation>> = Vec::new();
    for evaluation in evaluations {
        match index.get(&evaluation.conflict_group) {
            Some(i) => groups[*i].push(evaluation),
            None => {
                index.insert(evaluation.conflict_group.clone(), groups.len());
                groups.push(vec![evaluation]);
            },
        }
    }
    groups
}

/// Picks the single survivor of a non-stacking group. A challenger has to be strictly better to displace the current
/// winner.
fn pick_winner(group: Vec<RuleEvaluation>, policy: StackPolicy) -> Option<RuleEvaluation> {
    group.into_iter().reduce(|best, challenger| {
        let better = match policy {
            StackPolicy::Exclusive => {
                (challenger.priority_rank, challenger.points) > (best.priority_rank, best.points)
            },
            StackPolicy::BestOf => challenger.points > best.points,
            StackPolicy::Priority => challenger.priority_rank > best.priority_rank,
            StackPolicy::Stack => false,
        };
        if better {
            challenger
        } else {
            best
        }
    })
}
