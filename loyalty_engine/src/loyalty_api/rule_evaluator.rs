//! Finds the rules of a program that fire for an event and computes what each one grants.
//!
//! Evaluation of one rule runs in three stages:
//! 1. Eligibility ([`check_eligibility`]): pure checks against the membership, its tier, and the event.
//! 2. Limits: frequency windows, cooldowns and the domain-specific "once per" limits of subscriptions and retention
//!    streaks. These read earlier EARNING rows of the same rule from the ledger. Ledger rows carry the time of the
//!    event that created them, so every window is measured in event time.
//! 3. Points ([`calculate_points`]): the formula, domain adjustments, then the tier benefit and tier multipliers.
//!
//! Every decision is logged at `trace` level and, when rule tracing is enabled, published to the
//! `on_rule_evaluated` hook.
use std::iter;

use chrono::{DateTime, Datelike, Duration, Utc};
use log::*;
use serde_json::{json, Map, Value};

use crate::{
    db_types::{
        string_list,
        AmountField,
        CustomerMembership,
        CustomerTier,
        EventPayload,
        Frequency,
        LoyaltyEvent,
        PeriodType,
        PointsFormula,
        PointsTransaction,
        PurchaseItem,
        PurchasePayload,
        RewardRule,
        RuleScope,
        SimpleFormula,
        SubscriptionType,
        TierBenefit,
        BASE_RETENTION,
        BASE_SUBSCRIPTION,
        BONUS_CATEGORY,
        BONUS_SKU,
    },
    events::{EventProducers, RuleDecision, RuleEvaluationEvent},
    helpers::{minutes_of_day, parse_time_of_day, start_of_next_year, start_of_year},
    loyalty_api::{errors::ProcessEventError, event_objects::RuleEvaluation, idempotency::generate_idempotency_key},
    traits::{LedgerError, LedgerManagement, TenantManagement},
};

/// Everything about the earner that rule evaluation needs, loaded once per event.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub event: &'a LoyaltyEvent,
    pub membership: &'a CustomerMembership,
    pub tier: Option<&'a CustomerTier>,
    /// All of the tenant's tiers. Tier bounds in eligibility criteria refer to these by id.
    pub tenant_tiers: &'a [CustomerTier],
}

pub struct RuleEvaluator<B> {
    db: B,
    producers: EventProducers,
    emit_trace: bool,
}

impl<B> std::fmt::Debug for RuleEvaluator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RuleEvaluator (trace: {})", self.emit_trace)
    }
}

impl<B> RuleEvaluator<B> {
    pub fn new(db: B, producers: EventProducers, emit_trace: bool) -> Self {
        Self { db, producers, emit_trace }
    }
}

impl<B> RuleEvaluator<B>
where B: LedgerManagement + TenantManagement
{
    /// Evaluates the program's rules for the event in `ctx`.
    ///
    /// `rules` may hold the rules of several programs; only those of `program_id` whose trigger matches the event
    /// type are considered. The returned evaluations carry no idempotency key yet, and all have positive points.
    pub async fn evaluate_program(
        &self,
        program_id: i64,
        rules: &[RewardRule],
        ctx: &EvaluationContext<'_>,
    ) -> Result<Vec<RuleEvaluation>, ProcessEventError> {
        let event = ctx.event;
        let candidates = rules
            .iter()
            .filter(|r| {
                r.program_id == program_id && r.trigger == event.event_type() && r.is_active(event.occurred_at)
            });
        let mut passing = Vec::new();
        for rule in candidates {
            if let Err(reason) = check_eligibility(rule, ctx) {
                self.record_decision(rule, ctx, RuleDecision::Ineligible { reason }).await;
                continue;
            }
            if let Some(reason) = self.limit_violation(rule, event, ctx.membership.id).await? {
                self.record_decision(rule, ctx, RuleDecision::Ineligible { reason }).await;
                continue;
            }
            passing.push(rule);
        }
        if passing.is_empty() {
            return Ok(Vec::new());
        }

        let benefit = match ctx.tier {
            Some(tier) => self.db.fetch_tier_benefit(program_id, tier.id).await?.filter(TierBenefit::is_active),
            None => None,
        };
        let mut results = Vec::with_capacity(passing.len());
        for rule in passing {
            let points = calculate_points(rule, event, ctx.tier, benefit.as_ref());
            if !points.is_positive() {
                let reason = "The points formula yields nothing for this event".to_string();
                self.record_decision(rule, ctx, RuleDecision::Ineligible { reason }).await;
                continue;
            }
            self.record_decision(rule, ctx, RuleDecision::Eligible { points }).await;
            results.push(RuleEvaluation {
                rule_id: rule.id,
                program_id: rule.program_id,
                conflict_group: rule.conflict.conflict_group.clone(),
                stack_policy: rule.conflict.stack_policy,
                priority_rank: rule.conflict.priority_rank,
                points,
                earning_domain: rule.earning_domain.clone(),
                idempotency_key: String::new(),
                reason_code: rule.earning_domain.to_string(),
                metadata: evaluation_metadata(rule, event, benefit.as_ref()),
            });
        }
        Ok(results)
    }

    async fn record_decision(&self, rule: &RewardRule, ctx: &EvaluationContext<'_>, decision: RuleDecision) {
        trace!(
            "📏️ Rule #{} '{}' for membership #{} on event {}: {decision:?}",
            rule.id,
            rule.name,
            ctx.membership.id,
            ctx.event.source_event_id
        );
        if self.emit_trace && self.producers.has_rule_evaluation_subscribers() {
            let event = RuleEvaluationEvent {
                membership_id: ctx.membership.id,
                program_id: rule.program_id,
                rule_id: rule.id,
                source_event_id: ctx.event.source_event_id.clone(),
                decision,
                evaluated_at: Utc::now(),
            };
            self.producers.publish_rule_evaluation(event).await;
        }
    }

    /// Returns a description of the first limit the rule has hit, if any.
    ///
    /// The row this very grant would produce (same idempotency key) is never counted, so that a redelivered event is
    /// not blocked by its own earlier grant.
    async fn limit_violation(
        &self,
        rule: &RewardRule,
        event: &LoyaltyEvent,
        membership_id: i64,
    ) -> Result<Option<String>, LedgerError> {
        let limits = &rule.limits;
        let now = event.occurred_at;
        let own_key = generate_idempotency_key(membership_id, rule, event);
        let previous = |start: DateTime<Utc>, end: DateTime<Utc>| {
            let own_key = own_key.clone();
            async move {
                let rows = self
                    .db
                    .fetch_earnings_in_period(membership_id, rule.program_id, rule.id, start, end)
                    .await?
                    .into_iter()
                    .filter(|tx| tx.idempotency_key != own_key)
                    .collect::<Vec<_>>();
                Ok::<_, LedgerError>(rows)
            }
        };

        if let Some(hours) = limits.cooldown_hours.filter(|h| *h > 0) {
            if !previous(now - Duration::hours(hours), now).await?.is_empty() {
                return Ok(Some(format!("The rule is cooling down ({hours}h)")));
            }
        }

        let subscription = match &event.payload {
            EventPayload::Subscription(s) => Some(s),
            _ => None,
        };
        if let Some(frequency) = limits.frequency.filter(|f| *f != Frequency::PerEvent) {
            let start = match frequency {
                Frequency::Daily => now - Duration::hours(24),
                Frequency::Weekly => now - Duration::days(7),
                Frequency::Monthly => now - Duration::days(30),
                Frequency::PerPeriod | Frequency::PerEvent => match limits.period_days.filter(|d| *d > 0) {
                    Some(days) => now - Duration::days(days),
                    // A period without a length: once ever
                    None => DateTime::<Utc>::MIN_UTC,
                },
            };
            if !previous(start, now).await?.is_empty() {
                return Ok(Some(format!("Already granted within the {frequency} window")));
            }
        }

        if let Some(s) = subscription {
            let year_start = start_of_year(now);
            let year_end = start_of_next_year(now) - Duration::milliseconds(1);
            match s.subscription_type {
                SubscriptionType::Renewed => {
                    let renewals = previous(year_start, year_end).await?;
                    if renewals.iter().any(|tx| is_subscription_grant(tx, SubscriptionType::Renewed)) {
                        return Ok(Some(format!("A renewal was already rewarded in {}", now.year())));
                    }
                },
                SubscriptionType::Started => {
                    let starts = previous(DateTime::<Utc>::MIN_UTC, now).await?;
                    let already = starts.iter().any(|tx| {
                        tx.metadata_str("subscriptionId") == Some(s.subscription_id.as_str()) &&
                            is_subscription_grant(tx, SubscriptionType::Started)
                    });
                    if already {
                        return Ok(Some(format!("Subscription {} was already rewarded", s.subscription_id)));
                    }
                },
                _ => {},
            }
            if let Some(cap) = limits.per_period_cap {
                if limits.period_type == Some(PeriodType::Calendar) && limits.period_days == Some(365) {
                    let granted =
                        previous(year_start, year_end).await?.iter().map(|tx| tx.points_delta.value()).sum::<i64>();
                    if granted >= cap {
                        return Ok(Some(format!("The annual cap of {cap} points is used up")));
                    }
                }
            }
        }

        if let EventPayload::Retention(r) = &event.payload {
            let in_window = previous(r.period_start, r.period_end).await?;
            let already = in_window.iter().any(|tx| {
                tx.metadata_str("eventType") == Some("RETENTION") || tx.reason_code.as_deref() == Some(BASE_RETENTION)
            });
            if already {
                return Ok(Some("A streak in this window was already rewarded".to_string()));
            }
        }
        Ok(None)
    }
}

fn is_subscription_grant(tx: &PointsTransaction, kind: SubscriptionType) -> bool {
    match tx.metadata_str("subscriptionType") {
        Some(t) => t == kind.as_str(),
        None => tx.reason_code.as_deref() == Some(BASE_SUBSCRIPTION),
    }
}

fn evaluation_metadata(rule: &RewardRule, event: &LoyaltyEvent, benefit: Option<&TierBenefit>) -> Value {
    let mut metadata = Map::new();
    metadata.insert("ruleName".into(), json!(rule.name));
    metadata.insert("formulaType".into(), json!(rule.points_formula.kind()));
    metadata.insert("tierBenefitApplied".into(), json!(benefit.map(|b| b.points_multiplier)));
    metadata.insert("eventType".into(), json!(event.event_type()));
    if let EventPayload::Subscription(s) = &event.payload {
        metadata.insert("subscriptionId".into(), json!(s.subscription_id));
        metadata.insert("subscriptionType".into(), json!(s.subscription_type));
    }
    Value::Object(metadata)
}

//--------------------------------------      Eligibility      ---------------------------------------------------------

/// Checks the rule's static eligibility criteria. The error describes the first criterion that failed.
pub fn check_eligibility(rule: &RewardRule, ctx: &EvaluationContext<'_>) -> Result<(), String> {
    let e = &rule.eligibility;
    let event = ctx.event;
    if rule.conflict.priority_rank < 0 {
        return Err(format!("Invalid configuration: negative priority rank {}", rule.conflict.priority_rank));
    }
    if let Some(statuses) = &e.membership_status {
        if !statuses.contains(&ctx.membership.status) {
            return Err(format!("Membership status {} is not eligible", ctx.membership.status));
        }
    }
    if let Some(min_tier) = e.min_tier_id {
        let min = tier_priority(ctx.tenant_tiers, min_tier).ok_or(format!("Unknown minimum tier #{min_tier}"))?;
        match ctx.tier {
            Some(tier) if tier.priority >= min => {},
            _ => return Err("The membership's tier is below the minimum".to_string()),
        }
    }
    if let Some(max_tier) = e.max_tier_id {
        let max = tier_priority(ctx.tenant_tiers, max_tier).ok_or(format!("Unknown maximum tier #{max_tier}"))?;
        if ctx.tier.is_some_and(|tier| tier.priority > max) {
            return Err("The membership's tier is above the maximum".to_string());
        }
    }
    if let Some(min_age) = e.min_membership_age_days {
        let age = ctx.membership.age_in_days(event.occurred_at);
        if age < min_age {
            return Err(format!("The membership is {age} days old, {min_age} are required"));
        }
    }

    match &event.payload {
        EventPayload::Purchase(p) => {
            check_purchase(rule, p)?;
            check_scope(&rule.scope, &event.payload)?;
        },
        EventPayload::Visit(_) => check_scope(&rule.scope, &event.payload)?,
        EventPayload::Retention(r) if r.streak_count == 0 => return Err("The streak is empty".to_string()),
        EventPayload::Custom(c) => {
            if let Some(custom_type) = e.custom_type.as_deref() {
                if c.custom_type != custom_type {
                    return Err(format!("Custom type {} does not match {custom_type}", c.custom_type));
                }
            }
            if let Some(required) = e.flags.as_ref().filter(|f| !f.is_empty()) {
                let flags = match c.attribute("flags") {
                    Some(_) => c.flags(),
                    None => string_list(event.metadata_value("flags")),
                };
                if !required.iter().any(|f| flags.contains(f)) {
                    return Err("None of the required flags are present".to_string());
                }
            }
            if let Some(expected) = &e.metadata {
                for (key, value) in expected {
                    let actual = c.attribute(key).or_else(|| event.metadata_value(key));
                    if actual != Some(value) {
                        return Err(format!("Attribute '{key}' does not match"));
                    }
                }
            }
        },
        _ => {},
    }

    if let Some(days) = e.day_of_week.as_ref().filter(|d| !d.is_empty()) {
        let today = event.occurred_at.weekday().num_days_from_sunday();
        if !days.contains(&today) {
            return Err(format!("Day {today} of the week is not eligible"));
        }
    }
    if let Some(range) = &e.time_range {
        let (start, end) = match (parse_time_of_day(&range.start), parse_time_of_day(&range.end)) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(format!("Invalid time range {}-{}", range.start, range.end)),
        };
        let minutes = minutes_of_day(event.occurred_at);
        if minutes < start || minutes > end {
            return Err(format!("The event time is outside {}-{}", range.start, range.end));
        }
    }
    Ok(())
}

fn tier_priority(tiers: &[CustomerTier], tier_id: i64) -> Option<i32> {
    tiers.iter().find(|t| t.id == tier_id).map(|t| t.priority)
}

fn check_purchase(rule: &RewardRule, p: &PurchasePayload) -> Result<(), String> {
    let e = &rule.eligibility;
    if e.min_amount.is_some_and(|min| p.net_amount < min) {
        return Err(format!("Net amount {} is below the minimum", p.net_amount));
    }
    if e.max_amount.is_some_and(|max| p.net_amount > max) {
        return Err(format!("Net amount {} is above the maximum", p.net_amount));
    }
    if e.min_items.is_some_and(|min| p.items.len() < min) {
        return Err(format!("{} items are too few", p.items.len()));
    }
    if let Some(categories) = e.category_ids.as_ref().filter(|c| !c.is_empty()) {
        let any_match = p.items.iter().filter_map(|i| i.category_id).any(|c| categories.contains(&c));
        if !any_match {
            return Err("No item is in an eligible category".to_string());
        }
    }
    Ok(())
}

fn check_scope(scope: &RuleScope, payload: &EventPayload) -> Result<(), String> {
    if let Some(store) = scope.store_id {
        if payload.store_id() != Some(store) {
            return Err(format!("Out of scope: store #{store} only"));
        }
    }
    if let Some(branch) = scope.branch_id {
        if payload.branch_id() != Some(branch) {
            return Err(format!("Out of scope: branch #{branch} only"));
        }
    }
    if let Some(channel) = scope.channel.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        if payload.channel() != Some(channel) {
            return Err(format!("Out of scope: channel {channel} only"));
        }
    }
    Ok(())
}

//--------------------------------------        Points         ---------------------------------------------------------

/// Computes what the rule grants for the event, after tier adjustments. Never negative.
pub fn calculate_points(
    rule: &RewardRule,
    event: &LoyaltyEvent,
    tier: Option<&CustomerTier>,
    benefit: Option<&TierBenefit>,
) -> loyalty_common::Points {
    let mut points = base_points(rule, event);
    if let EventPayload::Subscription(_) = &event.payload {
        let age_months = event.metadata_value("subscriptionAgeMonths").and_then(Value::as_f64).filter(|a| *a > 0.0);
        if let Some(age) = age_months {
            points = (points as f64 * (1.0 + age * 0.1)).round() as i64;
        }
    }
    let mut points = loyalty_common::Points::from(points);
    if let Some(benefit) = benefit.filter(|b| b.is_active()) {
        points = benefit.apply_multiplier(points);
    }
    if let Some(multiplier) = tier.and_then(|t| t.multiplier) {
        points = loyalty_common::Points::from((points.as_f64() * multiplier).round() as i64);
    }
    points.non_negative()
}

fn base_points(rule: &RewardRule, event: &LoyaltyEvent) -> i64 {
    let formula = &rule.points_formula;
    match &event.payload {
        EventPayload::Purchase(p) => {
            if rule.earning_domain.is(BONUS_CATEGORY) || rule.earning_domain.is(BONUS_SKU) {
                if let Some(points) = item_bonus_points(rule, p) {
                    return points;
                }
            }
            formula_points(formula, |field| {
                Some(match field {
                    AmountField::Net => p.net_amount,
                    AmountField::Gross => p.gross_amount,
                })
            })
        },
        EventPayload::Retention(r) => streak_points(formula, r.streak_count),
        EventPayload::Custom(c) => {
            let amount = c.numeric_amount().unwrap_or(0.0);
            formula_points(formula, |_| Some(amount))
        },
        _ => formula_points(formula, |_| None),
    }
}

fn clamp(points: i64, min: Option<i64>, max: Option<i64>) -> i64 {
    let points = min.map(|m| points.max(m)).unwrap_or(points);
    max.map(|m| points.min(m)).unwrap_or(points)
}

/// Evaluates a formula against an amount source. Parts that need an amount contribute nothing when none is available.
fn formula_points<F>(formula: &PointsFormula, amount: F) -> i64
where F: Fn(AmountField) -> Option<f64> {
    match formula {
        PointsFormula::Fixed { points } => *points,
        PointsFormula::Rate { rate, amount_field, rounding, min_points, max_points } => amount(*amount_field)
            .map(|a| clamp(rounding.apply(a * rate) as i64, *min_points, *max_points))
            .unwrap_or(0),
        PointsFormula::Table { brackets, amount_field } => amount(*amount_field)
            .and_then(|a| brackets.iter().find(|b| b.contains(a)))
            .map(|b| b.points)
            .unwrap_or(0),
        PointsFormula::Hybrid { base, bonuses } => {
            iter::once(base).chain(bonuses.iter()).map(|part| simple_points(part, &amount)).sum()
        },
    }
}

fn simple_points<F>(formula: &SimpleFormula, amount: &F) -> i64
where F: Fn(AmountField) -> Option<f64> {
    match formula {
        SimpleFormula::Fixed { points } => *points,
        SimpleFormula::Rate { rate, amount_field } => {
            amount(*amount_field).map(|a| (a * rate).round() as i64).unwrap_or(0)
        },
    }
}

/// Streak bonuses treat the streak length as the amount.
fn streak_points(formula: &PointsFormula, streak_count: u32) -> i64 {
    let streak = f64::from(streak_count);
    match formula {
        PointsFormula::Fixed { points } => points * i64::from(streak_count),
        PointsFormula::Rate { rate, min_points, max_points, .. } => {
            clamp((streak * rate).round() as i64, *min_points, *max_points)
        },
        PointsFormula::Table { brackets, .. } => {
            brackets.iter().find(|b| b.contains(streak)).map(|b| b.points).unwrap_or(0)
        },
        PointsFormula::Hybrid { .. } => formula_points(formula, |_| None),
    }
}

/// Category and SKU bonuses are computed per matching line item. Returns `None` for formulas that have no per-item
/// meaning, in which case the order total is used.
fn item_bonus_points(rule: &RewardRule, p: &PurchasePayload) -> Option<i64> {
    let matches = |item: &PurchaseItem| -> bool {
        if rule.earning_domain.is(BONUS_CATEGORY) {
            match rule.scope.category_id {
                Some(category) => item.category_id == Some(category),
                None => match (&rule.eligibility.category_ids, item.category_id) {
                    (Some(ids), Some(category)) => ids.contains(&category),
                    _ => false,
                },
            }
        } else {
            match rule.scope.sku.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                Some(sku) => item.sku == sku,
                None => rule.eligibility.skus.as_ref().is_some_and(|skus| skus.contains(&item.sku)),
            }
        }
    };
    let matching = p.items.iter().filter(|i| matches(i));
    match &rule.points_formula {
        PointsFormula::Rate { rate, rounding, min_points, max_points, .. } => Some(
            matching.map(|i| clamp(rounding.apply(i.line_total() * rate) as i64, *min_points, *max_points)).sum(),
        ),
        PointsFormula::Fixed { points } => Some(matching.map(|i| points * i.qty).sum()),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use loyalty_common::Points;
    use serde_json::json;

    use super::*;
    use crate::{
        db_types::{
            ConflictSettings,
            Eligibility,
            EventType,
            MembershipStatus,
            NewCustomerTier,
            NewMembership,
            NewPointsTransaction,
            NewRewardRule,
            NewTierBenefit,
            RawLoyaltyEvent,
            Rounding,
            RuleLimits,
            StackPolicy,
            TableBracket,
            TimeRange,
            BASE_PURCHASE,
            BASE_VISIT,
        },
        loyalty_api::event_normalizer::normalize_event,
        test_utils::{
            prepare_env::fresh_database,
            seed::{membership_with_id, rule_with_id, BasicScene, Seeder},
        },
    };

    fn purchase(source: &str, net: f64) -> LoyaltyEvent {
        let raw = RawLoyaltyEvent::new(1, EventType::Purchase, source).for_membership(1).with_payload(json!({
            "orderId": source,
            "netAmount": net,
            "grossAmount": net * 1.2,
            "currency": "USD",
            "items": [
                {"sku": "BEAN-1", "qty": 2, "unitPrice": 15.0, "categoryId": 7},
                {"sku": "MUG-1", "qty": 1, "unitPrice": 20.0, "categoryId": 9}
            ],
            "storeId": 3,
            "channel": "pos"
        }));
        normalize_event(raw).unwrap()
    }

    fn purchase_rule(formula: PointsFormula, domain: &str) -> RewardRule {
        let conflict = ConflictSettings::new("BASE", StackPolicy::Exclusive, 10);
        rule_with_id(1, NewRewardRule::new(1, "Spend", EventType::Purchase, formula, conflict, domain))
    }

    fn ctx<'a>(event: &'a LoyaltyEvent, m: &'a CustomerMembership) -> EvaluationContext<'a> {
        EvaluationContext { event, membership: m, tier: None, tenant_tiers: &[] }
    }

    #[test]
    fn rate_formula_rounds_then_clamps() {
        let event = purchase("P-1", 105.0);
        let rule = purchase_rule(PointsFormula::rate(0.1, Rounding::Floor), BASE_PURCHASE);
        assert_eq!(calculate_points(&rule, &event, None, None), Points::from(10));
        let ceil = purchase_rule(PointsFormula::rate(0.1, Rounding::Ceil), BASE_PURCHASE);
        assert_eq!(calculate_points(&ceil, &event, None, None), Points::from(11));
        let capped = purchase_rule(
            PointsFormula::Rate {
                rate: 0.1,
                amount_field: AmountField::Gross,
                rounding: Rounding::Nearest,
                min_points: None,
                max_points: Some(12),
            },
            BASE_PURCHASE,
        );
        // gross = 126 -> 12.6 -> 13 -> capped at 12
        assert_eq!(calculate_points(&capped, &event, None, None), Points::from(12));
    }

    #[test]
    fn table_and_hybrid_formulas() {
        let event = purchase("P-1", 75.0);
        let table = purchase_rule(
            PointsFormula::Table {
                brackets: vec![
                    TableBracket { min: 0.0, max: Some(49.99), points: 5 },
                    TableBracket { min: 50.0, max: Some(99.99), points: 15 },
                    TableBracket { min: 100.0, max: None, points: 40 },
                ],
                amount_field: AmountField::Net,
            },
            BASE_PURCHASE,
        );
        assert_eq!(calculate_points(&table, &event, None, None), Points::from(15));
        let hybrid = purchase_rule(
            PointsFormula::Hybrid {
                base: SimpleFormula::Fixed { points: 5 },
                bonuses: vec![SimpleFormula::Rate { rate: 0.05, amount_field: AmountField::Net }],
            },
            BASE_PURCHASE,
        );
        // 5 + round(3.75)
        assert_eq!(calculate_points(&hybrid, &event, None, None), Points::from(9));
    }

    #[test]
    fn category_and_sku_bonuses_are_per_item() {
        let event = purchase("P-1", 50.0);
        let mut category = purchase_rule(PointsFormula::rate(0.5, Rounding::Floor), BONUS_CATEGORY);
        category.scope.category_id = Some(7);
        // only the beans: 2 * 15 * 0.5
        assert_eq!(calculate_points(&category, &event, None, None), Points::from(15));
        let mut sku = purchase_rule(PointsFormula::fixed(4), BONUS_SKU);
        sku.eligibility.skus = Some(vec!["BEAN-1".into()]);
        assert_eq!(calculate_points(&sku, &event, None, None), Points::from(8));
        let unmatched = purchase_rule(PointsFormula::fixed(4), BONUS_SKU);
        assert_eq!(calculate_points(&unmatched, &event, None, None), Points::zero());
    }

    #[test]
    fn tier_adjustments_apply_benefit_then_multiplier() {
        let event = purchase("P-1", 10.0);
        let rule = purchase_rule(PointsFormula::fixed(100), BASE_PURCHASE);
        let mut tier = CustomerTier {
            id: 2,
            tenant_id: 1,
            name: "Gold".into(),
            min_points: Points::from(500),
            max_points: None,
            multiplier: Some(1.25),
            priority: 2,
            status: crate::db_types::TierStatus::Active,
        };
        assert_eq!(calculate_points(&rule, &event, Some(&tier), None), Points::from(125));
        let benefit = TierBenefit {
            id: 1,
            program_id: 1,
            tier_id: 2,
            points_multiplier: 2.0,
            status: crate::db_types::TierStatus::Active,
        };
        assert_eq!(calculate_points(&rule, &event, Some(&tier), Some(&benefit)), Points::from(250));
        tier.multiplier = None;
        assert_eq!(calculate_points(&rule, &event, Some(&tier), Some(&benefit)), Points::from(200));
    }

    #[test]
    fn retention_uses_the_streak_as_amount() {
        let raw = RawLoyaltyEvent::new(1, EventType::Retention, "R-1").for_membership(1).with_payload(json!({
            "streakType": "VISIT", "streakCount": 6,
            "periodStart": "2024-03-01T00:00:00Z", "periodEnd": "2024-03-31T23:59:59Z"
        }));
        let event = normalize_event(raw).unwrap();
        let conflict = ConflictSettings::new("STREAK", StackPolicy::Stack, 1);
        let fixed = rule_with_id(
            1,
            NewRewardRule::new(
                1,
                "Streak",
                EventType::Retention,
                PointsFormula::fixed(5),
                conflict.clone(),
                BASE_RETENTION,
            ),
        );
        assert_eq!(calculate_points(&fixed, &event, None, None), Points::from(30));
        let rate = rule_with_id(
            2,
            NewRewardRule::new(
                1,
                "Streak",
                EventType::Retention,
                PointsFormula::rate(2.5, Rounding::Floor),
                conflict,
                BASE_RETENTION,
            ),
        );
        assert_eq!(calculate_points(&rate, &event, None, None), Points::from(15));
    }

    #[test]
    fn subscription_age_multiplier() {
        let raw = RawLoyaltyEvent::new(1, EventType::Subscription, "S-1")
            .for_membership(1)
            .with_payload(json!({"subscriptionId": "SUB-1", "subscriptionType": "RENEWED"}))
            .with_metadata(json!({"subscriptionAgeMonths": 12}));
        let event = normalize_event(raw).unwrap();
        let rule = rule_with_id(
            1,
            NewRewardRule::new(
                1,
                "Renewal",
                EventType::Subscription,
                PointsFormula::fixed(100),
                ConflictSettings::new("SUB", StackPolicy::Exclusive, 1),
                BASE_SUBSCRIPTION,
            ),
        );
        assert_eq!(calculate_points(&rule, &event, None, None), Points::from(220));
    }

    #[test]
    fn purchase_eligibility() {
        let event = purchase("P-1", 40.0);
        let m = membership_with_id(1, NewMembership::new(10, 1));
        let mut rule = purchase_rule(PointsFormula::fixed(1), BASE_PURCHASE);
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_ok());
        rule.eligibility.min_amount = Some(50.0);
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_err());
        rule.eligibility = Eligibility { category_ids: Some(vec![1, 9]), min_items: Some(2), ..Default::default() };
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_ok());
        rule.eligibility.min_items = Some(3);
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_err());
        rule.eligibility = Eligibility::default();
        rule.scope.channel = Some("  ".into());
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_ok());
        rule.scope.channel = Some("online".into());
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_err());
        rule.scope = RuleScope { store_id: Some(3), channel: Some("pos".into()), ..Default::default() };
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_ok());
        rule.conflict.priority_rank = -1;
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_err());
    }

    #[test]
    fn membership_and_tier_eligibility() {
        let event = purchase("P-1", 40.0);
        let m = membership_with_id(
            1,
            NewMembership::new(10, 1).with_joined_date(event.occurred_at - Duration::days(10)),
        );
        let silver = crate::test_utils::seed::tier_with_id(5, NewCustomerTier::new(1, "Silver", 0, Some(499), 1));
        let gold = crate::test_utils::seed::tier_with_id(6, NewCustomerTier::new(1, "Gold", 500, None, 2));
        let tiers = vec![silver.clone(), gold.clone()];
        let mut rule = purchase_rule(PointsFormula::fixed(1), BASE_PURCHASE);
        rule.eligibility.min_tier_id = Some(6);
        let mut c = EvaluationContext { event: &event, membership: &m, tier: Some(&silver), tenant_tiers: &tiers };
        assert!(check_eligibility(&rule, &c).is_err());
        c.tier = Some(&gold);
        assert!(check_eligibility(&rule, &c).is_ok());
        c.tier = None;
        assert!(check_eligibility(&rule, &c).is_err());
        rule.eligibility = Eligibility { max_tier_id: Some(5), ..Default::default() };
        assert!(check_eligibility(&rule, &c).is_ok());
        c.tier = Some(&gold);
        assert!(check_eligibility(&rule, &c).is_err());
        rule.eligibility = Eligibility { max_tier_id: Some(99), ..Default::default() };
        assert!(check_eligibility(&rule, &c).is_err(), "unknown tiers never match");
        rule.eligibility = Eligibility { min_membership_age_days: Some(10), ..Default::default() };
        assert!(check_eligibility(&rule, &c).is_ok());
        rule.eligibility.min_membership_age_days = Some(11);
        assert!(check_eligibility(&rule, &c).is_err());
        rule.eligibility =
            Eligibility { membership_status: Some(vec![MembershipStatus::Inactive]), ..Default::default() };
        assert!(check_eligibility(&rule, &c).is_err());
    }

    #[test]
    fn calendar_eligibility() {
        // 2024-07-19 was a Friday
        let at = DateTime::parse_from_rfc3339("2024-07-19T14:30:00Z").unwrap().with_timezone(&Utc);
        let raw = RawLoyaltyEvent::new(1, EventType::Visit, "V-1")
            .for_membership(1)
            .with_occurred_at(at)
            .with_payload(json!({}));
        let event = normalize_event(raw).unwrap();
        let m = membership_with_id(1, NewMembership::new(10, 1).with_joined_date(at - Duration::days(1)));
        let conflict = ConflictSettings::new("VISIT", StackPolicy::Exclusive, 1);
        let mut rule =
            rule_with_id(
                1,
                NewRewardRule::new(1, "Visit", EventType::Visit, PointsFormula::fixed(5), conflict, BASE_VISIT),
            );
        rule.eligibility.day_of_week = Some(vec![5, 6]);
        rule.eligibility.time_range = Some(TimeRange { start: "14:00".into(), end: "14:30".into() });
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_ok());
        rule.eligibility.day_of_week = Some(vec![0]);
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_err());
        rule.eligibility.day_of_week = None;
        rule.eligibility.time_range = Some(TimeRange { start: "08:00".into(), end: "14:29".into() });
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_err());
    }

    #[test]
    fn custom_eligibility() {
        let raw = RawLoyaltyEvent::new(1, EventType::Custom, "C-1")
            .for_membership(1)
            .with_payload(json!({"customType": "REVIEW", "stars": 5}))
            .with_metadata(json!({"flags": ["vip"], "source": "app"}));
        let event = normalize_event(raw).unwrap();
        let m = membership_with_id(1, NewMembership::new(10, 1));
        let conflict = ConflictSettings::new("CUSTOM", StackPolicy::Stack, 1);
        let mut rule = rule_with_id(
            1,
            NewRewardRule::new(1, "Review", EventType::Custom, PointsFormula::fixed(5), conflict, "CUSTOM_REVIEW"),
        );
        rule.eligibility.custom_type = Some("REVIEW".into());
        rule.eligibility.flags = Some(vec!["vip".into(), "staff".into()]);
        let expected = json!({"stars": 5, "source": "app"});
        rule.eligibility.metadata = expected.as_object().cloned();
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_ok());
        rule.eligibility.flags = Some(vec!["staff".into()]);
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_err());
        rule.eligibility.flags = None;
        rule.eligibility.custom_type = Some("SURVEY".into());
        assert!(check_eligibility(&rule, &ctx(&event, &m)).is_err());
    }

    #[tokio::test]
    async fn frequency_and_cooldown_limits_read_the_ledger() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        let conflict = ConflictSettings::new("VISIT", StackPolicy::Exclusive, 1);
        let rule = seeder
            .rule(
                NewRewardRule::new(
                    scene.program.id,
                    "Daily visit",
                    EventType::Visit,
                    PointsFormula::fixed(5),
                    conflict,
                    BASE_VISIT,
                )
                .with_limits(RuleLimits { frequency: Some(Frequency::Daily), ..Default::default() }),
            )
            .await;
        let at = Utc::now();
        let earlier = at - Duration::hours(3);
        let tx = NewPointsTransaction::earning(
            scene.tenant.id,
            scene.membership.user_id,
            scene.membership.id,
            Points::from(5),
            "earlier-visit".into(),
        )
        .unwrap()
        .with_program(scene.program.id)
        .with_rule(rule.id)
        .with_created_at(earlier);
        seeder.ledger_row(tx).await;

        let visit = |source: &str, at: DateTime<Utc>| {
            let raw = RawLoyaltyEvent::new(scene.tenant.id, EventType::Visit, source)
                .for_membership(scene.membership.id)
                .with_occurred_at(at)
                .with_payload(json!({}));
            normalize_event(raw).unwrap()
        };
        let evaluator = RuleEvaluator::new(db.clone(), EventProducers::default(), false);
        let rules = vec![rule.clone()];
        let event = visit("V-2", at);
        let c = ctx(&event, &scene.membership);
        let results = evaluator.evaluate_program(scene.program.id, &rules, &c).await.unwrap();
        assert!(results.is_empty(), "blocked by the visit three hours earlier");

        let tomorrow = visit("V-3", at + Duration::hours(22));
        let c = ctx(&tomorrow, &scene.membership);
        let results = evaluator.evaluate_program(scene.program.id, &rules, &c).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].points, Points::from(5));
        assert_eq!(results[0].reason_code, BASE_VISIT);
        assert_eq!(results[0].metadata["ruleName"], json!("Daily visit"));
    }

    #[tokio::test]
    async fn tier_benefits_are_loaded_per_program() {
        let db = fresh_database().await;
        let seeder = Seeder::new(&db);
        let scene = BasicScene::create(&seeder).await;
        let gold = seeder.tier(NewCustomerTier::new(scene.tenant.id, "Gold", 0, None, 1)).await;
        seeder.tier_benefit(NewTierBenefit::new(scene.program.id, gold.id, 1.5)).await;
        let conflict = ConflictSettings::new("BASE", StackPolicy::Exclusive, 1);
        let rule = seeder
            .rule(NewRewardRule::new(
                scene.program.id,
                "Spend",
                EventType::Purchase,
                PointsFormula::fixed(10),
                conflict,
                BASE_PURCHASE,
            ))
            .await;
        let event = purchase("P-9", 10.0);
        let evaluator = RuleEvaluator::new(db.clone(), EventProducers::default(), false);
        let tiers = vec![gold.clone()];
        let c =
            EvaluationContext { event: &event, membership: &scene.membership, tier: Some(&gold), tenant_tiers: &tiers };
        let results = evaluator.evaluate_program(scene.program.id, &[rule], &c).await.unwrap();
        assert_eq!(results[0].points, Points::from(15));
        assert_eq!(results[0].metadata["tierBenefitApplied"], json!(1.5));
    }
}
