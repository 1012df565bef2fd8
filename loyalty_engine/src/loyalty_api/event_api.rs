//! The loyalty event pipeline.
//!
//! [`LoyaltyEventApi`] is the engine's primary entry point. It turns one business event into zero or more EARNING rows
//! on the ledger:
//!
//! 1. Normalize the raw event and resolve the (active) membership it refers to.
//! 2. Select the membership's compatible programs, and load its tier and the rules that fire on the event type.
//! 3. Evaluate the rules program by program, attach idempotency keys, and resolve conflicts across the pooled results.
//! 4. Write one EARNING row per surviving evaluation, reusing any row that already carries the same idempotency key.
//! 5. Update the membership's activity counters, complete pending referrals on a first purchase, re-project the
//!    balance and ask the tier collaborator to re-evaluate the tier.
//!
//! Nothing that goes wrong for a single program, rule or ledger write aborts the event. Those problems are reported
//! in [`ProcessEventResult::skipped`] and the rest of the event is still committed. The only hard errors are an
//! invalid event, an unresolvable membership, and storage failures outside the per-row writes.
use std::{collections::HashMap, fmt::Debug};

use log::*;
use loyalty_common::Points;
use serde_json::{json, Map};

use crate::{
    config::EngineConfig,
    db_types::{
        CustomerMembership,
        EventPayload,
        LoyaltyEvent,
        LoyaltyProgram,
        MembershipRef,
        NewPointsTransaction,
        RawLoyaltyEvent,
        Referral,
        ReferralPayload,
        RewardRule,
        Tenant,
        TransactionValidationError,
        SYSTEM_ACTOR,
    },
    events::{EventProducers, PointsAwardedEvent},
    loyalty_api::{
        balance_api::BalanceApi,
        compatibility::resolve_compatible_programs,
        conflict_resolver::ConflictResolver,
        errors::{MembershipResolutionError, ProcessEventError},
        event_normalizer::normalize_event,
        event_objects::{ProcessEventResult, RuleEvaluation, SkipReason},
        expiration_api::ExpirationPolicyResolver,
        idempotency::generate_idempotency_key,
        membership_resolver::resolve_active_membership,
        referral_api::ReferralApi,
        rule_evaluator::{EvaluationContext, RuleEvaluator},
    },
    traits::{InsertTransactionResult, LoyaltyDatabase, TierChangeService},
};

pub const NO_COMPATIBLE_PROGRAMS: &str = "No compatible programs found for membership";
pub const NO_ELIGIBLE_RULES: &str = "No eligible rules matched";

/// What one pass through the pipeline produced, plus the referrals that the event completed.
struct PipelineOutcome {
    result: ProcessEventResult,
    completed_referrals: Vec<Referral>,
}

impl From<ProcessEventResult> for PipelineOutcome {
    fn from(result: ProcessEventResult) -> Self {
        Self { result, completed_referrals: Vec::new() }
    }
}

pub struct LoyaltyEventApi<B, T> {
    db: B,
    tier_service: T,
    producers: EventProducers,
    evaluator: RuleEvaluator<B>,
    resolver: ConflictResolver<B>,
    balance: BalanceApi<B>,
    referrals: ReferralApi<B>,
}

impl<B: Debug, T> Debug for LoyaltyEventApi<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoyaltyEventApi ({:?})", self.db)
    }
}

impl<B, T> LoyaltyEventApi<B, T>
where B: Clone
{
    pub fn new(db: B, tier_service: T, producers: EventProducers, config: &EngineConfig) -> Self {
        let evaluator = RuleEvaluator::new(db.clone(), producers.clone(), config.emit_rule_trace);
        let resolver = ConflictResolver::new(db.clone());
        let balance = BalanceApi::new(db.clone()).with_batch_size(config.balance_batch_size);
        let referrals = ReferralApi::new(db.clone()).with_config(config);
        Self { db, tier_service, producers, evaluator, resolver, balance, referrals }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn tier_service(&self) -> &T {
        &self.tier_service
    }
}

impl<B, T> LoyaltyEventApi<B, T>
where
    B: LoyaltyDatabase,
    T: TierChangeService,
{
    /// Validates a raw event and processes it. See [`Self::process_normalized`].
    pub async fn process_event(&self, raw: RawLoyaltyEvent) -> Result<ProcessEventResult, ProcessEventError> {
        let event = normalize_event(raw)?;
        self.process_normalized(event).await
    }

    /// Processes a validated event.
    ///
    /// Processing the same event twice yields the same transaction ids and total, and writes nothing the second time.
    /// When the event is a membership's first purchase, every referral it completes is rewarded by processing a
    /// REFERRAL event for the referrer. Failures in that cascade are logged and never affect the returned result.
    pub async fn process_normalized(&self, event: LoyaltyEvent) -> Result<ProcessEventResult, ProcessEventError> {
        let outcome = self.run_pipeline(&event).await?;
        for referral in outcome.completed_referrals {
            self.reward_referrer(&referral, &event).await;
        }
        Ok(outcome.result)
    }

    async fn run_pipeline(&self, event: &LoyaltyEvent) -> Result<PipelineOutcome, ProcessEventError> {
        let membership = resolve_active_membership(&self.db, &event.membership_ref).await?;
        if membership.tenant_id != event.tenant_id {
            let description = format!("membership id {} in tenant {}", membership.id, event.tenant_id);
            return Err(MembershipResolutionError::NotFound(description).into());
        }
        let event_id = event.source_event_id.as_str();
        let mut result = ProcessEventResult::empty(event_id, membership.id);

        let programs = resolve_compatible_programs(&self.db, membership.id, event.occurred_at).await?;
        if programs.is_empty() {
            debug!("🎯️ Event {event_id}: membership #{} has no compatible programs", membership.id);
            return Ok(result.skipped_with(SkipReason::new(NO_COMPATIBLE_PROGRAMS)).into());
        }
        let program_ids = programs.iter().map(|p| p.id).collect::<Vec<_>>();
        result.programs_processed.clone_from(&program_ids);

        let tier = match membership.tier_id {
            Some(id) => self.db.fetch_tier(id).await?,
            None => None,
        };
        let tenant_tiers = self.db.fetch_tiers_for_tenant(event.tenant_id).await?;
        let rules = self.db.fetch_rules_for_programs(&program_ids, event.event_type()).await?;
        if rules.is_empty() {
            let reason = format!("No active rules found for trigger {}", event.event_type());
            debug!("🎯️ Event {event_id}: {reason}");
            return Ok(result.skipped_with(SkipReason::new(reason)).into());
        }

        let ctx =
            EvaluationContext { event, membership: &membership, tier: tier.as_ref(), tenant_tiers: &tenant_tiers };
        let evaluations = self.evaluate_programs(&programs, &rules, &ctx, &mut result.skipped).await;
        let resolved = self.resolver.resolve(evaluations.clone(), membership.id, event.occurred_at).await?;
        result.evaluations = evaluations;

        let keys = resolved.iter().map(|e| e.idempotency_key.clone()).collect::<Vec<_>>();
        let existing = self
            .db
            .fetch_transactions_by_keys(&keys)
            .await?
            .into_iter()
            .map(|tx| (tx.idempotency_key.clone(), tx))
            .collect::<HashMap<_, _>>();
        let rule_ids = resolved.iter().map(|e| e.rule_id).collect::<Vec<_>>();
        let rules_by_id =
            self.db.fetch_rules(&rule_ids).await?.into_iter().map(|r| (r.id, r)).collect::<HashMap<_, _>>();
        let programs_by_id = programs.iter().map(|p| (p.id, p)).collect::<HashMap<_, _>>();
        let Some(tenant) = self.db.fetch_tenant(event.tenant_id).await? else {
            warn!("🎯️ Event {event_id}: tenant #{} does not exist", event.tenant_id);
            return Ok(result.skipped_with(SkipReason::new(format!("Tenant {} not found", event.tenant_id))).into());
        };

        let mut new_ids = Vec::new();
        let mut new_points = Points::zero();
        for evaluation in &resolved {
            if let Some(tx) = existing.get(&evaluation.idempotency_key) {
                trace!("🎯️ Event {event_id}: reusing ledger row #{} for rule #{}", tx.id, evaluation.rule_id);
                result.transactions_created.push(tx.id);
                result.total_points_awarded += tx.points_delta;
                continue;
            }
            let (rule, program) =
                match (rules_by_id.get(&evaluation.rule_id), programs_by_id.get(&evaluation.program_id)) {
                    (Some(rule), Some(program)) => (rule, *program),
                    (None, _) => {
                        let skip = SkipReason::for_rule("Rule not found", evaluation.rule_id, evaluation.program_id);
                        result.skipped.push(skip);
                        continue;
                    },
                    (_, None) => {
                        let skip =
                            SkipReason::for_rule("Program not found", evaluation.rule_id, evaluation.program_id);
                        result.skipped.push(skip);
                        continue;
                    },
                };
            let written = match earning_row(evaluation, rule, program, &tenant, &membership, event) {
                Ok(tx) => self.db.insert_transaction(tx).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match written {
                Ok(InsertTransactionResult::Inserted(id)) => {
                    new_ids.push(id);
                    new_points += evaluation.points;
                    result.transactions_created.push(id);
                    result.total_points_awarded += evaluation.points;
                },
                Ok(InsertTransactionResult::AlreadyExists(id)) => {
                    // A concurrent delivery of the same event got there first
                    result.transactions_created.push(id);
                    result.total_points_awarded += evaluation.points;
                },
                Err(e) => {
                    warn!("🎯️ Event {event_id}: could not write the grant of rule #{}. {e}", evaluation.rule_id);
                    let reason = format!("Error creating transaction: {e}");
                    result.skipped.push(SkipReason::for_rule(reason, evaluation.rule_id, evaluation.program_id));
                },
            }
        }

        let mut completed_referrals = Vec::new();
        if !new_ids.is_empty() {
            completed_referrals = self.record_activity(membership.id, event, &mut result.skipped).await;
            self.balance.sync_after_transaction(membership.id).await?;
        }
        if new_points.is_positive() {
            if let Err(e) = self.tier_service.evaluate_and_apply_tier_change(membership.id, tenant.id).await {
                warn!("🎯️ Tier re-evaluation for membership #{} failed. {e}", membership.id);
            }
            let awarded = PointsAwardedEvent {
                tenant_id: tenant.id,
                membership_id: membership.id,
                event_type: event.event_type(),
                source_event_id: event.source_event_id.clone(),
                total_points: new_points,
                transaction_ids: new_ids.clone(),
                program_ids: result.programs_processed.clone(),
            };
            self.producers.publish_points_awarded(awarded).await;
        }
        debug!(
            "🎯️ Event {event_id} for membership #{}: {} ledger row(s), {} new, {} awarded, {} skipped",
            membership.id,
            result.transactions_created.len(),
            new_ids.len(),
            result.total_points_awarded,
            result.skipped.len()
        );
        Ok(PipelineOutcome { result, completed_referrals })
    }

    /// Evaluates every program's rules and attaches idempotency keys to the results. A program whose evaluation fails
    /// is skipped.
    async fn evaluate_programs(
        &self,
        programs: &[LoyaltyProgram],
        rules: &[RewardRule],
        ctx: &EvaluationContext<'_>,
        skipped: &mut Vec<SkipReason>,
    ) -> Vec<RuleEvaluation> {
        let mut pooled = Vec::new();
        for program in programs {
            match self.evaluator.evaluate_program(program.id, rules, ctx).await {
                Ok(evaluations) if evaluations.is_empty() => {
                    skipped.push(SkipReason::for_program(NO_ELIGIBLE_RULES, program.id));
                },
                Ok(evaluations) => {
                    for mut evaluation in evaluations {
                        if let Some(rule) = rules.iter().find(|r| r.id == evaluation.rule_id) {
                            evaluation.idempotency_key = generate_idempotency_key(ctx.membership.id, rule, ctx.event);
                            pooled.push(evaluation);
                        }
                    }
                },
                Err(e) => {
                    warn!("🎯️ Could not evaluate the rules of program #{}. {e}", program.id);
                    skipped.push(SkipReason::for_program(format!("Rule evaluation failed: {e}"), program.id));
                },
            }
        }
        pooled
    }

    /// Applies the visit and purchase transitions to the membership. Returns the referrals completed by a first
    /// purchase.
    async fn record_activity(
        &self,
        membership_id: i64,
        event: &LoyaltyEvent,
        skipped: &mut Vec<SkipReason>,
    ) -> Vec<Referral> {
        let recorded = match &event.payload {
            EventPayload::Visit(_) => self.db.record_visit(membership_id, event.occurred_at).await.map(|_| false),
            EventPayload::Purchase(p) => self.db.record_purchase(membership_id, p.spend_amount()).await,
            _ => return Vec::new(),
        };
        let first_purchase = match recorded {
            Ok(first) => first,
            Err(e) => {
                warn!("🎯️ Could not update the activity counters of membership #{membership_id}. {e}");
                skipped.push(SkipReason::new(format!("Error updating membership: {e}")));
                return Vec::new();
            },
        };
        if !first_purchase {
            return Vec::new();
        }
        match self.referrals.process_first_purchase(membership_id, event.occurred_at).await {
            Ok(referrals) => referrals,
            Err(e) => {
                warn!("🤝️ Could not complete the referrals of membership #{membership_id}. {e}");
                Vec::new()
            },
        }
    }

    /// Credits the referrer of a referral completed by `trigger` and marks the referral rewarded.
    async fn reward_referrer(&self, referral: &Referral, trigger: &LoyaltyEvent) {
        let event = referral_event(referral, trigger);
        match self.run_pipeline(&event).await {
            Ok(outcome) if !outcome.result.transactions_created.is_empty() => {
                if let Err(e) = self.referrals.mark_reward_granted(referral.id, trigger.occurred_at).await {
                    warn!("🤝️ Referral #{} was rewarded but could not be marked. {e}", referral.id);
                }
            },
            Ok(_) => debug!("🤝️ Referral #{} earned the referrer nothing", referral.id),
            Err(e) => warn!("🤝️ Could not reward the referrer of referral #{}. {e}", referral.id),
        }
    }
}

fn earning_row(
    evaluation: &RuleEvaluation,
    rule: &RewardRule,
    program: &LoyaltyProgram,
    tenant: &Tenant,
    membership: &CustomerMembership,
    event: &LoyaltyEvent,
) -> Result<NewPointsTransaction, TransactionValidationError> {
    let expires_at = ExpirationPolicyResolver::calculate_expiration_date(Some(program), tenant, event.occurred_at);
    let mut tx = NewPointsTransaction::earning(
        tenant.id,
        membership.user_id,
        membership.id,
        evaluation.points,
        evaluation.idempotency_key.clone(),
    )?
    .with_program(program.id)
    .with_rule(rule.id)
    .with_source_event(event.source_event_id.as_str())
    .with_correlation_id(event.correlation_id.clone())
    .with_created_by(event.created_by.as_deref().unwrap_or(SYSTEM_ACTOR))
    .with_reason_code(evaluation.reason_code.as_str())
    .with_metadata(evaluation.metadata.clone())
    .with_expires_at(expires_at)
    .with_created_at(event.occurred_at);
    if let EventPayload::Purchase(p) = &event.payload {
        tx = tx.with_amount(p.spend_amount(), &p.currency).with_branch(p.branch_id);
    }
    Ok(tx)
}

/// The REFERRAL event that credits the referrer once the referred member completes their first purchase.
fn referral_event(referral: &Referral, trigger: &LoyaltyEvent) -> LoyaltyEvent {
    let mut metadata = Map::new();
    metadata.insert("referralId".into(), json!(referral.id));
    metadata.insert("triggerEventId".into(), json!(trigger.source_event_id));
    LoyaltyEvent {
        tenant_id: referral.tenant_id,
        source_event_id: format!("REFERRAL-{}-{}", referral.id, trigger.source_event_id),
        occurred_at: trigger.occurred_at,
        membership_ref: MembershipRef::MembershipId(referral.referrer_membership_id),
        payload: EventPayload::Referral(ReferralPayload {
            referred_membership_id: referral.referred_membership_id,
            referral_code: referral.referral_code.clone(),
            first_purchase_completed: Some(true),
        }),
        correlation_id: trigger.correlation_id.clone().or_else(|| Some(trigger.source_event_id.clone())),
        created_by: Some(SYSTEM_ACTOR.to_string()),
        metadata: Some(metadata),
    }
}
