use chrono::{Duration, NaiveDate};

use crate::{
    db_types::{IdempotencyStrategy, LoyaltyEvent, RewardRule},
    helpers::{day_key, epoch_days},
};

pub const DEFAULT_IDEMPOTENCY_PERIOD_DAYS: u32 = 30;

/// Derives the deduplication key for the grant of `rule` to a membership in response to `event`.
///
/// The key is `loyalty:{tenant}:{membership}:{program}:{rule}:{suffix}` where the suffix is
/// * the source event id for the `default` and `per-event` strategies,
/// * the UTC date of the event (`YYYY-MM-DD`) for `per-day`,
/// * the first day of the period the event falls in, followed by the period length (`2024-03-01:30d`) for
///   `per-period`. Periods are aligned to multiples of their length counted from 1970-01-01.
///
/// The same inputs always give the same key.
pub fn generate_idempotency_key(membership_id: i64, rule: &RewardRule, event: &LoyaltyEvent) -> String {
    let suffix = match rule.idempotency_scope.strategy {
        IdempotencyStrategy::Default | IdempotencyStrategy::PerEvent => event.source_event_id.clone(),
        IdempotencyStrategy::PerDay => day_key(event.occurred_at).format("%Y-%m-%d").to_string(),
        IdempotencyStrategy::PerPeriod => {
            let period_days = rule
                .idempotency_scope
                .period_days
                .filter(|d| *d > 0)
                .or_else(|| rule.limits.period_days.and_then(|d| u32::try_from(d).ok()).filter(|d| *d > 0))
                .unwrap_or(DEFAULT_IDEMPOTENCY_PERIOD_DAYS);
            let bucket = period_bucket(day_key(event.occurred_at), period_days);
            format!("{}:{period_days}d", bucket.format("%Y-%m-%d"))
        },
    };
    format!("loyalty:{}:{membership_id}:{}:{}:{suffix}", event.tenant_id, rule.program_id, rule.id)
}

/// The first day of the `period_days`-long period containing `date`.
fn period_bucket(date: NaiveDate, period_days: u32) -> NaiveDate {
    let days = epoch_days(date);
    let offset = days.rem_euclid(i64::from(period_days));
    date - Duration::days(offset)
}

#[cfg(test)]
mod test {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use super::*;
    use crate::{
        db_types::{
            ConflictSettings,
            EventType,
            IdempotencyScope,
            NewRewardRule,
            PointsFormula,
            RawLoyaltyEvent,
            StackPolicy,
            BASE_PURCHASE,
        },
        loyalty_api::event_normalizer::normalize_event,
        test_utils::seed::rule_with_id,
    };

    fn rule(strategy: IdempotencyStrategy, period_days: Option<u32>) -> RewardRule {
        let r = NewRewardRule::new(
            1,
            "Base",
            EventType::Visit,
            PointsFormula::fixed(5),
            ConflictSettings::new("BASE", StackPolicy::Exclusive, 1),
            BASE_PURCHASE,
        )
        .with_idempotency_scope(IdempotencyScope { strategy, bucket_timezone: None, period_days });
        rule_with_id(4, r)
    }

    fn event(source: &str, at: &str) -> LoyaltyEvent {
        let at = DateTime::parse_from_rfc3339(at).unwrap().with_timezone(&Utc);
        let raw = RawLoyaltyEvent::new(1, EventType::Visit, source)
            .for_membership(100)
            .with_occurred_at(at)
            .with_payload(json!({}));
        normalize_event(raw).unwrap()
    }

    #[test]
    fn default_strategy_uses_the_source_event() {
        let r = rule(IdempotencyStrategy::Default, None);
        let key = generate_idempotency_key(100, &r, &event("ORDER-123", "2025-01-28T10:00:00Z"));
        assert_eq!(key, "loyalty:1:100:1:4:ORDER-123");
        let other = generate_idempotency_key(100, &r, &event("ORDER-124", "2025-01-28T10:00:00Z"));
        assert_ne!(key, other);
        let same = generate_idempotency_key(100, &r, &event("ORDER-123", "2025-01-29T10:00:00Z"));
        assert_eq!(key, same);
    }

    #[test]
    fn per_day_buckets_by_utc_date() {
        let r = rule(IdempotencyStrategy::PerDay, None);
        let a = generate_idempotency_key(100, &r, &event("A", "2025-01-28T00:00:01Z"));
        let b = generate_idempotency_key(100, &r, &event("B", "2025-01-28T23:59:59Z"));
        assert_eq!(a, "loyalty:1:100:1:4:2025-01-28");
        assert_eq!(a, b);
    }

    #[test]
    fn per_period_aligns_to_period_boundaries() {
        let r = rule(IdempotencyStrategy::PerPeriod, Some(30));
        let a = generate_idempotency_key(100, &r, &event("A", "2025-01-28T10:00:00Z"));
        assert!(a.ends_with(":30d"), "{a}");
        // 2025-01-28 is epoch day 20116; 20116 - (20116 % 30) = 20100, i.e. 2025-01-12
        assert_eq!(a, "loyalty:1:100:1:4:2025-01-12:30d");
        let same_period = generate_idempotency_key(100, &r, &event("B", "2025-02-10T10:00:00Z"));
        assert_eq!(a, same_period);
        let next_period = generate_idempotency_key(100, &r, &event("C", "2025-02-11T10:00:00Z"));
        assert_ne!(a, next_period);
    }
}
