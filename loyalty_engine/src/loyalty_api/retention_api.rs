//! Activity streaks and the retention rewards they earn.
//!
//! A streak is a run of consecutive UTC calendar days on which a membership earned points from a given kind of
//! activity. [`longest_streak`] finds the longest such run in a window of ledger rows. [`RetentionApi`] runs the
//! calculation for every active membership of every tenant that has retention rules, and feeds each non-empty streak
//! back into the event pipeline as a RETENTION event. Whether that event earns anything is decided by the tenant's
//! rules, which grant at most once per window.
use std::{collections::BTreeSet, fmt::Debug};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::*;
use loyalty_common::Points;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

use crate::{
    db_types::{
        EventPayload,
        EventType,
        LoyaltyEvent,
        MembershipRef,
        PointsTransaction,
        RetentionPayload,
        StreakType,
        Tenant,
        TransactionType,
        BASE_PURCHASE,
        BASE_VISIT,
        SYSTEM_ACTOR,
    },
    helpers::{compact_date, day_key, start_of_day, start_of_month},
    loyalty_api::{errors::RetentionError, event_api::LoyaltyEventApi},
    traits::{
        LedgerManagement,
        LoyaltyDatabase,
        MembershipManagement,
        ProgramManagement,
        TenantManagement,
        TierChangeService,
    },
};

pub const STREAK_TYPES: [StreakType; 3] = [StreakType::Visit, StreakType::Purchase, StreakType::Mixed];

/// The stretch of time a streak is looked for in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "days", rename_all = "lowercase")]
pub enum RetentionWindow {
    /// From the first day of the current calendar month until now.
    Monthly,
    /// The last `n` calendar days, today included.
    Rolling(i64),
}

impl RetentionWindow {
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            RetentionWindow::Monthly => (start_of_month(now), now),
            RetentionWindow::Rolling(days) => (start_of_day(now) - Duration::days((days - 1).max(0)), now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakResult {
    pub streak_type: StreakType,
    pub streak_count: u32,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub tenant_id: i64,
    pub memberships_processed: usize,
    pub events_processed: usize,
    pub points_awarded: Points,
    pub failures: usize,
}

/// Whether the EARNING row `tx` counts towards a streak of `kind`.
///
/// The event type recorded in the row's metadata decides. Rows without one fall back to the earning domain in their
/// reason code.
pub fn counts_towards(tx: &PointsTransaction, kind: StreakType) -> bool {
    if tx.tx_type != TransactionType::Earning {
        return false;
    }
    let domain = match kind {
        StreakType::Mixed => return true,
        StreakType::Visit => BASE_VISIT,
        StreakType::Purchase => BASE_PURCHASE,
    };
    match tx.metadata_str("eventType") {
        Some(event_type) => event_type == kind.as_str(),
        None => tx.reason_code.as_deref().is_some_and(|r| r.starts_with(domain)),
    }
}

/// The longest run of consecutive days with activity of `kind` among `rows`. The earliest run wins a tie.
pub fn longest_streak(rows: &[PointsTransaction], kind: StreakType) -> Option<StreakResult> {
    let days =
        rows.iter().filter(|tx| counts_towards(tx, kind)).map(|tx| day_key(tx.created_at)).collect::<BTreeSet<_>>();
    let mut best: Option<(NaiveDate, NaiveDate, u32)> = None;
    let mut current: Option<(NaiveDate, NaiveDate, u32)> = None;
    for day in days {
        current = match current {
            Some((first, last, count)) if day - last == Duration::days(1) => Some((first, day, count + 1)),
            _ => Some((day, day, 1)),
        };
        if let Some(run) = current {
            if best.map(|(_, _, n)| run.2 > n).unwrap_or(true) {
                best = Some(run);
            }
        }
    }
    best.map(|(first_date, last_date, streak_count)| StreakResult {
        streak_type: kind,
        streak_count,
        first_date,
        last_date,
    })
}

/// The daily retention job.
pub struct RetentionApi<B, T> {
    events: LoyaltyEventApi<B, T>,
    window: RetentionWindow,
}

impl<B: Debug + Clone, T> Debug for RetentionApi<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RetentionApi ({:?}, {:?})", self.window, self.events.db())
    }
}

impl<B, T> RetentionApi<B, T> {
    pub fn new(events: LoyaltyEventApi<B, T>, window: RetentionWindow) -> Self {
        Self { events, window }
    }

    pub fn window(&self) -> RetentionWindow {
        self.window
    }
}

impl<B, T> RetentionApi<B, T>
where
    B: LoyaltyDatabase,
    T: TierChangeService,
{
    /// The membership's longest streak of `kind` in the window ending at `now`.
    pub async fn calculate_streak(
        &self,
        membership_id: i64,
        kind: StreakType,
        now: DateTime<Utc>,
    ) -> Result<Option<StreakResult>, RetentionError> {
        let (start, end) = self.window.bounds(now);
        let rows = self.events.db().fetch_for_tier_evaluation(membership_id, start, end).await?;
        Ok(longest_streak(&rows, kind))
    }

    /// Runs the retention job over every active tenant. A tenant that fails is reported with one failure and the
    /// job carries on with the next.
    pub async fn evaluate_all_tenants(&self, now: DateTime<Utc>) -> Result<Vec<RetentionReport>, RetentionError> {
        let tenants = self.events.db().fetch_active_tenants().await?;
        let mut reports = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            match self.evaluate_tenant(&tenant, now).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("🔥️ Retention run for tenant #{} failed. {e}", tenant.id);
                    reports.push(RetentionReport { tenant_id: tenant.id, failures: 1, ..Default::default() });
                },
            }
        }
        Ok(reports)
    }

    /// Synthesizes a RETENTION event for every non-empty streak of every active membership of the tenant.
    ///
    /// Tenants without an active retention rule are skipped entirely. A membership that fails is counted and the job
    /// moves on.
    pub async fn evaluate_tenant(
        &self,
        tenant: &Tenant,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport, RetentionError> {
        let db = self.events.db();
        let mut report = RetentionReport { tenant_id: tenant.id, ..Default::default() };
        if db.fetch_tenant_rules_for_trigger(tenant.id, EventType::Retention, now).await?.is_empty() {
            trace!("🔥️ Tenant #{} has no retention rules", tenant.id);
            return Ok(report);
        }
        let memberships = db.fetch_memberships_for_tenant(tenant.id).await?;
        for membership in memberships.iter().filter(|m| m.is_active()) {
            report.memberships_processed += 1;
            match self.evaluate_membership(membership.id, tenant.id, now).await {
                Ok((events, points)) => {
                    report.events_processed += events;
                    report.points_awarded += points;
                },
                Err(e) => {
                    warn!("🔥️ Retention evaluation failed for membership #{}. {e}", membership.id);
                    report.failures += 1;
                },
            }
        }
        info!(
            "🔥️ Retention for tenant #{}: {} memberships, {} streak events, {} awarded, {} failures",
            tenant.id, report.memberships_processed, report.events_processed, report.points_awarded, report.failures
        );
        Ok(report)
    }

    /// Returns the number of streak events processed and the points they were worth.
    async fn evaluate_membership(
        &self,
        membership_id: i64,
        tenant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(usize, Points), RetentionError> {
        let (window_start, window_end) = self.window.bounds(now);
        let rows = self.events.db().fetch_for_tier_evaluation(membership_id, window_start, window_end).await?;
        let mut processed = 0;
        let mut points = Points::zero();
        for kind in STREAK_TYPES {
            let Some(streak) = longest_streak(&rows, kind) else {
                continue;
            };
            let event = retention_event(membership_id, tenant_id, &streak, window_start, now);
            let result = self.events.process_normalized(event).await?;
            processed += 1;
            points += result.total_points_awarded;
        }
        Ok((processed, points))
    }
}

/// The RETENTION event for a streak. Its id is stable for the window, so re-running the job is idempotent.
fn retention_event(
    membership_id: i64,
    tenant_id: i64,
    streak: &StreakResult,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> LoyaltyEvent {
    let mut metadata = Map::new();
    metadata.insert("streakFirstDate".into(), json!(streak.first_date));
    metadata.insert("streakLastDate".into(), json!(streak.last_date));
    LoyaltyEvent {
        tenant_id,
        source_event_id: format!("RETENTION-{membership_id}-{}-{}", streak.streak_type, compact_date(window_start)),
        occurred_at: now,
        membership_ref: MembershipRef::MembershipId(membership_id),
        payload: EventPayload::Retention(RetentionPayload {
            streak_type: streak.streak_type,
            streak_count: streak.streak_count,
            period_start: window_start,
            period_end: now,
        }),
        correlation_id: None,
        created_by: Some(SYSTEM_ACTOR.to_string()),
        metadata: Some(metadata),
    }
}
