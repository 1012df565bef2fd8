use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{text_enum, EarningDomain, EventType, MembershipStatus};

text_enum! {
    RuleStatus {
        Active => "active",
        Inactive => "inactive",
        Draft => "draft",
    }
}

text_enum! {
    Rounding {
        Floor => "floor",
        Ceil => "ceil",
        Nearest => "nearest",
    }
}

impl Default for Rounding {
    fn default() -> Self {
        Self::Floor
    }
}

impl Rounding {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Rounding::Floor => value.floor(),
            Rounding::Ceil => value.ceil(),
            Rounding::Nearest => value.round(),
        }
    }
}

text_enum! {
    /// Which purchase amount a rate or table formula reads.
    AmountField {
        Net => "net",
        Gross => "gross",
    }
}

impl Default for AmountField {
    fn default() -> Self {
        Self::Net
    }
}

text_enum! {
    Frequency {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
        PerPeriod => "per-period",
        PerEvent => "per-event",
    }
}

text_enum! {
    PeriodType {
        Rolling => "rolling",
        Calendar => "calendar",
    }
}

text_enum! {
    StackPolicy {
        Stack => "STACK",
        Exclusive => "EXCLUSIVE",
        BestOf => "BEST_OF",
        Priority => "PRIORITY",
    }
}

text_enum! {
    IdempotencyStrategy {
        Default => "default",
        PerDay => "per-day",
        PerPeriod => "per-period",
        PerEvent => "per-event",
    }
}

impl Default for IdempotencyStrategy {
    fn default() -> Self {
        Self::Default
    }
}

//--------------------------------------      RuleScope        ---------------------------------------------------------
/// Narrowing filters. An unset field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleScope {
    pub store_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub channel: Option<String>,
    pub category_id: Option<i64>,
    pub sku: Option<String>,
}

//--------------------------------------      Eligibility      ---------------------------------------------------------
/// An inclusive "HH:mm" window, evaluated in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub membership_status: Option<Vec<MembershipStatus>>,
    /// Lower tier bound. Compared through the referenced tier's priority.
    pub min_tier_id: Option<i64>,
    /// Upper tier bound. Compared through the referenced tier's priority.
    pub max_tier_id: Option<i64>,
    pub min_membership_age_days: Option<i64>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub min_items: Option<usize>,
    pub category_ids: Option<Vec<i64>>,
    pub skus: Option<Vec<String>>,
    /// 0 = Sunday
    pub day_of_week: Option<Vec<u32>>,
    pub time_range: Option<TimeRange>,
    pub flags: Option<Vec<String>>,
    pub custom_type: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

//--------------------------------------     PointsFormula     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableBracket {
    pub min: f64,
    /// `None` leaves the bracket open-ended.
    pub max: Option<f64>,
    pub points: i64,
}

impl TableBracket {
    pub fn contains(&self, amount: f64) -> bool {
        amount >= self.min && self.max.map(|max| amount <= max).unwrap_or(true)
    }
}

/// The building block used for hybrid bases and bonuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SimpleFormula {
    Fixed {
        points: i64,
    },
    #[serde(rename_all = "camelCase")]
    Rate {
        rate: f64,
        #[serde(default)]
        amount_field: AmountField,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PointsFormula {
    Fixed {
        points: i64,
    },
    #[serde(rename_all = "camelCase")]
    Rate {
        rate: f64,
        #[serde(default)]
        amount_field: AmountField,
        #[serde(default)]
        rounding: Rounding,
        min_points: Option<i64>,
        max_points: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Table {
        brackets: Vec<TableBracket>,
        #[serde(default)]
        amount_field: AmountField,
    },
    Hybrid {
        base: SimpleFormula,
        #[serde(default)]
        bonuses: Vec<SimpleFormula>,
    },
}

impl PointsFormula {
    pub fn fixed(points: i64) -> Self {
        Self::Fixed { points }
    }

    pub fn rate(rate: f64, rounding: Rounding) -> Self {
        Self::Rate { rate, amount_field: AmountField::Net, rounding, min_points: None, max_points: None }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PointsFormula::Fixed { .. } => "fixed",
            PointsFormula::Rate { .. } => "rate",
            PointsFormula::Table { .. } => "table",
            PointsFormula::Hybrid { .. } => "hybrid",
        }
    }
}

//--------------------------------------      RuleLimits       ---------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleLimits {
    pub frequency: Option<Frequency>,
    pub cooldown_hours: Option<i64>,
    pub per_event_cap: Option<i64>,
    pub per_period_cap: Option<i64>,
    pub period_type: Option<PeriodType>,
    pub period_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSettings {
    pub conflict_group: String,
    pub stack_policy: StackPolicy,
    pub priority_rank: i32,
    pub max_awards_per_event: Option<u32>,
}

impl ConflictSettings {
    pub fn new(conflict_group: &str, stack_policy: StackPolicy, priority_rank: i32) -> Self {
        Self { conflict_group: conflict_group.to_string(), stack_policy, priority_rank, max_awards_per_event: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyScope {
    pub strategy: IdempotencyStrategy,
    pub bucket_timezone: Option<String>,
    pub period_days: Option<u32>,
}

//--------------------------------------      RewardRule       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRule {
    pub id: i64,
    pub program_id: i64,
    pub name: String,
    pub trigger: EventType,
    pub scope: RuleScope,
    pub eligibility: Eligibility,
    pub points_formula: PointsFormula,
    pub limits: RuleLimits,
    pub conflict: ConflictSettings,
    pub idempotency_scope: IdempotencyScope,
    pub earning_domain: EarningDomain,
    pub status: RuleStatus,
    pub version: i32,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
}

impl RewardRule {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == RuleStatus::Active &&
            self.active_from.map(|from| from <= now).unwrap_or(true) &&
            self.active_to.map(|to| now <= to).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRewardRule {
    pub program_id: i64,
    pub name: String,
    pub trigger: EventType,
    pub scope: RuleScope,
    pub eligibility: Eligibility,
    pub points_formula: PointsFormula,
    pub limits: RuleLimits,
    pub conflict: ConflictSettings,
    pub idempotency_scope: IdempotencyScope,
    pub earning_domain: EarningDomain,
    pub status: RuleStatus,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
}

impl NewRewardRule {
    pub fn new(
        program_id: i64,
        name: &str,
        trigger: EventType,
        formula: PointsFormula,
        conflict: ConflictSettings,
        earning_domain: &str,
    ) -> Self {
        Self {
            program_id,
            name: name.to_string(),
            trigger,
            scope: RuleScope::default(),
            eligibility: Eligibility::default(),
            points_formula: formula,
            limits: RuleLimits::default(),
            conflict,
            idempotency_scope: IdempotencyScope::default(),
            earning_domain: EarningDomain::from(earning_domain),
            status: RuleStatus::Active,
            active_from: None,
            active_to: None,
        }
    }

    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_eligibility(mut self, eligibility: Eligibility) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn with_limits(mut self, limits: RuleLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_idempotency_scope(mut self, scope: IdempotencyScope) -> Self {
        self.idempotency_scope = scope;
        self
    }

    pub fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }
}
