use std::fmt::Display;

use chrono::{DateTime, Utc};
use loyalty_common::Points;
use serde::{Deserialize, Serialize};

use super::text_enum;

text_enum! {
    ProgramType {
        Base => "BASE",
        Promo => "PROMO",
        Partner => "PARTNER",
        Subscription => "SUBSCRIPTION",
        Experimental => "EXPERIMENTAL",
    }
}

text_enum! {
    ProgramStatus {
        Active => "active",
        Inactive => "inactive",
        Draft => "draft",
    }
}

text_enum! {
    ExpirationPolicyType {
        /// One aggregate expiration row per membership, program and month.
        Simple => "simple",
        /// One expiration row per expired earning row, oldest first.
        Bucketed => "bucketed",
    }
}

//--------------------------------------     EarningDomain     ---------------------------------------------------------
pub const BASE_PURCHASE: &str = "BASE_PURCHASE";
pub const BASE_VISIT: &str = "BASE_VISIT";
pub const BASE_SUBSCRIPTION: &str = "BASE_SUBSCRIPTION";
pub const BASE_RETENTION: &str = "BASE_RETENTION";
pub const BASE_REFERRAL: &str = "BASE_REFERRAL";
pub const BONUS_CATEGORY: &str = "BONUS_CATEGORY";
pub const BONUS_SKU: &str = "BONUS_SKU";

/// The domains whose double-granting the compatibility resolver guards against.
pub const CONFLICTING_BASE_DOMAINS: [&str; 3] = [BASE_PURCHASE, BASE_VISIT, BASE_SUBSCRIPTION];

/// A tag classifying the kind of value a rule grants, e.g. `BASE_PURCHASE` or `BONUS_CATEGORY`.
///
/// Tenants may define their own domains, so this is an open set of names rather than an enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EarningDomain(String);

impl EarningDomain {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is(&self, name: &str) -> bool {
        self.0 == name
    }

    /// Whether this is a base domain that at most one selected program may earn under.
    pub fn is_conflicting_base(&self) -> bool {
        CONFLICTING_BASE_DOMAINS.contains(&self.0.as_str())
    }
}

impl From<&str> for EarningDomain {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for EarningDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------    Program policies   ---------------------------------------------------------
/// How a program declares it may combine with others.
///
/// The compatibility resolver applies fixed per-type rules, so `max_programs_per_event` is descriptive only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackingPolicy {
    pub allowed: bool,
    pub max_programs_per_event: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationPolicy {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub policy_type: ExpirationPolicyType,
    pub days_to_expire: Option<i64>,
    pub grace_period_days: Option<i64>,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            policy_type: ExpirationPolicyType::Simple,
            days_to_expire: None,
            grace_period_days: None,
        }
    }
}

impl ExpirationPolicy {
    pub fn simple(days_to_expire: i64) -> Self {
        Self { enabled: true, days_to_expire: Some(days_to_expire), ..Default::default() }
    }

    pub fn bucketed(days_to_expire: i64) -> Self {
        Self {
            enabled: true,
            policy_type: ExpirationPolicyType::Bucketed,
            days_to_expire: Some(days_to_expire),
            grace_period_days: None,
        }
    }

    pub fn with_grace_period(mut self, days: i64) -> Self {
        self.grace_period_days = Some(days);
        self
    }
}

//--------------------------------------     LoyaltyProgram    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyProgram {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub program_type: ProgramType,
    pub earning_domains: Vec<EarningDomain>,
    pub priority_rank: i32,
    pub stacking: StackingPolicy,
    pub expiration_policy: ExpirationPolicy,
    pub currency: Option<String>,
    pub min_points_to_redeem: Points,
    pub status: ProgramStatus,
    pub version: i32,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
}

impl LoyaltyProgram {
    /// A program is active when its status is `active` and `now` falls inside its optional activity window.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ProgramStatus::Active &&
            self.active_from.map(|from| from <= now).unwrap_or(true) &&
            self.active_to.map(|to| now <= to).unwrap_or(true)
    }

    pub fn has_earning_domain(&self, domain: &str) -> bool {
        self.earning_domains.iter().any(|d| d.is(domain))
    }

    pub fn conflicting_base_domains(&self) -> impl Iterator<Item = &EarningDomain> {
        self.earning_domains.iter().filter(|d| d.is_conflicting_base())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoyaltyProgram {
    pub tenant_id: i64,
    pub name: String,
    pub program_type: ProgramType,
    pub earning_domains: Vec<EarningDomain>,
    pub priority_rank: i32,
    pub stacking: StackingPolicy,
    pub expiration_policy: ExpirationPolicy,
    pub currency: Option<String>,
    pub min_points_to_redeem: Points,
    pub status: ProgramStatus,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
}

impl NewLoyaltyProgram {
    pub fn new(tenant_id: i64, name: &str, program_type: ProgramType, domains: &[&str], priority_rank: i32) -> Self {
        Self {
            tenant_id,
            name: name.to_string(),
            program_type,
            earning_domains: domains.iter().map(|d| EarningDomain::from(*d)).collect(),
            priority_rank,
            stacking: StackingPolicy::default(),
            expiration_policy: ExpirationPolicy::default(),
            currency: None,
            min_points_to_redeem: Points::zero(),
            status: ProgramStatus::Active,
            active_from: None,
            active_to: None,
        }
    }

    pub fn with_expiration_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.expiration_policy = policy;
        self
    }

    pub fn with_min_points_to_redeem(mut self, points: i64) -> Self {
        self.min_points_to_redeem = Points::from(points);
        self
    }

    pub fn with_status(mut self, status: ProgramStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_window(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.active_from = from;
        self.active_to = to;
        self
    }
}
