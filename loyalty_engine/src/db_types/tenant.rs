use loyalty_common::Points;
use serde::{Deserialize, Serialize};

use super::text_enum;

pub const DEFAULT_MIN_POINTS_TO_REDEEM: i64 = 100;
pub const DEFAULT_REDEMPTION_CODE_TTL_MINUTES: i64 = 15;

text_enum! {
    TenantStatus {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
    }
}

text_enum! {
    TierStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

//--------------------------------------        Tenant         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub status: TenantStatus,
    /// Default expiry for points earned outside an expiring program. Zero or less means points never expire.
    pub points_expire_days: i64,
    pub min_points_to_redeem: Points,
    pub redemption_code_ttl_minutes: i64,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub status: TenantStatus,
    pub points_expire_days: i64,
    pub min_points_to_redeem: Points,
    pub redemption_code_ttl_minutes: i64,
}

impl NewTenant {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TenantStatus::Active,
            points_expire_days: 0,
            min_points_to_redeem: Points::from(DEFAULT_MIN_POINTS_TO_REDEEM),
            redemption_code_ttl_minutes: DEFAULT_REDEMPTION_CODE_TTL_MINUTES,
        }
    }

    pub fn with_points_expire_days(mut self, days: i64) -> Self {
        self.points_expire_days = days;
        self
    }

    pub fn with_min_points_to_redeem(mut self, points: i64) -> Self {
        self.min_points_to_redeem = Points::from(points);
        self
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }
}

//--------------------------------------     CustomerTier      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerTier {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub min_points: Points,
    pub max_points: Option<Points>,
    pub multiplier: Option<f64>,
    /// Higher priority means a more senior tier.
    pub priority: i32,
    pub status: TierStatus,
}

impl CustomerTier {
    pub fn is_active(&self) -> bool {
        self.status == TierStatus::Active
    }

    pub fn contains(&self, points: Points) -> bool {
        points >= self.min_points && self.max_points.map(|max| points <= max).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomerTier {
    pub tenant_id: i64,
    pub name: String,
    pub min_points: Points,
    pub max_points: Option<Points>,
    pub multiplier: Option<f64>,
    pub priority: i32,
}

impl NewCustomerTier {
    pub fn new(tenant_id: i64, name: &str, min_points: i64, max_points: Option<i64>, priority: i32) -> Self {
        Self {
            tenant_id,
            name: name.to_string(),
            min_points: Points::from(min_points),
            max_points: max_points.map(Points::from),
            multiplier: None,
            priority,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }
}

//--------------------------------------      TierBenefit      ---------------------------------------------------------
/// A per-program override of the points multiplier for members of a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierBenefit {
    pub id: i64,
    pub program_id: i64,
    pub tier_id: i64,
    pub points_multiplier: f64,
    pub status: TierStatus,
}

impl TierBenefit {
    pub fn is_active(&self) -> bool {
        self.status == TierStatus::Active && self.points_multiplier > 0.0
    }

    pub fn apply_multiplier(&self, points: Points) -> Points {
        Points::from((points.as_f64() * self.points_multiplier).round() as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTierBenefit {
    pub program_id: i64,
    pub tier_id: i64,
    pub points_multiplier: f64,
    pub status: TierStatus,
}

impl NewTierBenefit {
    pub fn new(program_id: i64, tier_id: i64, points_multiplier: f64) -> Self {
        Self { program_id, tier_id, points_multiplier, status: TierStatus::Active }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tier_bounds_are_inclusive() {
        let tier = CustomerTier {
            id: 1,
            tenant_id: 1,
            name: "Gold".into(),
            min_points: Points::from(500),
            max_points: Some(Points::from(999)),
            multiplier: Some(1.25),
            priority: 2,
            status: TierStatus::Active,
        };
        assert!(tier.contains(Points::from(500)));
        assert!(tier.contains(Points::from(999)));
        assert!(!tier.contains(Points::from(1000)));
        assert!(!tier.contains(Points::from(499)));
    }

    #[test]
    fn benefit_multiplier_rounds_to_nearest() {
        let benefit =
            TierBenefit { id: 1, program_id: 1, tier_id: 1, points_multiplier: 1.5, status: TierStatus::Active };
        assert_eq!(benefit.apply_multiplier(Points::from(15)), Points::from(23));
        let disabled = TierBenefit { points_multiplier: 0.0, ..benefit };
        assert!(!disabled.is_active());
    }
}
