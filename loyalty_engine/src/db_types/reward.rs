use chrono::{DateTime, Utc};
use loyalty_common::Points;
use serde::{Deserialize, Serialize};

use super::text_enum;

/// Stock value meaning "never runs out".
pub const UNLIMITED_STOCK: i64 = -1;

text_enum! {
    RewardStatus {
        Active => "active",
        Inactive => "inactive",
        Draft => "draft",
        Expired => "expired",
    }
}

text_enum! {
    RedemptionCodeStatus {
        Pending => "pending",
        Used => "used",
        Expired => "expired",
        Cancelled => "cancelled",
    }
}

//--------------------------------------        Reward         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub category: Option<String>,
    pub points_required: Points,
    pub stock: i64,
    pub max_redemptions_per_user: Option<i64>,
    pub status: RewardStatus,
    pub valid_until: Option<DateTime<Utc>>,
}

impl Reward {
    pub fn has_unlimited_stock(&self) -> bool {
        self.stock == UNLIMITED_STOCK
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.status == RewardStatus::Active &&
            (self.has_unlimited_stock() || self.stock > 0) &&
            self.valid_until.map(|until| now <= until).unwrap_or(true)
    }

    /// Whether a member that has already redeemed this reward `previous` times may redeem it again.
    pub fn can_redeem(&self, previous: i64) -> bool {
        self.max_redemptions_per_user.map(|max| previous < max).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReward {
    pub tenant_id: i64,
    pub name: String,
    pub category: Option<String>,
    pub points_required: Points,
    pub stock: i64,
    pub max_redemptions_per_user: Option<i64>,
    pub status: RewardStatus,
    pub valid_until: Option<DateTime<Utc>>,
}

impl NewReward {
    pub fn new(tenant_id: i64, name: &str, points_required: i64) -> Self {
        Self {
            tenant_id,
            name: name.to_string(),
            category: None,
            points_required: Points::from(points_required),
            stock: UNLIMITED_STOCK,
            max_redemptions_per_user: None,
            status: RewardStatus::Active,
            valid_until: None,
        }
    }

    pub fn with_stock(mut self, stock: i64) -> Self {
        self.stock = stock;
        self
    }

    pub fn with_max_redemptions_per_user(mut self, max: i64) -> Self {
        self.max_redemptions_per_user = Some(max);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
}

//--------------------------------------    RedemptionCode     ---------------------------------------------------------
/// The voucher handed to a member when they redeem a reward. One per REDEEM ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionCode {
    pub id: i64,
    pub code: String,
    pub transaction_id: i64,
    pub reward_id: i64,
    pub membership_id: i64,
    pub tenant_id: i64,
    pub status: RedemptionCodeStatus,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl RedemptionCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRedemptionCode {
    pub code: String,
    pub transaction_id: i64,
    pub reward_id: i64,
    pub membership_id: i64,
    pub tenant_id: i64,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    #[test]
    fn availability() {
        let now = Utc::now();
        let mut reward = Reward {
            id: 1,
            tenant_id: 1,
            name: "Coffee".into(),
            category: None,
            points_required: Points::from(100),
            stock: UNLIMITED_STOCK,
            max_redemptions_per_user: Some(2),
            status: RewardStatus::Active,
            valid_until: None,
        };
        assert!(reward.is_available(now));
        reward.stock = 0;
        assert!(!reward.is_available(now));
        reward.stock = 3;
        reward.valid_until = Some(now - Duration::days(1));
        assert!(!reward.is_available(now));
        assert!(reward.can_redeem(1));
        assert!(!reward.can_redeem(2));
    }
}
