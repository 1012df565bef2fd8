use chrono::{DateTime, Utc};
use loyalty_common::Points;
use serde::{Deserialize, Serialize};

use super::text_enum;

text_enum! {
    MembershipStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

text_enum! {
    EnrollmentStatus {
        Active => "ACTIVE",
        Paused => "PAUSED",
        Ended => "ENDED",
    }
}

//--------------------------------------  CustomerMembership   ---------------------------------------------------------
/// A customer's membership of a tenant's loyalty scheme.
///
/// `points` is a cached projection of the ledger. It is only ever written by the balance projection service. The
/// activity counters only move through the repository's `record_visit` and `record_purchase` transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerMembership {
    pub id: i64,
    pub user_id: i64,
    pub tenant_id: i64,
    pub points: Points,
    pub tier_id: Option<i64>,
    pub total_spent: f64,
    pub total_visits: i64,
    pub last_visit: Option<DateTime<Utc>>,
    pub joined_date: DateTime<Utc>,
    pub qr_code: Option<String>,
    pub status: MembershipStatus,
    pub updated_at: DateTime<Utc>,
}

impl CustomerMembership {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }

    pub fn age_in_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.joined_date).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMembership {
    pub user_id: i64,
    pub tenant_id: i64,
    pub tier_id: Option<i64>,
    pub joined_date: DateTime<Utc>,
    pub qr_code: Option<String>,
    pub status: MembershipStatus,
}

impl NewMembership {
    pub fn new(user_id: i64, tenant_id: i64) -> Self {
        Self {
            user_id,
            tenant_id,
            tier_id: None,
            joined_date: Utc::now(),
            qr_code: None,
            status: MembershipStatus::Active,
        }
    }

    pub fn with_tier(mut self, tier_id: i64) -> Self {
        self.tier_id = Some(tier_id);
        self
    }

    pub fn with_qr_code<S: Into<String>>(mut self, qr_code: S) -> Self {
        self.qr_code = Some(qr_code.into());
        self
    }

    pub fn with_joined_date(mut self, joined_date: DateTime<Utc>) -> Self {
        self.joined_date = joined_date;
        self
    }

    pub fn with_status(mut self, status: MembershipStatus) -> Self {
        self.status = status;
        self
    }
}

//--------------------------------------      Enrollment       ---------------------------------------------------------
/// Links a membership to a program it may earn under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub membership_id: i64,
    pub program_id: i64,
    pub status: EnrollmentStatus,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == EnrollmentStatus::Active &&
            self.effective_from <= now &&
            self.effective_to.map(|to| now <= to).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEnrollment {
    pub membership_id: i64,
    pub program_id: i64,
    pub status: EnrollmentStatus,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
}

impl NewEnrollment {
    pub fn new(membership_id: i64, program_id: i64) -> Self {
        Self {
            membership_id,
            program_id,
            status: EnrollmentStatus::Active,
            effective_from: Utc::now() - chrono::Duration::days(1),
            effective_to: None,
        }
    }

    pub fn with_status(mut self, status: EnrollmentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_window(mut self, from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> Self {
        self.effective_from = from;
        self.effective_to = to;
        self
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    fn membership() -> CustomerMembership {
        let now = Utc::now();
        CustomerMembership {
            id: 1,
            user_id: 10,
            tenant_id: 1,
            points: Points::zero(),
            tier_id: None,
            total_spent: 0.0,
            total_visits: 0,
            last_visit: None,
            joined_date: now - Duration::days(40),
            qr_code: None,
            status: MembershipStatus::Active,
            updated_at: now,
        }
    }

    #[test]
    fn membership_age() {
        let m = membership();
        assert_eq!(m.age_in_days(Utc::now()), 40);
        assert!(m.is_active());
    }

    #[test]
    fn enrollment_window() {
        let now = Utc::now();
        let mut e = Enrollment {
            id: 1,
            membership_id: 1,
            program_id: 1,
            status: EnrollmentStatus::Active,
            effective_from: now - Duration::days(2),
            effective_to: Some(now - Duration::days(1)),
        };
        assert!(!e.is_effective(now));
        e.effective_to = None;
        assert!(e.is_effective(now));
        e.status = EnrollmentStatus::Paused;
        assert!(!e.is_effective(now));
    }
}
