use thiserror::Error;

use crate::{
    db_types::{ReferralStateError, TransactionValidationError},
    traits::{LedgerError, MembershipError, ProgramError, ReferralError, RewardError, TenantError},
};

macro_rules! database_error_from {
    ($target:ident: $($source:ty),+) => {
        $(
            impl From<$source> for $target {
                fn from(e: $source) -> Self {
                    Self::DatabaseError(e.to_string())
                }
            }
        )+
    };
}

/// A malformed inbound event. `field` names the first field that failed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid event field '{field}': {message}")]
pub struct NormalizationError {
    pub field: String,
    pub message: String,
}

impl NormalizationError {
    pub fn new<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MembershipResolutionError {
    #[error("The membership reference does not contain a usable lookup path")]
    InvalidReference,
    #[error("No membership matches {0}")]
    NotFound(String),
    #[error("Membership {0} is not active")]
    Inactive(i64),
    #[error("Database error: {0}")]
    DatabaseError(#[from] MembershipError),
}

/// The only failures that make an event entirely unprocessable. Everything else ends up in the skip list.
#[derive(Debug, Clone, Error)]
pub enum ProcessEventError {
    #[error("{0}")]
    Normalization(#[from] NormalizationError),
    #[error("{0}")]
    Membership(#[from] MembershipResolutionError),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

database_error_from!(ProcessEventError: ProgramError, TenantError, LedgerError, MembershipError, BalanceError);

#[derive(Debug, Clone, Error)]
pub enum BalanceError {
    #[error("Membership {0} does not exist")]
    MembershipNotFound(i64),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

database_error_from!(BalanceError: LedgerError, MembershipError);

#[derive(Debug, Clone, Error)]
pub enum ReferralServiceError {
    #[error("A membership cannot refer itself")]
    SelfReferral,
    #[error("Membership {0} does not exist")]
    MembershipNotFound(i64),
    #[error("Membership {membership_id} does not belong to tenant {tenant_id}")]
    TenantMismatch { membership_id: i64, tenant_id: i64 },
    #[error("An active referral already exists between memberships {0} and {1}")]
    DuplicateReferral(i64, i64),
    #[error("Membership {0} has reached the monthly limit of {1} referrals")]
    MonthlyCapReached(i64, i64),
    #[error("Membership {0} was referred within the last {1} hours")]
    CooldownActive(i64, i64),
    #[error("Referral {0} does not exist")]
    ReferralNotFound(i64),
    #[error("{0}")]
    InvalidState(#[from] ReferralStateError),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

database_error_from!(ReferralServiceError: ReferralError, MembershipError);

#[derive(Debug, Clone, Error)]
pub enum RedemptionError {
    #[error("Reward {0} does not exist")]
    RewardNotFound(i64),
    #[error("Membership {0} does not exist")]
    MembershipNotFound(i64),
    #[error("Tenant {0} does not exist")]
    TenantNotFound(i64),
    #[error("Reward {reward_id} does not belong to the tenant of membership {membership_id}")]
    TenantMismatch { membership_id: i64, reward_id: i64 },
    #[error("Membership {0} is not active")]
    MembershipInactive(i64),
    #[error("Reward {0} is not available")]
    RewardUnavailable(i64),
    #[error("Rewards must cost at least {minimum} points, but this one costs {cost}")]
    BelowMinimumRedeem { minimum: i64, cost: i64 },
    #[error("Insufficient balance. {required} points are required but only {available} are available")]
    InsufficientBalance { required: i64, available: i64 },
    #[error("Membership {membership_id} has reached the redemption limit of {limit} for reward {reward_id}")]
    RedemptionLimitReached { membership_id: i64, reward_id: i64, limit: i64 },
    #[error("The redemption was already recorded in ledger row #{0}")]
    DuplicateRedemption(i64),
    #[error("Could not generate a unique redemption code after {0} attempts")]
    CodeGenerationFailed(u32),
    #[error("Redemption code {0} does not exist")]
    CodeNotFound(String),
    #[error("Redemption code {0} has expired")]
    CodeExpired(String),
    #[error("Redemption code {0} has already been used")]
    CodeAlreadyUsed(String),
    #[error("Redemption code {0} has been cancelled")]
    CodeCancelled(String),
    #[error("Invalid ledger transaction. {0}")]
    InvalidTransaction(#[from] TransactionValidationError),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

database_error_from!(
    RedemptionError: RewardError,
    MembershipError,
    LedgerError,
    TenantError,
    ProgramError,
    BalanceError
);

#[derive(Debug, Clone, Error)]
pub enum ExpirationError {
    #[error("Invalid ledger transaction. {0}")]
    InvalidTransaction(#[from] TransactionValidationError),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

database_error_from!(ExpirationError: LedgerError, MembershipError, ProgramError, TenantError, BalanceError);

#[derive(Debug, Clone, Error)]
pub enum AdjustmentError {
    #[error("Manual corrections must name a user, not {0}")]
    SystemActorNotAllowed(String),
    #[error("A reason code is required")]
    MissingReasonCode,
    #[error("Adjustments must change the balance")]
    ZeroDelta,
    #[error("Membership {0} does not exist")]
    MembershipNotFound(i64),
    #[error("Ledger transaction {0} does not exist")]
    TransactionNotFound(i64),
    #[error("Adjustment would leave the balance at {0} points")]
    NegativeBalance(i64),
    #[error("{0} transactions cannot be reversed")]
    NotReversible(String),
    #[error("Ledger transaction {0} has already been reversed")]
    AlreadyReversed(i64),
    #[error("Invalid ledger transaction. {0}")]
    InvalidTransaction(#[from] TransactionValidationError),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

database_error_from!(AdjustmentError: LedgerError, MembershipError, BalanceError, RewardError);

#[derive(Debug, Clone, Error)]
pub enum RetentionError {
    #[error("Could not process the streak event. {0}")]
    Pipeline(#[from] ProcessEventError),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

database_error_from!(RetentionError: LedgerError, MembershipError, ProgramError, TenantError);
