//! Loyalty Engine
//!
//! The loyalty engine is the rules-and-ledger core of a multi-tenant loyalty platform. Tenants configure programs,
//! reward rules, tiers and rewards; the engine turns customer activity events into points, and keeps an append-only
//! ledger of every movement of those points.
//!
//! The library is divided into the following sections:
//! 1. The storage traits ([`mod@traits`]) and the data types they exchange ([`mod@db_types`]). SQLite is the shipped
//!    backend ([`SqliteDatabase`]), but every API is generic over the traits it needs, so any backend that implements
//!    them will do.
//! 2. The public API ([`mod@loyalty_api`]). The event pipeline lives here, along with the balance, expiration,
//!    retention, redemption, adjustment and referral services.
//! 3. Engine events ([`mod@events`]). The engine publishes an event whenever points are awarded, redeemed or expired,
//!    and hosts can subscribe to these with the hooks in that module.
//!
//! Runtime settings are read from the environment into an [`EngineConfig`].
pub mod config;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod loyalty_api;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(all(feature = "sqlite", any(feature = "test_utils", test)))]
pub mod test_utils;

pub use config::EngineConfig;
pub use events::{EventHandlers, EventHooks, EventProducers};
pub use loyalty_api::{
    adjustment_api::{AdjustmentApi, CorrectionResult},
    balance_api::BalanceApi,
    errors::{
        AdjustmentError,
        BalanceError,
        ExpirationError,
        MembershipResolutionError,
        NormalizationError,
        ProcessEventError,
        RedemptionError,
        ReferralServiceError,
        RetentionError,
    },
    event_api::LoyaltyEventApi,
    event_objects::{ProcessEventResult, RuleEvaluation, SkipReason},
    expiration_api::ExpirationApi,
    redemption_api::{RedemptionApi, RedemptionResult, ValidatedRedemption},
    referral_api::ReferralApi,
    retention_api::{RetentionApi, RetentionWindow},
    tier_policy::ThresholdTierPolicy,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    LedgerManagement,
    LoyaltyDatabase,
    MembershipManagement,
    ProgramManagement,
    ReferralManagement,
    RewardManagement,
    TenantManagement,
    TierChangeService,
};
