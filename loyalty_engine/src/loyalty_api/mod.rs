//! # Loyalty engine public API
//!
//! The `loyalty_api` module exposes the programmatic API for the loyalty engine. Like the storage traits it is built
//! on, the API is modular: a host that only needs balances does not have to construct the event pipeline.
//!
//! * [`event_api`] is the primary API. It takes raw activity events through normalization, membership resolution,
//!   rule evaluation, conflict resolution and ledger writes, and rewards referrers when a referred customer makes
//!   their first purchase.
//! * [`balance_api`] reads, synchronises and repairs the cached balance on each membership.
//! * [`expiration_api`] expires points whose expiry date has passed, one ledger row per expiry batch.
//! * [`retention_api`] detects activity streaks and feeds them back through the pipeline as RETENTION events.
//! * [`redemption_api`] spends points on rewards and issues and validates redemption codes.
//! * [`adjustment_api`] writes manual adjustments and reversals.
//! * [`referral_api`] creates and validates referrals and tracks their lifecycle.
//! * [`tier_policy`] is the default [`crate::traits::TierChangeService`].
//!
//! The other submodules are the pipeline stages and their support types.
//!
//! # API usage
//!
//! Every API is created from a database backend that implements the storage traits it needs. The event pipeline
//! also takes a tier service and the event producers it publishes to.
//!
//! ```rust,ignore
//! use loyalty_engine::{EngineConfig, EventProducers, LoyaltyEventApi, SqliteDatabase, ThresholdTierPolicy};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let config = EngineConfig::from_env_or_default();
//! let tiers = ThresholdTierPolicy::new(db.clone());
//! let api = LoyaltyEventApi::new(db, tiers, EventProducers::default(), &config);
//! let result = api.process_event(raw_event).await?;
//! println!("Awarded {} across {} transactions", result.total_points_awarded, result.transactions_created.len());
//! ```

pub mod adjustment_api;
pub mod balance_api;
pub mod compatibility;
pub mod conflict_resolver;
pub mod errors;
pub mod event_api;
pub mod event_normalizer;
pub mod event_objects;
pub mod expiration_api;
pub mod idempotency;
pub mod membership_resolver;
pub mod redemption_api;
pub mod referral_api;
pub mod retention_api;
pub mod rule_evaluator;
pub mod tier_policy;
