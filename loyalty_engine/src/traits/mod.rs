//! # Backend contracts
//!
//! This module defines the interfaces a persistence backend must implement to host the loyalty engine. The engine
//! itself only ever talks to these traits; the concrete backend is chosen when the API objects are constructed.
//!
//! ## The ledger
//! The points ledger is append-only. Every row carries a globally unique idempotency key, and inserting a row whose
//! key already exists is not an error: [`LedgerManagement::insert_transaction`] reports the existing row through
//! [`InsertTransactionResult::AlreadyExists`]. This is the engine's concurrency-safety mechanism; there is no
//! in-process locking.
//!
//! ## Traits
//! * [`LoyaltyDatabase`] ties all the repository traits together and adds connection-level behaviour.
//! * [`MembershipManagement`] looks up and saves memberships, and owns the single writer of the cached balance.
//! * [`ProgramManagement`] reads programs, enrollments and reward rules.
//! * [`LedgerManagement`] reads and appends ledger rows and computes balances.
//! * [`TenantManagement`] reads tenants, tiers and tier benefits.
//! * [`ReferralManagement`] stores referrals.
//! * [`RewardManagement`] stores rewards and redemption codes.
//! * [`TierChangeService`] is the external tier re-evaluation collaborator.
mod data_objects;
mod ledger_management;
mod loyalty_database;
mod membership_management;
mod program_management;
mod referral_management;
mod reward_management;
mod tenant_management;
mod tier_change;

pub use data_objects::{InsertCodeResult, InsertTransactionResult, NewRedemption, RedemptionOutcome};
pub use ledger_management::{LedgerError, LedgerManagement};
pub use loyalty_database::LoyaltyDatabase;
pub use membership_management::{MembershipError, MembershipManagement};
pub use program_management::{ProgramError, ProgramManagement};
pub use referral_management::{ReferralError, ReferralManagement};
pub use reward_management::{RewardError, RewardManagement};
pub use tenant_management::{TenantError, TenantManagement};
pub use tier_change::{TierChangeError, TierChangeResult, TierChangeService};
