//! # Loyalty worker
//!
//! The loyalty engine library owns no scheduler. This crate runs its batch operations on a timer:
//! * point expiry ([`loyalty_engine::ExpirationApi`]),
//! * retention streak evaluation ([`loyalty_engine::RetentionApi`]),
//! * cached balance repair ([`loyalty_engine::BalanceApi`]).
//!
//! ## Configuration
//! The worker is configured via environment variables. See [config](config/index.html) for more information.
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod worker;
