use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{Enrollment, EventType, LoyaltyProgram, ProgramType, RewardRule};

#[derive(Debug, Clone, Error)]
pub enum ProgramError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Stored program configuration is invalid: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for ProgramError {
    fn from(e: sqlx::Error) -> Self {
        ProgramError::DatabaseError(e.to_string())
    }
}

/// Read access to programs, enrollments and reward rules. Program and rule configuration is read-only to the engine.
#[allow(async_fn_in_trait)]
pub trait ProgramManagement {
    async fn fetch_program(&self, program_id: i64) -> Result<Option<LoyaltyProgram>, ProgramError>;

    async fn fetch_programs(&self, program_ids: &[i64]) -> Result<Vec<LoyaltyProgram>, ProgramError>;

    /// Fetches the tenant's programs, optionally restricted to one program type.
    async fn fetch_programs_for_tenant(
        &self,
        tenant_id: i64,
        program_type: Option<ProgramType>,
    ) -> Result<Vec<LoyaltyProgram>, ProgramError>;

    /// Fetches the enrollments of the membership that are active and effective at `now`.
    async fn fetch_active_enrollments(
        &self,
        membership_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Enrollment>, ProgramError>;

    async fn fetch_rule(&self, rule_id: i64) -> Result<Option<RewardRule>, ProgramError>;

    async fn fetch_rules(&self, rule_ids: &[i64]) -> Result<Vec<RewardRule>, ProgramError>;

    /// Fetches the rules with `active` status for the program that fire on the given trigger.
    async fn fetch_rules_for_trigger(&self, program_id: i64, trigger: EventType)
        -> Result<Vec<RewardRule>, ProgramError>;

    /// Batch variant of [`Self::fetch_rules_for_trigger`] covering several programs in one query.
    async fn fetch_rules_for_programs(
        &self,
        program_ids: &[i64],
        trigger: EventType,
    ) -> Result<Vec<RewardRule>, ProgramError>;

    /// Fetches the active rules firing on `trigger` across all of the tenant's programs that are active at `now`.
    async fn fetch_tenant_rules_for_trigger(
        &self,
        tenant_id: i64,
        trigger: EventType,
        now: DateTime<Utc>,
    ) -> Result<Vec<RewardRule>, ProgramError>;
}
