use thiserror::Error;

use crate::db_types::{CustomerTier, Tenant, TierBenefit};

#[derive(Debug, Clone, Error)]
pub enum TenantError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Stored tenant record is invalid: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for TenantError {
    fn from(e: sqlx::Error) -> Self {
        TenantError::DatabaseError(e.to_string())
    }
}

/// Read access to tenants, customer tiers and tier benefits.
#[allow(async_fn_in_trait)]
pub trait TenantManagement {
    async fn fetch_tenant(&self, tenant_id: i64) -> Result<Option<Tenant>, TenantError>;

    async fn fetch_active_tenants(&self) -> Result<Vec<Tenant>, TenantError>;

    async fn fetch_tier(&self, tier_id: i64) -> Result<Option<CustomerTier>, TenantError>;

    async fn fetch_tiers_for_tenant(&self, tenant_id: i64) -> Result<Vec<CustomerTier>, TenantError>;

    async fn fetch_tier_benefit(&self, program_id: i64, tier_id: i64) -> Result<Option<TierBenefit>, TenantError>;
}
