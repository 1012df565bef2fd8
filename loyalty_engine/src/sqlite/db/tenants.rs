use loyalty_common::Points;
use sqlx::{FromRow, SqliteConnection};

use super::parse_text;
use crate::{
    db_types::{CustomerTier, NewCustomerTier, NewTenant, NewTierBenefit, Tenant, TierBenefit},
    traits::TenantError,
};

#[derive(FromRow)]
struct TenantRow {
    id: i64,
    name: String,
    status: String,
    points_expire_days: i64,
    min_points_to_redeem: i64,
    redemption_code_ttl_minutes: i64,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = TenantError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let status =
            parse_text(&row.status).map_err(|e| TenantError::InvalidRecord(format!("tenant #{}: {e}", row.id)))?;
        Ok(Tenant {
            id: row.id,
            name: row.name,
            status,
            points_expire_days: row.points_expire_days,
            min_points_to_redeem: Points::from(row.min_points_to_redeem),
            redemption_code_ttl_minutes: row.redemption_code_ttl_minutes,
        })
    }
}

#[derive(FromRow)]
struct TierRow {
    id: i64,
    tenant_id: i64,
    name: String,
    min_points: i64,
    max_points: Option<i64>,
    multiplier: Option<f64>,
    priority: i32,
    status: String,
}

impl TryFrom<TierRow> for CustomerTier {
    type Error = TenantError;

    fn try_from(row: TierRow) -> Result<Self, Self::Error> {
        let status =
            parse_text(&row.status).map_err(|e| TenantError::InvalidRecord(format!("tier #{}: {e}", row.id)))?;
        Ok(CustomerTier {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            min_points: Points::from(row.min_points),
            max_points: row.max_points.map(Points::from),
            multiplier: row.multiplier,
            priority: row.priority,
            status,
        })
    }
}

#[derive(FromRow)]
struct TierBenefitRow {
    id: i64,
    program_id: i64,
    tier_id: i64,
    points_multiplier: f64,
    status: String,
}

impl TryFrom<TierBenefitRow> for TierBenefit {
    type Error = TenantError;

    fn try_from(row: TierBenefitRow) -> Result<Self, Self::Error> {
        let status =
            parse_text(&row.status).map_err(|e| TenantError::InvalidRecord(format!("tier benefit #{}: {e}", row.id)))?;
        Ok(TierBenefit {
            id: row.id,
            program_id: row.program_id,
            tier_id: row.tier_id,
            points_multiplier: row.points_multiplier,
            status,
        })
    }
}

pub async fn insert_tenant(tenant: NewTenant, conn: &mut SqliteConnection) -> Result<Tenant, TenantError> {
    let row: TenantRow = sqlx::query_as(
        r#"
            INSERT INTO tenants (name, status, points_expire_days, min_points_to_redeem, redemption_code_ttl_minutes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(tenant.name)
    .bind(tenant.status.as_str())
    .bind(tenant.points_expire_days)
    .bind(tenant.min_points_to_redeem)
    .bind(tenant.redemption_code_ttl_minutes)
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_tenant(id: i64, conn: &mut SqliteConnection) -> Result<Option<Tenant>, TenantError> {
    let row: Option<TenantRow> =
        sqlx::query_as("SELECT * FROM tenants WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(Tenant::try_from).transpose()
}

pub async fn fetch_active_tenants(conn: &mut SqliteConnection) -> Result<Vec<Tenant>, TenantError> {
    let rows: Vec<TenantRow> =
        sqlx::query_as("SELECT * FROM tenants WHERE status = 'active' ORDER BY id").fetch_all(conn).await?;
    rows.into_iter().map(Tenant::try_from).collect()
}

pub async fn insert_tier(tier: NewCustomerTier, conn: &mut SqliteConnection) -> Result<CustomerTier, TenantError> {
    let row: TierRow = sqlx::query_as(
        r#"
            INSERT INTO customer_tiers (tenant_id, name, min_points, max_points, multiplier, priority)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(tier.tenant_id)
    .bind(tier.name)
    .bind(tier.min_points)
    .bind(tier.max_points)
    .bind(tier.multiplier)
    .bind(tier.priority)
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_tier(id: i64, conn: &mut SqliteConnection) -> Result<Option<CustomerTier>, TenantError> {
    let row: Option<TierRow> =
        sqlx::query_as("SELECT * FROM customer_tiers WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(CustomerTier::try_from).transpose()
}

pub async fn fetch_tiers_for_tenant(
    tenant_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<CustomerTier>, TenantError> {
    let rows: Vec<TierRow> =
        sqlx::query_as("SELECT * FROM customer_tiers WHERE tenant_id = $1 ORDER BY priority DESC, id")
            .bind(tenant_id)
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(CustomerTier::try_from).collect()
}

pub async fn insert_tier_benefit(
    benefit: NewTierBenefit,
    conn: &mut SqliteConnection,
) -> Result<TierBenefit, TenantError> {
    let row: TierBenefitRow = sqlx::query_as(
        r#"
            INSERT INTO tier_benefits (program_id, tier_id, points_multiplier, status)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(benefit.program_id)
    .bind(benefit.tier_id)
    .bind(benefit.points_multiplier)
    .bind(benefit.status.as_str())
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_tier_benefit(
    program_id: i64,
    tier_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<TierBenefit>, TenantError> {
    let row: Option<TierBenefitRow> =
        sqlx::query_as("SELECT * FROM tier_benefits WHERE program_id = $1 AND tier_id = $2")
            .bind(program_id)
            .bind(tier_id)
            .fetch_optional(conn)
            .await?;
    row.map(TierBenefit::try_from).transpose()
}
