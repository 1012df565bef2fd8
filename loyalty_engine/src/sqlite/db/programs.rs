use loyalty_common::Points;
use sqlx::{types::Json, FromRow, QueryBuilder, Sqlite, SqliteConnection};

use super::{opt_from_millis, opt_millis, parse_text};
use crate::{
    db_types::{
        ConflictSettings,
        EarningDomain,
        Eligibility,
        EventType,
        ExpirationPolicy,
        IdempotencyScope,
        LoyaltyProgram,
        NewLoyaltyProgram,
        NewRewardRule,
        PointsFormula,
        ProgramType,
        RewardRule,
        RuleLimits,
        RuleScope,
        StackingPolicy,
    },
    traits::ProgramError,
};

#[derive(FromRow)]
struct ProgramRow {
    id: i64,
    tenant_id: i64,
    name: String,
    program_type: String,
    earning_domains: Json<Vec<EarningDomain>>,
    priority_rank: i32,
    stacking: Json<StackingPolicy>,
    expiration_policy: Json<ExpirationPolicy>,
    currency: Option<String>,
    min_points_to_redeem: i64,
    status: String,
    version: i32,
    active_from: Option<i64>,
    active_to: Option<i64>,
}

impl TryFrom<ProgramRow> for LoyaltyProgram {
    type Error = ProgramError;

    fn try_from(row: ProgramRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let convert = move || -> Result<LoyaltyProgram, String> {
            Ok(LoyaltyProgram {
                id: row.id,
                tenant_id: row.tenant_id,
                name: row.name,
                program_type: parse_text(&row.program_type)?,
                earning_domains: row.earning_domains.0,
                priority_rank: row.priority_rank,
                stacking: row.stacking.0,
                expiration_policy: row.expiration_policy.0,
                currency: row.currency,
                min_points_to_redeem: Points::from(row.min_points_to_redeem),
                status: parse_text(&row.status)?,
                version: row.version,
                active_from: opt_from_millis(row.active_from)?,
                active_to: opt_from_millis(row.active_to)?,
            })
        };
        convert().map_err(|e| ProgramError::InvalidRecord(format!("program #{id}: {e}")))
    }
}

#[derive(FromRow)]
struct RuleRow {
    id: i64,
    program_id: i64,
    name: String,
    trigger: String,
    scope: Json<RuleScope>,
    eligibility: Json<Eligibility>,
    points_formula: Json<PointsFormula>,
    limits: Json<RuleLimits>,
    conflict: Json<ConflictSettings>,
    idempotency_scope: Json<IdempotencyScope>,
    earning_domain: String,
    status: String,
    version: i32,
    active_from: Option<i64>,
    active_to: Option<i64>,
}

impl TryFrom<RuleRow> for RewardRule {
    type Error = ProgramError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let convert = move || -> Result<RewardRule, String> {
            Ok(RewardRule {
                id: row.id,
                program_id: row.program_id,
                name: row.name,
                trigger: parse_text(&row.trigger)?,
                scope: row.scope.0,
                eligibility: row.eligibility.0,
                points_formula: row.points_formula.0,
                limits: row.limits.0,
                conflict: row.conflict.0,
                idempotency_scope: row.idempotency_scope.0,
                earning_domain: EarningDomain::new(row.earning_domain),
                status: parse_text(&row.status)?,
                version: row.version,
                active_from: opt_from_millis(row.active_from)?,
                active_to: opt_from_millis(row.active_to)?,
            })
        };
        convert().map_err(|e| ProgramError::InvalidRecord(format!("reward rule #{id}: {e}")))
    }
}

fn programs_from_rows(rows: Vec<ProgramRow>) -> Result<Vec<LoyaltyProgram>, ProgramError> {
    rows.into_iter().map(LoyaltyProgram::try_from).collect()
}

fn rules_from_rows(rows: Vec<RuleRow>) -> Result<Vec<RewardRule>, ProgramError> {
    rows.into_iter().map(RewardRule::try_from).collect()
}

pub async fn insert_program(
    program: NewLoyaltyProgram,
    conn: &mut SqliteConnection,
) -> Result<LoyaltyProgram, ProgramError> {
    let row: ProgramRow = sqlx::query_as(
        r#"
            INSERT INTO loyalty_programs (
                tenant_id, name, program_type, earning_domains, priority_rank, stacking, expiration_policy, currency,
                min_points_to_redeem, status, active_from, active_to
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *;
        "#,
    )
    .bind(program.tenant_id)
    .bind(program.name)
    .bind(program.program_type.as_str())
    .bind(Json(program.earning_domains))
    .bind(program.priority_rank)
    .bind(Json(program.stacking))
    .bind(Json(program.expiration_policy))
    .bind(program.currency)
    .bind(program.min_points_to_redeem)
    .bind(program.status.as_str())
    .bind(opt_millis(program.active_from))
    .bind(opt_millis(program.active_to))
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_program(id: i64, conn: &mut SqliteConnection) -> Result<Option<LoyaltyProgram>, ProgramError> {
    let row: Option<ProgramRow> =
        sqlx::query_as("SELECT * FROM loyalty_programs WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(LoyaltyProgram::try_from).transpose()
}

pub async fn fetch_programs(ids: &[i64], conn: &mut SqliteConnection) -> Result<Vec<LoyaltyProgram>, ProgramError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM loyalty_programs WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY id");
    let rows: Vec<ProgramRow> = builder.build_query_as().fetch_all(conn).await?;
    programs_from_rows(rows)
}

pub async fn fetch_programs_for_tenant(
    tenant_id: i64,
    program_type: Option<ProgramType>,
    conn: &mut SqliteConnection,
) -> Result<Vec<LoyaltyProgram>, ProgramError> {
    let rows: Vec<ProgramRow> = match program_type {
        Some(t) => {
            sqlx::query_as("SELECT * FROM loyalty_programs WHERE tenant_id = $1 AND program_type = $2 ORDER BY id")
                .bind(tenant_id)
                .bind(t.as_str())
                .fetch_all(conn)
                .await?
        },
        None => {
            sqlx::query_as("SELECT * FROM loyalty_programs WHERE tenant_id = $1 ORDER BY id")
                .bind(tenant_id)
                .fetch_all(conn)
                .await?
        },
    };
    programs_from_rows(rows)
}

pub async fn insert_rule(rule: NewRewardRule, conn: &mut SqliteConnection) -> Result<RewardRule, ProgramError> {
    let row: RuleRow = sqlx::query_as(
        r#"
            INSERT INTO reward_rules (
                program_id, name, trigger, scope, eligibility, points_formula, limits, conflict, idempotency_scope,
                earning_domain, status, active_from, active_to
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *;
        "#,
    )
    .bind(rule.program_id)
    .bind(rule.name)
    .bind(rule.trigger.as_str())
    .bind(Json(rule.scope))
    .bind(Json(rule.eligibility))
    .bind(Json(rule.points_formula))
    .bind(Json(rule.limits))
    .bind(Json(rule.conflict))
    .bind(Json(rule.idempotency_scope))
    .bind(rule.earning_domain.as_str().to_string())
    .bind(rule.status.as_str())
    .bind(opt_millis(rule.active_from))
    .bind(opt_millis(rule.active_to))
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_rule(id: i64, conn: &mut SqliteConnection) -> Result<Option<RewardRule>, ProgramError> {
    let row: Option<RuleRow> =
        sqlx::query_as("SELECT * FROM reward_rules WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(RewardRule::try_from).transpose()
}

pub async fn fetch_rules(ids: &[i64], conn: &mut SqliteConnection) -> Result<Vec<RewardRule>, ProgramError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM reward_rules WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY id");
    let rows: Vec<RuleRow> = builder.build_query_as().fetch_all(conn).await?;
    rules_from_rows(rows)
}

/// Rules with `active` status for any of the programs that fire on `trigger`. Activity windows are checked by the
/// caller.
pub async fn fetch_rules_for_programs(
    program_ids: &[i64],
    trigger: EventType,
    conn: &mut SqliteConnection,
) -> Result<Vec<RewardRule>, ProgramError> {
    if program_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM reward_rules WHERE status = 'active' AND trigger = ");
    builder.push_bind(trigger.as_str());
    builder.push(" AND program_id IN (");
    let mut separated = builder.separated(", ");
    for id in program_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY program_id, id");
    let rows: Vec<RuleRow> = builder.build_query_as().fetch_all(conn).await?;
    rules_from_rows(rows)
}

/// Active rules of every program of the tenant that fire on `trigger`.
pub async fn fetch_tenant_rules_for_trigger(
    tenant_id: i64,
    trigger: EventType,
    now_ms: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<RewardRule>, ProgramError> {
    let rows: Vec<RuleRow> = sqlx::query_as(
        r#"
            SELECT r.* FROM reward_rules r
            JOIN loyalty_programs p ON p.id = r.program_id
            WHERE p.tenant_id = $1
              AND p.status = 'active'
              AND (p.active_from IS NULL OR p.active_from <= $3)
              AND (p.active_to IS NULL OR p.active_to >= $3)
              AND r.status = 'active'
              AND r.trigger = $2
            ORDER BY r.id
        "#,
    )
    .bind(tenant_id)
    .bind(trigger.as_str())
    .bind(now_ms)
    .fetch_all(conn)
    .await?;
    rules_from_rows(rows)
}

