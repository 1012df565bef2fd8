use chrono::Utc;
use loyalty_common::Points;
use sqlx::{FromRow, SqliteConnection};

use super::{from_millis, millis, opt_from_millis, opt_millis, parse_text};
use crate::{
    db_types::{CustomerMembership, Enrollment, NewEnrollment, NewMembership},
    traits::{MembershipError, ProgramError},
};

#[derive(FromRow)]
struct MembershipRow {
    id: i64,
    user_id: i64,
    tenant_id: i64,
    points: i64,
    tier_id: Option<i64>,
    total_spent: f64,
    total_visits: i64,
    last_visit: Option<i64>,
    joined_date: i64,
    qr_code: Option<String>,
    status: String,
    updated_at: i64,
}

impl TryFrom<MembershipRow> for CustomerMembership {
    type Error = MembershipError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        let convert = || -> Result<CustomerMembership, String> {
            Ok(CustomerMembership {
                id: row.id,
                user_id: row.user_id,
                tenant_id: row.tenant_id,
                points: Points::from(row.points),
                tier_id: row.tier_id,
                total_spent: row.total_spent,
                total_visits: row.total_visits,
                last_visit: opt_from_millis(row.last_visit)?,
                joined_date: from_millis(row.joined_date)?,
                qr_code: row.qr_code.clone(),
                status: parse_text(&row.status)?,
                updated_at: from_millis(row.updated_at)?,
            })
        };
        convert().map_err(|e| MembershipError::InvalidRecord(format!("membership #{}: {e}", row.id)))
    }
}

fn convert_all(rows: Vec<MembershipRow>) -> Result<Vec<CustomerMembership>, MembershipError> {
    rows.into_iter().map(CustomerMembership::try_from).collect()
}

pub async fn insert_membership(
    membership: NewMembership,
    conn: &mut SqliteConnection,
) -> Result<CustomerMembership, MembershipError> {
    let now = millis(Utc::now());
    let row: MembershipRow = sqlx::query_as(
        r#"
            INSERT INTO customer_memberships (user_id, tenant_id, tier_id, joined_date, qr_code, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(membership.user_id)
    .bind(membership.tenant_id)
    .bind(membership.tier_id)
    .bind(millis(membership.joined_date))
    .bind(membership.qr_code)
    .bind(membership.status.as_str())
    .bind(now)
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_membership(
    id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<CustomerMembership>, MembershipError> {
    let row: Option<MembershipRow> =
        sqlx::query_as("SELECT * FROM customer_memberships WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(CustomerMembership::try_from).transpose()
}

pub async fn fetch_membership_for_customer(
    customer_id: i64,
    tenant_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<CustomerMembership>, MembershipError> {
    let row: Option<MembershipRow> =
        sqlx::query_as("SELECT * FROM customer_memberships WHERE user_id = $1 AND tenant_id = $2")
            .bind(customer_id)
            .bind(tenant_id)
            .fetch_optional(conn)
            .await?;
    row.map(CustomerMembership::try_from).transpose()
}

pub async fn fetch_membership_by_qr_code(
    qr_code: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<CustomerMembership>, MembershipError> {
    let row: Option<MembershipRow> = sqlx::query_as("SELECT * FROM customer_memberships WHERE qr_code = $1")
        .bind(qr_code)
        .fetch_optional(conn)
        .await?;
    row.map(CustomerMembership::try_from).transpose()
}

pub async fn fetch_memberships_for_tenant(
    tenant_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<CustomerMembership>, MembershipError> {
    let rows: Vec<MembershipRow> =
        sqlx::query_as("SELECT * FROM customer_memberships WHERE tenant_id = $1 ORDER BY id")
            .bind(tenant_id)
            .fetch_all(conn)
            .await?;
    convert_all(rows)
}

pub async fn record_visit(membership_id: i64, at: i64, conn: &mut SqliteConnection) -> Result<(), MembershipError> {
    let result = sqlx::query(
        r#"
            UPDATE customer_memberships SET
                total_visits = total_visits + 1,
                last_visit = $1,
                updated_at = $2
            WHERE id = $3
        "#,
    )
    .bind(at)
    .bind(millis(Utc::now()))
    .bind(membership_id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(MembershipError::NotFound(membership_id));
    }
    Ok(())
}

/// Adds `amount` to the total spend in place. The first statement only matches a membership that has never spent
/// anything, so its row count tells whether this is the first purchase.
pub async fn record_purchase(
    membership_id: i64,
    amount: f64,
    conn: &mut SqliteConnection,
) -> Result<bool, MembershipError> {
    if amount <= 0.0 {
        return Ok(false);
    }
    let first = sqlx::query(
        r#"
            UPDATE customer_memberships SET total_spent = total_spent + $1, updated_at = $2
            WHERE id = $3 AND total_spent <= 0
        "#,
    )
    .bind(amount)
    .bind(millis(Utc::now()))
    .bind(membership_id)
    .execute(&mut *conn)
    .await?;
    if first.rows_affected() == 1 {
        return Ok(true);
    }
    let result =
        sqlx::query("UPDATE customer_memberships SET total_spent = total_spent + $1, updated_at = $2 WHERE id = $3")
            .bind(amount)
            .bind(millis(Utc::now()))
            .bind(membership_id)
            .execute(conn)
            .await?;
    if result.rows_affected() == 0 {
        return Err(MembershipError::NotFound(membership_id));
    }
    Ok(false)
}

pub async fn update_cached_points(
    membership_id: i64,
    points: Points,
    conn: &mut SqliteConnection,
) -> Result<(), MembershipError> {
    let result = sqlx::query("UPDATE customer_memberships SET points = $1, updated_at = $2 WHERE id = $3")
        .bind(points)
        .bind(millis(Utc::now()))
        .bind(membership_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MembershipError::NotFound(membership_id));
    }
    Ok(())
}

pub async fn assign_tier(
    membership_id: i64,
    tier_id: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<(), MembershipError> {
    let result = sqlx::query("UPDATE customer_memberships SET tier_id = $1, updated_at = $2 WHERE id = $3")
        .bind(tier_id)
        .bind(millis(Utc::now()))
        .bind(membership_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MembershipError::NotFound(membership_id));
    }
    Ok(())
}

//--------------------------------------      Enrollments      ---------------------------------------------------------
#[derive(FromRow)]
struct EnrollmentRow {
    id: i64,
    membership_id: i64,
    program_id: i64,
    status: String,
    effective_from: i64,
    effective_to: Option<i64>,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = ProgramError;

    fn try_from(row: EnrollmentRow) -> Result<Self, Self::Error> {
        let convert = || -> Result<Enrollment, String> {
            Ok(Enrollment {
                id: row.id,
                membership_id: row.membership_id,
                program_id: row.program_id,
                status: parse_text(&row.status)?,
                effective_from: from_millis(row.effective_from)?,
                effective_to: opt_from_millis(row.effective_to)?,
            })
        };
        convert().map_err(|e| ProgramError::InvalidRecord(format!("enrollment #{}: {e}", row.id)))
    }
}

pub async fn insert_enrollment(enrollment: NewEnrollment, conn: &mut SqliteConnection) -> Result<i64, ProgramError> {
    let id: i64 = sqlx::query_scalar(
        r#"
            INSERT INTO enrollments (membership_id, program_id, status, effective_from, effective_to)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id;
        "#,
    )
    .bind(enrollment.membership_id)
    .bind(enrollment.program_id)
    .bind(enrollment.status.as_str())
    .bind(millis(enrollment.effective_from))
    .bind(opt_millis(enrollment.effective_to))
    .fetch_one(conn)
    .await?;
    Ok(id)
}

/// Enrollments with `ACTIVE` status whose effective window contains `now_ms`.
pub async fn fetch_active_enrollments(
    membership_id: i64,
    now_ms: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Enrollment>, ProgramError> {
    let rows: Vec<EnrollmentRow> = sqlx::query_as(
        r#"
            SELECT * FROM enrollments
            WHERE membership_id = $1
              AND status = 'ACTIVE'
              AND effective_from <= $2
              AND (effective_to IS NULL OR effective_to >= $2)
            ORDER BY id
        "#,
    )
    .bind(membership_id)
    .bind(now_ms)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(Enrollment::try_from).collect()
}
