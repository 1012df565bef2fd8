use sqlx::{FromRow, SqliteConnection};

use super::{from_millis, millis, opt_from_millis, opt_millis, parse_text};
use crate::{
    db_types::{NewReferral, Referral},
    traits::ReferralError,
};

#[derive(FromRow)]
struct ReferralRow {
    id: i64,
    tenant_id: i64,
    referrer_membership_id: i64,
    referred_membership_id: i64,
    referral_code: Option<String>,
    status: String,
    first_purchase_completed: bool,
    first_purchase_completed_at: Option<i64>,
    reward_granted: bool,
    reward_granted_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<ReferralRow> for Referral {
    type Error = ReferralError;

    fn try_from(row: ReferralRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let convert = move || -> Result<Referral, String> {
            Ok(Referral {
                id: row.id,
                tenant_id: row.tenant_id,
                referrer_membership_id: row.referrer_membership_id,
                referred_membership_id: row.referred_membership_id,
                referral_code: row.referral_code,
                status: parse_text(&row.status)?,
                first_purchase_completed: row.first_purchase_completed,
                first_purchase_completed_at: opt_from_millis(row.first_purchase_completed_at)?,
                reward_granted: row.reward_granted,
                reward_granted_at: opt_from_millis(row.reward_granted_at)?,
                created_at: from_millis(row.created_at)?,
            })
        };
        convert().map_err(|e| ReferralError::InvalidRecord(format!("referral #{id}: {e}")))
    }
}

fn from_rows(rows: Vec<ReferralRow>) -> Result<Vec<Referral>, ReferralError> {
    rows.into_iter().map(Referral::try_from).collect()
}

pub async fn insert_referral(referral: NewReferral, conn: &mut SqliteConnection) -> Result<Referral, ReferralError> {
    let row: ReferralRow = sqlx::query_as(
        r#"
            INSERT INTO referrals (tenant_id, referrer_membership_id, referred_membership_id, referral_code, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(referral.tenant_id)
    .bind(referral.referrer_membership_id)
    .bind(referral.referred_membership_id)
    .bind(referral.referral_code)
    .bind(millis(referral.created_at))
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_referral(id: i64, conn: &mut SqliteConnection) -> Result<Option<Referral>, ReferralError> {
    let row: Option<ReferralRow> =
        sqlx::query_as("SELECT * FROM referrals WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(Referral::try_from).transpose()
}

pub async fn fetch_active_referral_between(
    referrer_membership_id: i64,
    referred_membership_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Referral>, ReferralError> {
    let row: Option<ReferralRow> = sqlx::query_as(
        r#"
            SELECT * FROM referrals
            WHERE referrer_membership_id = $1 AND referred_membership_id = $2 AND status != 'cancelled'
            ORDER BY id LIMIT 1
        "#,
    )
    .bind(referrer_membership_id)
    .bind(referred_membership_id)
    .fetch_optional(conn)
    .await?;
    row.map(Referral::try_from).transpose()
}

pub async fn count_referrals_in_period(
    referrer_membership_id: i64,
    start_ms: i64,
    end_ms: i64,
    conn: &mut SqliteConnection,
) -> Result<i64, ReferralError> {
    let count: i64 = sqlx::query_scalar(
        r#"
            SELECT COUNT(*) FROM referrals
            WHERE referrer_membership_id = $1 AND created_at >= $2 AND created_at <= $3
        "#,
    )
    .bind(referrer_membership_id)
    .bind(start_ms)
    .bind(end_ms)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

pub async fn fetch_referrals_for_referred_since(
    referred_membership_id: i64,
    since_ms: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Referral>, ReferralError> {
    let rows: Vec<ReferralRow> = sqlx::query_as(
        "SELECT * FROM referrals WHERE referred_membership_id = $1 AND created_at >= $2 ORDER BY created_at, id",
    )
    .bind(referred_membership_id)
    .bind(since_ms)
    .fetch_all(conn)
    .await?;
    from_rows(rows)
}

pub async fn fetch_pending_for_referred(
    referred_membership_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Referral>, ReferralError> {
    let rows: Vec<ReferralRow> = sqlx::query_as(
        r#"
            SELECT * FROM referrals
            WHERE referred_membership_id = $1 AND status = 'pending' AND first_purchase_completed = 0
            ORDER BY id
        "#,
    )
    .bind(referred_membership_id)
    .fetch_all(conn)
    .await?;
    from_rows(rows)
}

pub async fn fetch_completed_without_reward(
    tenant_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Referral>, ReferralError> {
    let rows: Vec<ReferralRow> = sqlx::query_as(
        r#"
            SELECT * FROM referrals
            WHERE tenant_id = $1 AND first_purchase_completed = 1 AND reward_granted = 0 AND status != 'cancelled'
            ORDER BY id
        "#,
    )
    .bind(tenant_id)
    .fetch_all(conn)
    .await?;
    from_rows(rows)
}

pub async fn save_referral(referral: &Referral, conn: &mut SqliteConnection) -> Result<(), ReferralError> {
    sqlx::query(
        r#"
            UPDATE referrals SET
                status = $1,
                first_purchase_completed = $2,
                first_purchase_completed_at = $3,
                reward_granted = $4,
                reward_granted_at = $5
            WHERE id = $6
        "#,
    )
    .bind(referral.status.as_str())
    .bind(referral.first_purchase_completed)
    .bind(opt_millis(referral.first_purchase_completed_at))
    .bind(referral.reward_granted)
    .bind(opt_millis(referral.reward_granted_at))
    .bind(referral.id)
    .execute(conn)
    .await?;
    Ok(())
}
