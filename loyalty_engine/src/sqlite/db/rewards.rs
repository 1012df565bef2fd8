use chrono::Utc;
use loyalty_common::Points;
use sqlx::{FromRow, SqliteConnection};

use super::{from_millis, millis, opt_from_millis, opt_millis, parse_text};
use crate::{
    db_types::{NewRedemptionCode, NewReward, RedemptionCode, Reward, UNLIMITED_STOCK},
    traits::{InsertCodeResult, RewardError},
};

#[derive(FromRow)]
struct RewardRow {
    id: i64,
    tenant_id: i64,
    name: String,
    category: Option<String>,
    points_required: i64,
    stock: i64,
    max_redemptions_per_user: Option<i64>,
    status: String,
    valid_until: Option<i64>,
}

impl TryFrom<RewardRow> for Reward {
    type Error = RewardError;

    fn try_from(row: RewardRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let convert = move || -> Result<Reward, String> {
            Ok(Reward {
                id: row.id,
                tenant_id: row.tenant_id,
                name: row.name,
                category: row.category,
                points_required: Points::from(row.points_required),
                stock: row.stock,
                max_redemptions_per_user: row.max_redemptions_per_user,
                status: parse_text(&row.status)?,
                valid_until: opt_from_millis(row.valid_until)?,
            })
        };
        convert().map_err(|e| RewardError::InvalidRecord(format!("reward #{id}: {e}")))
    }
}

#[derive(FromRow)]
struct CodeRow {
    id: i64,
    code: String,
    transaction_id: i64,
    reward_id: i64,
    membership_id: i64,
    tenant_id: i64,
    status: String,
    expires_at: i64,
    used_at: Option<i64>,
    used_by: Option<i64>,
    created_at: i64,
}

impl TryFrom<CodeRow> for RedemptionCode {
    type Error = RewardError;

    fn try_from(row: CodeRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let convert = move || -> Result<RedemptionCode, String> {
            Ok(RedemptionCode {
                id: row.id,
                code: row.code,
                transaction_id: row.transaction_id,
                reward_id: row.reward_id,
                membership_id: row.membership_id,
                tenant_id: row.tenant_id,
                status: parse_text(&row.status)?,
                expires_at: from_millis(row.expires_at)?,
                used_at: opt_from_millis(row.used_at)?,
                used_by: row.used_by,
                created_at: from_millis(row.created_at)?,
            })
        };
        convert().map_err(|e| RewardError::InvalidRecord(format!("redemption code #{id}: {e}")))
    }
}

pub async fn insert_reward(reward: NewReward, conn: &mut SqliteConnection) -> Result<Reward, RewardError> {
    let row: RewardRow = sqlx::query_as(
        r#"
            INSERT INTO rewards (
                tenant_id, name, category, points_required, stock, max_redemptions_per_user, status, valid_until
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(reward.tenant_id)
    .bind(reward.name)
    .bind(reward.category)
    .bind(reward.points_required)
    .bind(reward.stock)
    .bind(reward.max_redemptions_per_user)
    .bind(reward.status.as_str())
    .bind(opt_millis(reward.valid_until))
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub async fn fetch_reward(id: i64, conn: &mut SqliteConnection) -> Result<Option<Reward>, RewardError> {
    let row: Option<RewardRow> =
        sqlx::query_as("SELECT * FROM rewards WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(Reward::try_from).transpose()
}

/// Returns `false` when there was no stock left to take.
pub async fn decrement_stock(reward_id: i64, conn: &mut SqliteConnection) -> Result<bool, RewardError> {
    let result = sqlx::query(
        r#"
            UPDATE rewards SET stock = stock - 1
            WHERE id = $1 AND stock != $2 AND stock > 0
        "#,
    )
    .bind(reward_id)
    .bind(UNLIMITED_STOCK)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        return Ok(true);
    }
    let unlimited: Option<bool> = sqlx::query_scalar("SELECT stock = $2 FROM rewards WHERE id = $1")
        .bind(reward_id)
        .bind(UNLIMITED_STOCK)
        .fetch_optional(conn)
        .await?;
    Ok(unlimited.unwrap_or(false))
}

pub async fn insert_redemption_code(
    code: NewRedemptionCode,
    conn: &mut SqliteConnection,
) -> Result<InsertCodeResult, RewardError> {
    let result: Result<i64, sqlx::Error> = sqlx::query_scalar(
        r#"
            INSERT INTO redemption_codes
                (code, transaction_id, reward_id, membership_id, tenant_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id;
        "#,
    )
    .bind(code.code)
    .bind(code.transaction_id)
    .bind(code.reward_id)
    .bind(code.membership_id)
    .bind(code.tenant_id)
    .bind(millis(code.expires_at))
    .bind(millis(Utc::now()))
    .fetch_one(conn)
    .await;
    match result {
        Ok(id) => Ok(InsertCodeResult::Inserted(id)),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(InsertCodeResult::Collision),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_redemption_code(
    code: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<RedemptionCode>, RewardError> {
    let row: Option<CodeRow> =
        sqlx::query_as("SELECT * FROM redemption_codes WHERE code = $1").bind(code).fetch_optional(conn).await?;
    row.map(RedemptionCode::try_from).transpose()
}

pub async fn fetch_redemption_code_for_transaction(
    transaction_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<RedemptionCode>, RewardError> {
    let row: Option<CodeRow> = sqlx::query_as("SELECT * FROM redemption_codes WHERE transaction_id = $1")
        .bind(transaction_id)
        .fetch_optional(conn)
        .await?;
    row.map(RedemptionCode::try_from).transpose()
}

pub async fn update_redemption_code(code: &RedemptionCode, conn: &mut SqliteConnection) -> Result<(), RewardError> {
    sqlx::query("UPDATE redemption_codes SET status = $1, used_at = $2, used_by = $3 WHERE id = $4")
        .bind(code.status.as_str())
        .bind(opt_millis(code.used_at))
        .bind(code.used_by)
        .bind(code.id)
        .execute(conn)
        .await?;
    Ok(())
}
