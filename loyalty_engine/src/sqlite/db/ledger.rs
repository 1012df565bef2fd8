use loyalty_common::Points;
use log::*;
use serde_json::Value;
use sqlx::{types::Json, FromRow, QueryBuilder, Sqlite, SqliteConnection};

use super::{from_millis, millis, opt_from_millis, opt_millis, parse_text};
use crate::{
    db_types::{NewPointsTransaction, PointsTransaction},
    traits::{InsertTransactionResult, LedgerError},
};

#[derive(FromRow)]
struct TransactionRow {
    id: i64,
    tenant_id: i64,
    customer_id: i64,
    membership_id: i64,
    program_id: Option<i64>,
    reward_rule_id: Option<i64>,
    tx_type: String,
    points_delta: i64,
    idempotency_key: String,
    source_event_id: Option<String>,
    correlation_id: Option<String>,
    created_by: String,
    reason_code: Option<String>,
    metadata: Option<Json<Value>>,
    reversal_of: Option<i64>,
    expires_at: Option<i64>,
    reward_id: Option<i64>,
    branch_id: Option<i64>,
    amount: Option<f64>,
    currency: Option<String>,
    created_at: i64,
}

impl TryFrom<TransactionRow> for PointsTransaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let convert = move || -> Result<PointsTransaction, String> {
            Ok(PointsTransaction {
                id: row.id,
                tenant_id: row.tenant_id,
                customer_id: row.customer_id,
                membership_id: row.membership_id,
                program_id: row.program_id,
                reward_rule_id: row.reward_rule_id,
                tx_type: parse_text(&row.tx_type)?,
                points_delta: Points::from(row.points_delta),
                idempotency_key: row.idempotency_key,
                source_event_id: row.source_event_id,
                correlation_id: row.correlation_id,
                created_by: row.created_by,
                reason_code: row.reason_code,
                metadata: row.metadata.map(|j| j.0),
                reversal_of: row.reversal_of,
                expires_at: opt_from_millis(row.expires_at)?,
                reward_id: row.reward_id,
                branch_id: row.branch_id,
                amount: row.amount,
                currency: row.currency,
                created_at: from_millis(row.created_at)?,
            })
        };
        convert().map_err(|e| LedgerError::InvalidRecord(format!("transaction #{id}: {e}")))
    }
}

fn from_rows(rows: Vec<TransactionRow>) -> Result<Vec<PointsTransaction>, LedgerError> {
    rows.into_iter().map(PointsTransaction::try_from).collect()
}

/// Inserts the ledger row unless a row with the same idempotency key exists already.
///
/// The check is made by the unique index on `idempotency_key`, not by a prior read, so two writers racing on the same
/// key produce exactly one row.
pub async fn idempotent_insert(
    tx: NewPointsTransaction,
    conn: &mut SqliteConnection,
) -> Result<InsertTransactionResult, LedgerError> {
    let key = tx.idempotency_key.clone();
    let result: Result<i64, sqlx::Error> = sqlx::query_scalar(
        r#"
            INSERT INTO points_transactions (
                tenant_id, customer_id, membership_id, program_id, reward_rule_id, tx_type, points_delta,
                idempotency_key, source_event_id, correlation_id, created_by, reason_code, metadata, reversal_of,
                expires_at, reward_id, branch_id, amount, currency, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING id;
        "#,
    )
    .bind(tx.tenant_id)
    .bind(tx.customer_id)
    .bind(tx.membership_id)
    .bind(tx.program_id)
    .bind(tx.reward_rule_id)
    .bind(tx.tx_type.as_str())
    .bind(tx.points_delta)
    .bind(tx.idempotency_key)
    .bind(tx.source_event_id)
    .bind(tx.correlation_id)
    .bind(tx.created_by)
    .bind(tx.reason_code)
    .bind(tx.metadata.map(Json))
    .bind(tx.reversal_of)
    .bind(opt_millis(tx.expires_at))
    .bind(tx.reward_id)
    .bind(tx.branch_id)
    .bind(tx.amount)
    .bind(tx.currency)
    .bind(millis(tx.created_at))
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(id) => Ok(InsertTransactionResult::Inserted(id)),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            let id: i64 = sqlx::query_scalar("SELECT id FROM points_transactions WHERE idempotency_key = $1")
                .bind(&key)
                .fetch_one(conn)
                .await?;
            trace!("🗃️ Ledger row with key {key} already exists as #{id}");
            Ok(InsertTransactionResult::AlreadyExists(id))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_transaction(id: i64, conn: &mut SqliteConnection) -> Result<Option<PointsTransaction>, LedgerError> {
    let row: Option<TransactionRow> =
        sqlx::query_as("SELECT * FROM points_transactions WHERE id = $1").bind(id).fetch_optional(conn).await?;
    row.map(PointsTransaction::try_from).transpose()
}

pub async fn fetch_by_idempotency_key(
    key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PointsTransaction>, LedgerError> {
    let row: Option<TransactionRow> = sqlx::query_as("SELECT * FROM points_transactions WHERE idempotency_key = $1")
        .bind(key)
        .fetch_optional(conn)
        .await?;
    row.map(PointsTransaction::try_from).transpose()
}

pub async fn fetch_by_idempotency_keys(
    keys: &[String],
    conn: &mut SqliteConnection,
) -> Result<Vec<PointsTransaction>, LedgerError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM points_transactions WHERE idempotency_key IN (");
    let mut separated = builder.separated(", ");
    for key in keys {
        separated.push_bind(key.as_str());
    }
    separated.push_unseparated(") ORDER BY id");
    let rows: Vec<TransactionRow> = builder.build_query_as().fetch_all(conn).await?;
    from_rows(rows)
}

pub async fn fetch_earnings_in_period(
    membership_id: i64,
    program_id: i64,
    rule_id: i64,
    start_ms: i64,
    end_ms: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PointsTransaction>, LedgerError> {
    let rows: Vec<TransactionRow> = sqlx::query_as(
        r#"
            SELECT * FROM points_transactions
            WHERE membership_id = $1
              AND program_id = $2
              AND reward_rule_id = $3
              AND tx_type = 'EARNING'
              AND created_at >= $4
              AND created_at <= $5
            ORDER BY created_at, id
        "#,
    )
    .bind(membership_id)
    .bind(program_id)
    .bind(rule_id)
    .bind(start_ms)
    .bind(end_ms)
    .fetch_all(conn)
    .await?;
    from_rows(rows)
}

pub async fn fetch_for_membership_in_period(
    membership_id: i64,
    start_ms: i64,
    end_ms: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PointsTransaction>, LedgerError> {
    let rows: Vec<TransactionRow> = sqlx::query_as(
        r#"
            SELECT * FROM points_transactions
            WHERE membership_id = $1 AND created_at >= $2 AND created_at <= $3
            ORDER BY created_at, id
        "#,
    )
    .bind(membership_id)
    .bind(start_ms)
    .bind(end_ms)
    .fetch_all(conn)
    .await?;
    from_rows(rows)
}

pub async fn fetch_for_membership(
    membership_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PointsTransaction>, LedgerError> {
    let rows: Vec<TransactionRow> =
        sqlx::query_as("SELECT * FROM points_transactions WHERE membership_id = $1 ORDER BY created_at, id")
            .bind(membership_id)
            .fetch_all(conn)
            .await?;
    from_rows(rows)
}

pub async fn fetch_expired_earnings(
    membership_id: i64,
    now_ms: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PointsTransaction>, LedgerError> {
    let rows: Vec<TransactionRow> = sqlx::query_as(
        r#"
            SELECT * FROM points_transactions
            WHERE membership_id = $1
              AND tx_type = 'EARNING'
              AND expires_at IS NOT NULL
              AND expires_at < $2
            ORDER BY created_at, id
        "#,
    )
    .bind(membership_id)
    .bind(now_ms)
    .fetch_all(conn)
    .await?;
    from_rows(rows)
}

pub async fn fetch_reversals_of(
    transaction_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PointsTransaction>, LedgerError> {
    let rows: Vec<TransactionRow> =
        sqlx::query_as("SELECT * FROM points_transactions WHERE reversal_of = $1 ORDER BY id")
            .bind(transaction_id)
            .fetch_all(conn)
            .await?;
    from_rows(rows)
}

pub async fn count_redemptions(
    membership_id: i64,
    reward_id: i64,
    conn: &mut SqliteConnection,
) -> Result<i64, LedgerError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM points_transactions WHERE membership_id = $1 AND reward_id = $2 AND tx_type = 'REDEEM'",
    )
    .bind(membership_id)
    .bind(reward_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

pub async fn calculate_balance(membership_id: i64, conn: &mut SqliteConnection) -> Result<Points, LedgerError> {
    let sum: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(points_delta), 0) FROM points_transactions WHERE membership_id = $1")
            .bind(membership_id)
            .fetch_one(conn)
            .await?;
    Ok(Points::from(sum))
}

pub async fn calculate_program_balance(
    membership_id: i64,
    program_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Points, LedgerError> {
    let sum: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(points_delta), 0) FROM points_transactions WHERE membership_id = $1 AND program_id = $2",
    )
    .bind(membership_id)
    .bind(program_id)
    .fetch_one(conn)
    .await?;
    Ok(Points::from(sum))
}
