//! Database layer — migrations and the transaction journal.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::events::FlowUpdate;

/// A journal row: one broadcast transaction and the latest status seen for it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    pub tx_hash: String,
    pub flow: String,
    pub stage: String,
    pub campaign_id: Option<i64>,
    pub amount: Option<String>,
    /// `base` (token smallest units) or `rupiah`.
    pub amount_unit: Option<String>,
    pub status: String,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    // Create the file on first start.
    let url = if url.contains('?') || url.contains(":memory:") {
        url
    } else {
        format!("{url}?mode=rwc")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Journal writes
// ─────────────────────────────────────────────────────────

/// Upsert the journal row for the update's transaction.
///
/// Updates without a transaction hash are skipped; returns whether a row
/// was written.
pub async fn record_update(pool: &SqlitePool, update: &FlowUpdate) -> Result<bool> {
    let Some((stage, hash)) = update.tx else {
        return Ok(false);
    };
    let now = Utc::now().timestamp();
    let campaign_id = update.campaign_id.and_then(|id| i64::try_from(id).ok());

    sqlx::query(
        r#"
        INSERT INTO transactions
            (tx_hash, flow, stage, campaign_id, amount, amount_unit, status, error_kind,
             error, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
        ON CONFLICT (tx_hash) DO UPDATE SET
            status      = excluded.status,
            error_kind  = excluded.error_kind,
            error       = excluded.error,
            amount      = COALESCE(excluded.amount, transactions.amount),
            amount_unit = COALESCE(excluded.amount_unit, transactions.amount_unit),
            updated_at  = excluded.updated_at
        "#,
    )
    .bind(format!("{hash:#x}"))
    .bind(update.flow.as_str())
    .bind(stage.as_str())
    .bind(campaign_id)
    .bind(update.amount.as_ref().map(|a| a.value.as_str()))
    .bind(update.amount.as_ref().map(|a| a.unit.as_str()))
    .bind(update.status)
    .bind(update.error.as_ref().map(|e| e.kind.as_str()))
    .bind(update.error.as_ref().map(|e| e.message.as_str()))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(true)
}

// ─────────────────────────────────────────────────────────
// Journal reads
// ─────────────────────────────────────────────────────────

/// Most recent transactions first.
pub async fn list_transactions(pool: &SqlitePool, limit: i64) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query_as::<_, TransactionRecord>(
        r#"
        SELECT id, tx_hash, flow, stage, campaign_id, amount, amount_unit, status,
               error_kind, error, created_at, updated_at
        FROM   transactions
        ORDER  BY created_at DESC, id DESC
        LIMIT  ?1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn transactions_for_campaign(
    pool: &SqlitePool,
    campaign_id: u64,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query_as::<_, TransactionRecord>(
        r#"
        SELECT id, tx_hash, flow, stage, campaign_id, amount, amount_unit, status,
               error_kind, error, created_at, updated_at
        FROM   transactions
        WHERE  campaign_id = ?1
        ORDER  BY created_at ASC, id ASC
        "#,
    )
    .bind(i64::try_from(campaign_id).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
