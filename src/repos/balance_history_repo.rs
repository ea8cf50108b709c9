use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::services::balances::AccountBalances;

/// Append-only balance snapshot written on every successful balance
/// mutation. One row per touched account per committed transaction.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BalanceHistoryEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub transaction_id: Uuid,
    pub posted_debit: i64,
    pub posted_credit: i64,
    pub posted_amount: i64,
    pub pending_debit: i64,
    pub pending_credit: i64,
    pub pending_amount: i64,
    pub available: i64,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum BalanceHistoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const HISTORY_COLUMNS: &str = r#"id, account_id, transaction_id, posted_debit, posted_credit,
       posted_amount, pending_debit, pending_credit, pending_amount, available, inserted_at"#;

/// Snapshot an account's balances inside the projection transaction
pub async fn tx_insert(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    transaction_id: Uuid,
    balances: &AccountBalances,
) -> Result<BalanceHistoryEntry, BalanceHistoryError> {
    let entry = sqlx::query_as::<_, BalanceHistoryEntry>(&format!(
        r#"
        INSERT INTO balance_history_entries
            (id, account_id, transaction_id, posted_debit, posted_credit, posted_amount,
             pending_debit, pending_credit, pending_amount, available)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {HISTORY_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(transaction_id)
    .bind(balances.posted.debit)
    .bind(balances.posted.credit)
    .bind(balances.posted.amount)
    .bind(balances.pending.debit)
    .bind(balances.pending.credit)
    .bind(balances.pending.amount)
    .bind(balances.available)
    .fetch_one(&mut **tx)
    .await?;

    Ok(entry)
}

/// Balance history for an account, most recent first
pub async fn list_for_account(
    pool: &PgPool,
    account_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<BalanceHistoryEntry>, BalanceHistoryError> {
    let entries = sqlx::query_as::<_, BalanceHistoryEntry>(&format!(
        r#"
        SELECT {HISTORY_COLUMNS}
        FROM balance_history_entries
        WHERE account_id = $1
        ORDER BY inserted_at DESC, id
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(account_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
