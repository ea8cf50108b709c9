use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Transaction status enum matching database transaction_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Posted,
    Archived,
}

/// Entry type enum matching database entry_type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "entry_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

/// Transaction header row
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub status: TransactionStatus,
    pub effective_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub metadata: JsonValue,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One side of a double-entry posting, belonging to one transaction and one
/// account. Immutable once the transaction is posted.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Entry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: i64,
    pub currency: String,
    pub inserted_at: DateTime<Utc>,
}

/// Entry attributes after signed-amount translation, ready for validation
/// and insertion.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_id: Uuid,
    pub entry_type: EntryType,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Error)]
pub enum TransactionRepoError {
    #[error("Transaction not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const TRANSACTION_COLUMNS: &str =
    "id, instance_id, status, effective_at, posted_at, metadata, inserted_at, updated_at";

const ENTRY_COLUMNS: &str = "id, transaction_id, account_id, type, amount, currency, inserted_at";

/// Insert a transaction header inside the projection transaction
pub async fn tx_insert(
    tx: &mut Transaction<'_, Postgres>,
    instance_id: Uuid,
    status: TransactionStatus,
    effective_at: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
    metadata: &JsonValue,
) -> Result<TransactionRecord, TransactionRepoError> {
    let record = sqlx::query_as::<_, TransactionRecord>(&format!(
        r#"
        INSERT INTO transactions (id, instance_id, status, effective_at, posted_at, metadata)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(instance_id)
    .bind(status)
    .bind(effective_at)
    .bind(posted_at)
    .bind(metadata)
    .fetch_one(&mut **tx)
    .await?;

    Ok(record)
}

/// Insert the entry rows for a transaction
pub async fn tx_insert_entries(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
    entries: &[NewEntry],
) -> Result<Vec<Entry>, TransactionRepoError> {
    let mut inserted = Vec::with_capacity(entries.len());

    for entry in entries {
        let row = sqlx::query_as::<_, Entry>(&format!(
            r#"
            INSERT INTO entries (id, transaction_id, account_id, type, amount, currency)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(transaction_id)
        .bind(entry.account_id)
        .bind(entry.entry_type)
        .bind(entry.amount)
        .bind(&entry.currency)
        .fetch_one(&mut **tx)
        .await?;

        inserted.push(row);
    }

    Ok(inserted)
}

/// Replace a pending transaction's entries during an update projection
pub async fn tx_replace_entries(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
    entries: &[NewEntry],
) -> Result<Vec<Entry>, TransactionRepoError> {
    sqlx::query("DELETE FROM entries WHERE transaction_id = $1")
        .bind(transaction_id)
        .execute(&mut **tx)
        .await?;

    tx_insert_entries(tx, transaction_id, entries).await
}

/// Move a transaction to a new status inside the projection transaction
pub async fn tx_set_status(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
    status: TransactionStatus,
    posted_at: Option<DateTime<Utc>>,
) -> Result<TransactionRecord, TransactionRepoError> {
    let record = sqlx::query_as::<_, TransactionRecord>(&format!(
        r#"
        UPDATE transactions
        SET status = $2,
            posted_at = COALESCE($3, posted_at),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(transaction_id)
    .bind(status)
    .bind(posted_at)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(TransactionRepoError::NotFound(transaction_id))?;

    Ok(record)
}

/// Load a transaction header with its entries inside the projection
/// transaction.
pub async fn tx_find_with_entries(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
) -> Result<Option<(TransactionRecord, Vec<Entry>)>, TransactionRepoError> {
    let record = sqlx::query_as::<_, TransactionRecord>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
    ))
    .bind(transaction_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(record) = record else {
        return Ok(None);
    };

    let entries = sqlx::query_as::<_, Entry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE transaction_id = $1 ORDER BY inserted_at, id"
    ))
    .bind(transaction_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(Some((record, entries)))
}

pub async fn find_by_id(
    pool: &PgPool,
    transaction_id: Uuid,
) -> Result<Option<TransactionRecord>, TransactionRepoError> {
    let record = sqlx::query_as::<_, TransactionRecord>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
    ))
    .bind(transaction_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn find_entries(
    pool: &PgPool,
    transaction_id: Uuid,
) -> Result<Vec<Entry>, TransactionRepoError> {
    let entries = sqlx::query_as::<_, Entry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE transaction_id = $1 ORDER BY inserted_at, id"
    ))
    .bind(transaction_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_status_serde_uses_lowercase() {
        let parsed: TransactionStatus = serde_json::from_str("\"archived\"").unwrap();
        assert_eq!(parsed, TransactionStatus::Archived);
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Pending).unwrap(),
            "\"pending\""
        );
    }
}
