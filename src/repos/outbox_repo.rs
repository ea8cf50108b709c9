//! Transactional outbox for journal link fan-out
//!
//! Link-row creation is a best-effort side effect of a successful
//! projection: the work item is enqueued in the same database transaction,
//! then drained out-of-band by the relay with at-least-once delivery.
//! Dedup lives in the link tables' unique constraints, not here.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// One pending fan-out unit: every link row a journal event needs
#[derive(Debug, Clone, FromRow)]
pub struct LinkOutboxItem {
    pub id: Uuid,
    pub journal_event_id: Uuid,
    pub command_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub account_ids: Vec<Uuid>,
    pub attempts: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const OUTBOX_COLUMNS: &str = r#"id, journal_event_id, command_id, transaction_id, account_ids,
       attempts, published_at, inserted_at"#;

/// Enqueue link fan-out within the projection transaction
pub async fn tx_enqueue(
    tx: &mut Transaction<'_, Postgres>,
    journal_event_id: Uuid,
    command_id: Uuid,
    transaction_id: Option<Uuid>,
    account_ids: &[Uuid],
) -> Result<(), OutboxError> {
    sqlx::query(
        r#"
        INSERT INTO link_outbox (id, journal_event_id, command_id, transaction_id, account_ids)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(journal_event_id)
    .bind(command_id)
    .bind(transaction_id)
    .bind(account_ids)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Oldest unpublished items, for one relay pass
pub async fn fetch_unpublished(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<LinkOutboxItem>, OutboxError> {
    let items = sqlx::query_as::<_, LinkOutboxItem>(&format!(
        r#"
        SELECT {OUTBOX_COLUMNS}
        FROM link_outbox
        WHERE published_at IS NULL
        ORDER BY inserted_at
        LIMIT $1
        "#
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

pub async fn mark_published(pool: &PgPool, id: Uuid) -> Result<(), OutboxError> {
    sqlx::query("UPDATE link_outbox SET published_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Count a failed relay pass; the item stays eligible for the next sweep
pub async fn mark_attempt(pool: &PgPool, id: Uuid) -> Result<(), OutboxError> {
    sqlx::query("UPDATE link_outbox SET attempts = attempts + 1 WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
