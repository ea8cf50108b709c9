use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Queue status enum matching database queue_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "queue_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    OccTimeout,
    DeadLetter,
}

/// Scheduling record attached 1:1 to a command
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub command_id: Uuid,
    pub instance_id: Uuid,
    pub status: QueueStatus,
    pub retry_count: i32,
    pub next_retry_after: Option<DateTime<Utc>>,
    pub processor_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    /// Append-only list of `{timestamp, message}` objects
    pub errors: JsonValue,
    pub row_version: i32,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which non-terminal failure state a retryable item goes back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Business or transient failure, eligible for reclaim after backoff
    Failed,
    /// OCC retry budget inside the worker was exhausted
    OccTimeout,
}

impl FailureKind {
    fn status(self) -> QueueStatus {
        match self {
            FailureKind::Failed => QueueStatus::Failed,
            FailureKind::OccTimeout => QueueStatus::OccTimeout,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// The conditional claim update matched no row: someone else claimed
    /// the item, or its status moved since it was read.
    #[error("Queue item already claimed: {item_id}")]
    AlreadyClaimed { item_id: Uuid },

    #[error("Queue item not found: {item_id}")]
    NotFound { item_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const ITEM_COLUMNS: &str = r#"id, command_id, instance_id, status, retry_count, next_retry_after,
       processor_id, processing_started_at, processing_completed_at, errors, row_version,
       inserted_at, updated_at"#;

/// Statuses a processor may claim: pending always, failed and occ_timeout
/// once their backoff window has elapsed.
const CLAIMABLE_PREDICATE: &str = r#"(status = 'pending'
        OR (status IN ('failed', 'occ_timeout')
            AND (next_retry_after IS NULL OR next_retry_after <= NOW())))"#;

/// Insert the pending queue item for a freshly persisted command
pub async fn tx_insert_pending(
    tx: &mut Transaction<'_, Postgres>,
    command_id: Uuid,
    instance_id: Uuid,
) -> Result<QueueItem, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(&format!(
        r#"
        INSERT INTO command_queue_items (id, command_id, instance_id)
        VALUES ($1, $2, $3)
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(command_id)
    .bind(instance_id)
    .fetch_one(&mut **tx)
    .await
}

/// Distinct instances that currently have at least one claimable item
pub async fn claimable_instances(pool: &PgPool) -> Result<Vec<Uuid>, QueueError> {
    let ids = sqlx::query_scalar::<_, Uuid>(&format!(
        "SELECT DISTINCT instance_id FROM command_queue_items WHERE {CLAIMABLE_PREDICATE}"
    ))
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Oldest claimable item for an instance, in FIFO submission order
pub async fn next_claimable(
    pool: &PgPool,
    instance_id: Uuid,
) -> Result<Option<QueueItem>, QueueError> {
    let item = sqlx::query_as::<_, QueueItem>(&format!(
        r#"
        SELECT {ITEM_COLUMNS}
        FROM command_queue_items
        WHERE instance_id = $1 AND {CLAIMABLE_PREDICATE}
        ORDER BY inserted_at
        LIMIT 1
        "#
    ))
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;

    Ok(item)
}

/// Claim an item for a processor
///
/// Single conditional update keyed on the observed `row_version` and a
/// claimable status; zero affected rows means another processor won the
/// race. The retry counter is incremented at claim time, so `retry_count`
/// reads as "attempts started".
pub async fn claim(
    pool: &PgPool,
    item_id: Uuid,
    row_version: i32,
    processor_id: &str,
) -> Result<QueueItem, QueueError> {
    let item = sqlx::query_as::<_, QueueItem>(&format!(
        r#"
        UPDATE command_queue_items
        SET status = 'processing',
            processor_id = $3,
            processing_started_at = NOW(),
            retry_count = retry_count + 1,
            next_retry_after = NULL,
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $1 AND row_version = $2 AND {CLAIMABLE_PREDICATE}
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(item_id)
    .bind(row_version)
    .bind(processor_id)
    .fetch_optional(pool)
    .await?
    .ok_or(QueueError::AlreadyClaimed { item_id })?;

    Ok(item)
}

/// Mark a claimed item successfully processed
pub async fn mark_processed(pool: &PgPool, item_id: Uuid) -> Result<QueueItem, QueueError> {
    let item = sqlx::query_as::<_, QueueItem>(&format!(
        r#"
        UPDATE command_queue_items
        SET status = 'processed',
            processing_completed_at = NOW(),
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(item_id)
    .fetch_optional(pool)
    .await?
    .ok_or(QueueError::NotFound { item_id })?;

    Ok(item)
}

/// Record a failed attempt on a claimed item
///
/// While the retry budget lasts the item is parked in `failed` or
/// `occ_timeout` with an exponential `next_retry_after`; after that it is
/// dead-lettered. The error message is appended to the item's error list
/// either way.
pub async fn mark_failed(
    pool: &PgPool,
    item: &QueueItem,
    error: &str,
    kind: FailureKind,
    policy: &RetryPolicy,
) -> Result<QueueItem, QueueError> {
    let attempt = item.retry_count.max(1) as u32;

    if attempt < policy.max_retries {
        let next_retry_after = Utc::now() + ChronoDuration::seconds(policy.backoff_secs(attempt));
        let item = sqlx::query_as::<_, QueueItem>(&format!(
            r#"
            UPDATE command_queue_items
            SET status = $2,
                next_retry_after = $3,
                errors = errors || $4::jsonb,
                row_version = row_version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(item.id)
        .bind(kind.status())
        .bind(next_retry_after)
        .bind(error_entry(error))
        .fetch_optional(pool)
        .await?
        .ok_or(QueueError::NotFound { item_id: item.id })?;

        Ok(item)
    } else {
        mark_dead_letter(pool, item.id, error).await
    }
}

/// Move an item straight to dead_letter, recording the final error
pub async fn mark_dead_letter(
    pool: &PgPool,
    item_id: Uuid,
    error: &str,
) -> Result<QueueItem, QueueError> {
    let item = sqlx::query_as::<_, QueueItem>(&format!(
        r#"
        UPDATE command_queue_items
        SET status = 'dead_letter',
            processing_completed_at = NOW(),
            next_retry_after = NULL,
            errors = errors || $2::jsonb,
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(item_id)
    .bind(error_entry(error))
    .fetch_optional(pool)
    .await?
    .ok_or(QueueError::NotFound { item_id })?;

    Ok(item)
}

pub async fn find_by_command(
    pool: &PgPool,
    command_id: Uuid,
) -> Result<Option<QueueItem>, QueueError> {
    let item = sqlx::query_as::<_, QueueItem>(&format!(
        "SELECT {ITEM_COLUMNS} FROM command_queue_items WHERE command_id = $1"
    ))
    .bind(command_id)
    .fetch_optional(pool)
    .await?;

    Ok(item)
}

pub async fn list_by_status(
    pool: &PgPool,
    instance_id: Uuid,
    status: QueueStatus,
    limit: i64,
    offset: i64,
) -> Result<Vec<QueueItem>, QueueError> {
    let items = sqlx::query_as::<_, QueueItem>(&format!(
        r#"
        SELECT {ITEM_COLUMNS}
        FROM command_queue_items
        WHERE instance_id = $1 AND status = $2
        ORDER BY inserted_at
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(instance_id)
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

fn error_entry(message: &str) -> JsonValue {
    serde_json::json!([{
        "timestamp": Utc::now(),
        "message": message,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_maps_to_status() {
        assert_eq!(FailureKind::Failed.status(), QueueStatus::Failed);
        assert_eq!(FailureKind::OccTimeout.status(), QueueStatus::OccTimeout);
    }

    #[test]
    fn error_entry_is_a_single_element_array() {
        let entry = error_entry("boom");
        let list = entry.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["message"], "boom");
        assert!(list[0]["timestamp"].is_string());
    }
}
