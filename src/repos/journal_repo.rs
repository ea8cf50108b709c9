//! Journal events and their link tables
//!
//! A journal event is written inside the same database transaction as the
//! projection it records, so no successful projection can lack its audit
//! row. Link rows are created out-of-band by the outbox relay and are
//! idempotent through unique constraints.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Immutable audit record of one successful command projection
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JournalEvent {
    pub id: Uuid,
    pub command_id: Uuid,
    pub instance_id: Uuid,
    pub kind: String,
    pub payload_digest: String,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const EVENT_COLUMNS: &str = "id, command_id, instance_id, kind, payload_digest, inserted_at";

/// SHA-256 digest of a command payload, hex-encoded
pub fn payload_digest(payload: &JsonValue) -> String {
    hex::encode(Sha256::digest(payload.to_string().as_bytes()))
}

/// Insert the journal event inside the projection transaction
///
/// The unique constraint on `command_id` backs the at-most-once-commit
/// property: a command can never project twice.
pub async fn tx_insert_event(
    tx: &mut Transaction<'_, Postgres>,
    command_id: Uuid,
    instance_id: Uuid,
    kind: &str,
    payload: &JsonValue,
) -> Result<JournalEvent, JournalError> {
    let event = sqlx::query_as::<_, JournalEvent>(&format!(
        r#"
        INSERT INTO journal_events (id, command_id, instance_id, kind, payload_digest)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {EVENT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(command_id)
    .bind(instance_id)
    .bind(kind)
    .bind(payload_digest(payload))
    .fetch_one(&mut **tx)
    .await?;

    Ok(event)
}

pub async fn find_by_command(
    pool: &PgPool,
    command_id: Uuid,
) -> Result<Option<JournalEvent>, JournalError> {
    let event = sqlx::query_as::<_, JournalEvent>(&format!(
        "SELECT {EVENT_COLUMNS} FROM journal_events WHERE command_id = $1"
    ))
    .bind(command_id)
    .fetch_optional(pool)
    .await?;

    Ok(event)
}

/// Transaction an already-projected command produced, resolved through the
/// journal's transaction links.
pub async fn find_transaction_for_command(
    pool: &PgPool,
    command_id: Uuid,
) -> Result<Option<Uuid>, JournalError> {
    let transaction_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT l.transaction_id
        FROM journal_event_transaction_links l
        JOIN journal_events e ON e.id = l.journal_event_id
        WHERE e.command_id = $1
        ORDER BY l.inserted_at
        LIMIT 1
        "#,
    )
    .bind(command_id)
    .fetch_optional(pool)
    .await?;

    Ok(transaction_id)
}

/// Idempotent link-row inserts used by the outbox relay. Replays hit the
/// unique constraints and fall through `ON CONFLICT DO NOTHING`.
pub async fn insert_command_link(
    pool: &PgPool,
    journal_event_id: Uuid,
    command_id: Uuid,
) -> Result<(), JournalError> {
    sqlx::query(
        r#"
        INSERT INTO journal_event_command_links (id, journal_event_id, command_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (journal_event_id, command_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(journal_event_id)
    .bind(command_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_transaction_link(
    pool: &PgPool,
    journal_event_id: Uuid,
    transaction_id: Uuid,
) -> Result<(), JournalError> {
    sqlx::query(
        r#"
        INSERT INTO journal_event_transaction_links (id, journal_event_id, transaction_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (journal_event_id, transaction_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(journal_event_id)
    .bind(transaction_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_account_link(
    pool: &PgPool,
    journal_event_id: Uuid,
    account_id: Uuid,
) -> Result<(), JournalError> {
    sqlx::query(
        r#"
        INSERT INTO journal_event_account_links (id, journal_event_id, account_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (journal_event_id, account_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(journal_event_id)
    .bind(account_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_digest_is_stable_hex() {
        let payload = serde_json::json!({"status": "posted", "entries": []});
        let first = payload_digest(&payload);
        let second = payload_digest(&payload);

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn payload_digest_distinguishes_payloads() {
        let a = payload_digest(&serde_json::json!({"amount": 1}));
        let b = payload_digest(&serde_json::json!({"amount": 2}));
        assert_ne!(a, b);
    }
}
