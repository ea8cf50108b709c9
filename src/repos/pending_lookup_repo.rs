use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PendingLookupError {
    /// Another update command already holds the guard row for this
    /// transaction.
    #[error("Pending update already in flight for transaction {transaction_id}")]
    InFlight { transaction_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Take the single-writer guard for a pending transaction
///
/// The unique constraint on `(instance_id, transaction_id)` is the
/// authoritative exclusion; per-tenant processor serialization only makes
/// collisions rare, the synchronous intake path can still race.
pub async fn insert(
    pool: &PgPool,
    instance_id: Uuid,
    transaction_id: Uuid,
) -> Result<(), PendingLookupError> {
    sqlx::query(
        r#"
        INSERT INTO pending_transaction_lookup (instance_id, transaction_id)
        VALUES ($1, $2)
        "#,
    )
    .bind(instance_id)
    .bind(transaction_id)
    .execute(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            PendingLookupError::InFlight { transaction_id }
        }
        other => PendingLookupError::Database(other),
    })?;

    Ok(())
}

/// Release the guard row when the update command completes
pub async fn delete(
    pool: &PgPool,
    instance_id: Uuid,
    transaction_id: Uuid,
) -> Result<(), PendingLookupError> {
    sqlx::query(
        r#"
        DELETE FROM pending_transaction_lookup
        WHERE instance_id = $1 AND transaction_id = $2
        "#,
    )
    .bind(instance_id)
    .bind(transaction_id)
    .execute(pool)
    .await?;

    Ok(())
}
