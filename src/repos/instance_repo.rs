use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

/// Instance model representing one tenant
///
/// Every other row in the engine hangs off an instance through
/// `instance_id`. Instances are created explicitly and never deleted while
/// they own accounts, transactions, or commands.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Instance {
    pub id: Uuid,
    pub address: String,
    pub config: JsonValue,
    pub metadata: JsonValue,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Instance address already taken: {address}")]
    AddressTaken { address: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Create an instance with a unique human-readable address
pub async fn create(
    pool: &PgPool,
    address: &str,
    config: JsonValue,
    metadata: JsonValue,
) -> Result<Instance, InstanceError> {
    let instance = sqlx::query_as::<_, Instance>(
        r#"
        INSERT INTO instances (id, address, config, metadata)
        VALUES ($1, $2, $3, $4)
        RETURNING id, address, config, metadata, inserted_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(address)
    .bind(config)
    .bind(metadata)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => InstanceError::AddressTaken {
            address: address.to_string(),
        },
        other => InstanceError::Database(other),
    })?;

    Ok(instance)
}

pub async fn find_by_address(
    pool: &PgPool,
    address: &str,
) -> Result<Option<Instance>, InstanceError> {
    let instance = sqlx::query_as::<_, Instance>(
        r#"
        SELECT id, address, config, metadata, inserted_at
        FROM instances
        WHERE address = $1
        "#,
    )
    .bind(address)
    .fetch_optional(pool)
    .await?;

    Ok(instance)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Instance>, InstanceError> {
    let instance = sqlx::query_as::<_, Instance>(
        r#"
        SELECT id, address, config, metadata, inserted_at
        FROM instances
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(instance)
}
