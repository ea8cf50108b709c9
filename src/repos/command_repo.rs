use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::repos::queue_repo::{self, QueueItem};

/// Command action enum matching database command_action
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "command_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    CreateTransaction,
    UpdateTransaction,
    CreateAccount,
    UpdateAccount,
}

impl CommandAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandAction::CreateTransaction => "create_transaction",
            CommandAction::UpdateTransaction => "update_transaction",
            CommandAction::CreateAccount => "create_account",
            CommandAction::UpdateAccount => "update_account",
        }
    }

    pub fn parse(value: &str) -> Option<CommandAction> {
        match value {
            "create_transaction" => Some(CommandAction::CreateTransaction),
            "update_transaction" => Some(CommandAction::UpdateTransaction),
            "create_account" => Some(CommandAction::CreateAccount),
            "update_account" => Some(CommandAction::UpdateAccount),
            _ => None,
        }
    }

    /// Update actions require the caller to name the revision they are
    /// applying via `update_idempk`.
    pub fn is_update(self) -> bool {
        matches!(
            self,
            CommandAction::UpdateTransaction | CommandAction::UpdateAccount
        )
    }
}

/// Immutable record of an external intent
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Command {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub action: CommandAction,
    pub source: String,
    pub source_idempk: String,
    pub update_idempk: Option<String>,
    pub update_source: Option<String>,
    pub payload: JsonValue,
    pub idempotency_hash: String,
    pub inserted_at: DateTime<Utc>,
}

/// Attributes for persisting a command
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub instance_id: Uuid,
    pub action: CommandAction,
    pub source: String,
    pub source_idempk: String,
    pub update_idempk: Option<String>,
    pub update_source: Option<String>,
    pub payload: JsonValue,
    pub idempotency_hash: String,
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// The same fingerprint was already accepted; carries the original
    /// command id so the caller can look up the prior result.
    #[error("Duplicate command, original id: {existing}")]
    Duplicate { existing: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const COMMAND_COLUMNS: &str = r#"id, instance_id, action, source, source_idempk, update_idempk,
       update_source, payload, idempotency_hash, inserted_at"#;

/// Persist a command and its pending queue item atomically
///
/// The unique index on `(instance_id, idempotency_hash)` makes replayed
/// submissions fail the insert; the original command id is looked up and
/// returned as `Duplicate`.
pub async fn create(pool: &PgPool, attrs: &NewCommand) -> Result<(Command, QueueItem), CommandError> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query_as::<_, Command>(&format!(
        r#"
        INSERT INTO commands (id, instance_id, action, source, source_idempk, update_idempk,
                              update_source, payload, idempotency_hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {COMMAND_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(attrs.instance_id)
    .bind(attrs.action)
    .bind(&attrs.source)
    .bind(&attrs.source_idempk)
    .bind(&attrs.update_idempk)
    .bind(&attrs.update_source)
    .bind(&attrs.payload)
    .bind(&attrs.idempotency_hash)
    .fetch_one(&mut *tx)
    .await;

    let command = match inserted {
        Ok(command) => command,
        Err(sqlx::Error::Database(ref db)) if db.is_unique_violation() => {
            tx.rollback().await?;
            let existing = find_by_hash(pool, attrs.instance_id, &attrs.idempotency_hash)
                .await?
                .map(|c| c.id)
                .ok_or_else(|| {
                    // The conflicting row vanished between insert and lookup;
                    // surface as a transient error so the caller can retry.
                    CommandError::Database(sqlx::Error::RowNotFound)
                })?;
            return Err(CommandError::Duplicate { existing });
        }
        Err(other) => {
            return Err(CommandError::Database(other));
        }
    };

    let item = queue_repo::tx_insert_pending(&mut tx, command.id, command.instance_id).await?;

    tx.commit().await?;

    Ok((command, item))
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Command>, CommandError> {
    let command = sqlx::query_as::<_, Command>(&format!(
        "SELECT {COMMAND_COLUMNS} FROM commands WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(command)
}

pub async fn find_by_hash(
    pool: &PgPool,
    instance_id: Uuid,
    idempotency_hash: &str,
) -> Result<Option<Command>, CommandError> {
    let command = sqlx::query_as::<_, Command>(&format!(
        "SELECT {COMMAND_COLUMNS} FROM commands WHERE instance_id = $1 AND idempotency_hash = $2"
    ))
    .bind(instance_id)
    .bind(idempotency_hash)
    .fetch_optional(pool)
    .await?;

    Ok(command)
}

/// Find the create command an update chain hangs off
pub async fn find_create_command(
    pool: &PgPool,
    instance_id: Uuid,
    action: CommandAction,
    source: &str,
    source_idempk: &str,
) -> Result<Option<Command>, CommandError> {
    let command = sqlx::query_as::<_, Command>(&format!(
        r#"
        SELECT {COMMAND_COLUMNS}
        FROM commands
        WHERE instance_id = $1
          AND action = $2
          AND source = $3
          AND source_idempk = $4
        ORDER BY inserted_at
        LIMIT 1
        "#
    ))
    .bind(instance_id)
    .bind(action)
    .bind(source)
    .bind(source_idempk)
    .fetch_optional(pool)
    .await?;

    Ok(command)
}

pub async fn list_for_instance(
    pool: &PgPool,
    instance_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Command>, CommandError> {
    let commands = sqlx::query_as::<_, Command>(&format!(
        r#"
        SELECT {COMMAND_COLUMNS}
        FROM commands
        WHERE instance_id = $1
        ORDER BY inserted_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(instance_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_through_strings() {
        for action in [
            CommandAction::CreateTransaction,
            CommandAction::UpdateTransaction,
            CommandAction::CreateAccount,
            CommandAction::UpdateAccount,
        ] {
            assert_eq!(CommandAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(CommandAction::parse("delete_account"), None);
    }

    #[test]
    fn update_actions_are_flagged() {
        assert!(CommandAction::UpdateTransaction.is_update());
        assert!(CommandAction::UpdateAccount.is_update());
        assert!(!CommandAction::CreateTransaction.is_update());
        assert!(!CommandAction::CreateAccount.is_update());
    }
}
