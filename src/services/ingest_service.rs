//! Command intake
//!
//! Normalizes an inbound request into a typed command record, fingerprints
//! it, and persists it together with its pending queue item. The
//! synchronous path then claims and executes the item inline; the
//! enqueue-only path leaves it to the instance processor.
//!
//! Rejections here (`InstanceNotFound`, `AccountNotFound`,
//! `ActionNotSupported`, payload shape errors) store no command at all.

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, EngineOptions};
use crate::contracts::command_request_v1::{AccountPayload, CommandRequestV1, TransactionPayload};
use crate::processor;
use crate::repos::command_repo::{self, Command, CommandAction, CommandError, NewCommand};
use crate::repos::journal_repo;
use crate::repos::queue_repo::{self, QueueError, QueueItem};
use crate::repos::transaction_repo::{self, TransactionStatus};
use crate::repos::{account_repo, instance_repo};
use crate::services::idempotency;
use crate::workers::{self, Projection, WorkerError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Instance not found: {address}")]
    InstanceNotFound { address: String },

    #[error("Account not found: {address}")]
    AccountNotFound { address: String },

    #[error("Action not supported: {action}")]
    ActionNotSupported { action: String },

    #[error("Invalid request: {field}: {message}")]
    ValidationFailed { field: String, message: String },

    /// Idempotent replay; the caller should look up the prior result under
    /// the original command id.
    #[error("Duplicate command, original id: {existing}")]
    Duplicate { existing: Uuid },

    #[error("No prior create_transaction for source={cmd_source}, source_idempk={source_idempk}")]
    UpdateTargetMissing { cmd_source: String, source_idempk: String },

    #[error("Update target transaction {transaction_id} is not pending")]
    UpdateTargetNotPending { transaction_id: Uuid },

    /// Synchronous execution failed after the command was stored; the
    /// queue item carries the error record.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CommandError> for IngestError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Duplicate { existing } => IngestError::Duplicate { existing },
            CommandError::Database(e) => IngestError::Database(e),
        }
    }
}

/// Result of a synchronous submission
#[derive(Debug)]
pub enum SyncOutcome {
    /// The command was executed inline
    Completed {
        command: Command,
        projection: Projection,
    },
    /// A background processor claimed the item first; the caller polls the
    /// command id for the result.
    Enqueued { command: Command, item: QueueItem },
}

/// Accept a command and enqueue it for asynchronous processing
pub async fn submit(
    pool: &PgPool,
    config: &Config,
    request: &CommandRequestV1,
) -> Result<(Command, QueueItem), IngestError> {
    let action = CommandAction::parse(&request.action).ok_or_else(|| {
        IngestError::ActionNotSupported {
            action: request.action.clone(),
        }
    })?;

    let instance = instance_repo::find_by_address(pool, &request.instance_address)
        .await
        .map_err(instance_error)?
        .ok_or_else(|| IngestError::InstanceNotFound {
            address: request.instance_address.clone(),
        })?;

    if action.is_update() && request.update_idempk.is_none() {
        return Err(IngestError::ValidationFailed {
            field: "update_idempk".to_string(),
            message: "required for update actions".to_string(),
        });
    }

    validate_payload(pool, instance.id, action, request).await?;

    if action == CommandAction::UpdateTransaction {
        check_update_target(pool, instance.id, request).await?;
    }

    let idempotency_hash = idempotency::fingerprint(
        &config.idempotency_secret,
        action,
        &request.instance_address,
        &request.source,
        &request.source_idempk,
        request.update_source.as_deref(),
        request.update_idempk.as_deref(),
    )
    .map_err(|e| IngestError::ValidationFailed {
        field: "idempotency".to_string(),
        message: e.to_string(),
    })?;

    let attrs = NewCommand {
        instance_id: instance.id,
        action,
        source: request.source.clone(),
        source_idempk: request.source_idempk.clone(),
        update_idempk: request.update_idempk.clone(),
        update_source: request.update_source.clone(),
        payload: request.payload.clone(),
        idempotency_hash,
    };

    let (command, item) = command_repo::create(pool, &attrs).await?;

    tracing::info!(
        command_id = %command.id,
        instance_id = %instance.id,
        action = %action.as_str(),
        source = %command.source,
        "Command accepted"
    );

    Ok((command, item))
}

/// Accept a command and execute it inline
///
/// The queue item goes through the same claim/settle protocol as
/// asynchronous processing, so the idempotency, audit, and error records
/// are identical on both paths.
pub async fn submit_sync(
    pool: &PgPool,
    config: &Config,
    request: &CommandRequestV1,
) -> Result<SyncOutcome, IngestError> {
    let (command, item) = submit(pool, config, request).await?;

    let opts = EngineOptions::from(config);
    let processor_id = format!("{}-sync", opts.processor_name);

    let claimed = match queue_repo::claim(pool, item.id, item.row_version, &processor_id).await {
        Ok(claimed) => claimed,
        Err(QueueError::AlreadyClaimed { .. }) => {
            return Ok(SyncOutcome::Enqueued { command, item });
        }
        Err(QueueError::NotFound { .. }) => {
            return Ok(SyncOutcome::Enqueued { command, item });
        }
        Err(QueueError::Database(e)) => return Err(IngestError::Database(e)),
    };

    let result = workers::execute(pool, &opts, &command).await;
    processor::settle(pool, &opts, &claimed, &result).await;

    match result {
        Ok(projection) => Ok(SyncOutcome::Completed {
            command,
            projection,
        }),
        Err(e) => Err(IngestError::Worker(e)),
    }
}

/// Shape-check the payload for the action and resolve referenced accounts
///
/// Read-only: account rows are queried to confirm existence, never
/// mutated.
async fn validate_payload(
    pool: &PgPool,
    instance_id: Uuid,
    action: CommandAction,
    request: &CommandRequestV1,
) -> Result<(), IngestError> {
    match action {
        CommandAction::CreateTransaction | CommandAction::UpdateTransaction => {
            let payload: TransactionPayload = serde_json::from_value(request.payload.clone())
                .map_err(|e| IngestError::ValidationFailed {
                    field: "payload".to_string(),
                    message: e.to_string(),
                })?;

            for entry in &payload.entries {
                let found =
                    account_repo::find_by_address(pool, instance_id, &entry.account_address)
                        .await
                        .map_err(account_error)?;
                if found.is_none() {
                    return Err(IngestError::AccountNotFound {
                        address: entry.account_address.clone(),
                    });
                }
            }
        }
        CommandAction::CreateAccount | CommandAction::UpdateAccount => {
            let payload: AccountPayload = serde_json::from_value(request.payload.clone())
                .map_err(|e| IngestError::ValidationFailed {
                    field: "payload".to_string(),
                    message: e.to_string(),
                })?;

            if action == CommandAction::CreateAccount {
                if payload.account_type.is_none() {
                    return Err(IngestError::ValidationFailed {
                        field: "type".to_string(),
                        message: "required for create_account".to_string(),
                    });
                }
                if payload.currency.is_none() {
                    return Err(IngestError::ValidationFailed {
                        field: "currency".to_string(),
                        message: "required for create_account".to_string(),
                    });
                }
            }

            if action == CommandAction::UpdateAccount {
                let found = account_repo::find_by_address(pool, instance_id, &payload.address)
                    .await
                    .map_err(account_error)?;
                if found.is_none() {
                    return Err(IngestError::AccountNotFound {
                        address: payload.address.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// Preconditions for an update_transaction command
///
/// The create command for the same `(source, source_idempk)` must already
/// exist. If its projection has landed, the target transaction must still
/// be pending; if it is still queued, the worker re-resolves at processing
/// time under per-tenant FIFO ordering.
async fn check_update_target(
    pool: &PgPool,
    instance_id: Uuid,
    request: &CommandRequestV1,
) -> Result<(), IngestError> {
    let create_command = command_repo::find_create_command(
        pool,
        instance_id,
        CommandAction::CreateTransaction,
        &request.source,
        &request.source_idempk,
    )
    .await?
    .ok_or_else(|| IngestError::UpdateTargetMissing {
        cmd_source: request.source.clone(),
        source_idempk: request.source_idempk.clone(),
    })?;

    let projected = journal_repo::find_transaction_for_command(pool, create_command.id)
        .await
        .map_err(journal_error)?;

    if let Some(transaction_id) = projected {
        let target = transaction_repo::find_by_id(pool, transaction_id)
            .await
            .map_err(transaction_error)?;

        if let Some(target) = target {
            if target.status != TransactionStatus::Pending {
                return Err(IngestError::UpdateTargetNotPending { transaction_id });
            }
        }
    }

    Ok(())
}

fn instance_error(e: instance_repo::InstanceError) -> IngestError {
    match e {
        instance_repo::InstanceError::Database(e) => IngestError::Database(e),
        other => IngestError::ValidationFailed {
            field: "instance".to_string(),
            message: other.to_string(),
        },
    }
}

fn account_error(e: account_repo::AccountError) -> IngestError {
    match e {
        account_repo::AccountError::Database(e) => IngestError::Database(e),
        other => IngestError::ValidationFailed {
            field: "account".to_string(),
            message: other.to_string(),
        },
    }
}

fn journal_error(e: journal_repo::JournalError) -> IngestError {
    let journal_repo::JournalError::Database(e) = e;
    IngestError::Database(e)
}

fn transaction_error(e: transaction_repo::TransactionRepoError) -> IngestError {
    match e {
        transaction_repo::TransactionRepoError::Database(e) => IngestError::Database(e),
        other => IngestError::ValidationFailed {
            field: "transaction".to_string(),
            message: other.to_string(),
        },
    }
}
