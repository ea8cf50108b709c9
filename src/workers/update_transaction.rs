//! update_transaction worker
//!
//! Resolves the pending transaction the update chain hangs off, takes the
//! single-writer guard row, and projects the restatus (and optional entry
//! replacement) under the OCC retry loop. The guard row is released on
//! every exit path so a retried item never deadlocks on itself.

use sqlx::PgPool;

use crate::config::EngineOptions;
use crate::contracts::command_request_v1::TransactionPayload;
use crate::repos::command_repo::{self, Command, CommandAction};
use crate::repos::journal_repo;
use crate::repos::pending_lookup_repo::{self, PendingLookupError};
use crate::repos::transaction_repo::{self, TransactionStatus};
use crate::services::transaction_service::{self, TransactionUpdate};
use crate::workers::{self, Projection, WorkerError};

pub async fn run(
    pool: &PgPool,
    opts: &EngineOptions,
    command: &Command,
) -> Result<Projection, WorkerError> {
    let payload: TransactionPayload = workers::parse_payload(command)?;

    // The update chain is anchored on the create command with the same
    // (source, source_idempk); per-tenant FIFO guarantees it was projected
    // before this item was claimed.
    let create_command = command_repo::find_create_command(
        pool,
        command.instance_id,
        CommandAction::CreateTransaction,
        &command.source,
        &command.source_idempk,
    )
    .await
    .map_err(command_error)?
    .ok_or_else(|| WorkerError::UpdateTargetMissing {
        cmd_source: command.source.clone(),
        source_idempk: command.source_idempk.clone(),
    })?;

    let transaction_id = journal_repo::find_transaction_for_command(pool, create_command.id)
        .await
        .map_err(|e| {
            let journal_repo::JournalError::Database(e) = e;
            WorkerError::Database(e)
        })?
        .ok_or_else(|| WorkerError::UpdateTargetMissing {
            cmd_source: command.source.clone(),
            source_idempk: command.source_idempk.clone(),
        })?;

    let target = transaction_repo::find_by_id(pool, transaction_id)
        .await
        .map_err(|e| match e {
            transaction_repo::TransactionRepoError::Database(e) => WorkerError::Database(e),
            other => WorkerError::Internal(other.to_string()),
        })?
        .ok_or_else(|| WorkerError::UpdateTargetMissing {
            cmd_source: command.source.clone(),
            source_idempk: command.source_idempk.clone(),
        })?;

    if target.status != TransactionStatus::Pending {
        return Err(WorkerError::UpdateTargetNotPending { transaction_id });
    }

    let replacement = if payload.entries.is_empty() {
        None
    } else {
        Some(workers::resolve_entries(pool, command.instance_id, &payload.entries).await?)
    };

    // Single-writer guard: at most one open update chain per pending
    // transaction. The unique constraint is the authoritative exclusion.
    pending_lookup_repo::insert(pool, command.instance_id, transaction_id)
        .await
        .map_err(|e| match e {
            PendingLookupError::InFlight { transaction_id } => {
                WorkerError::PendingUpdateInFlight { transaction_id }
            }
            PendingLookupError::Database(e) => WorkerError::Database(e),
        })?;

    let change = TransactionUpdate {
        status: payload.status,
        entries: replacement,
    };

    let result = workers::with_occ_retry(&opts.retry, "update_transaction", || {
        transaction_service::update(pool, command.instance_id, transaction_id, &change, command)
    })
    .await;

    // Release the guard whatever happened; a retried item must be able to
    // take it again on its next claim.
    if let Err(e) = pending_lookup_repo::delete(pool, command.instance_id, transaction_id).await {
        tracing::warn!(
            transaction_id = %transaction_id,
            command_id = %command.id,
            error = %e,
            "Failed to release pending transaction lookup"
        );
    }

    let (record, entries) = result?;

    Ok(Projection::Transaction { record, entries })
}

fn command_error(e: command_repo::CommandError) -> WorkerError {
    match e {
        command_repo::CommandError::Database(e) => WorkerError::Database(e),
        other => WorkerError::Internal(other.to_string()),
    }
}
