//! update_account worker
//!
//! Metadata-only updates; balances never move through this path. The OCC
//! loop covers races with concurrent balance projections bumping the same
//! row's version.

use sqlx::PgPool;

use crate::config::EngineOptions;
use crate::contracts::command_request_v1::AccountPayload;
use crate::repos::account_repo::{self, AccountPatch};
use crate::repos::command_repo::Command;
use crate::services::account_service;
use crate::workers::{self, Projection, WorkerError};

pub async fn run(
    pool: &PgPool,
    opts: &EngineOptions,
    command: &Command,
) -> Result<Projection, WorkerError> {
    let payload: AccountPayload = workers::parse_payload(command)?;

    let account = account_repo::find_by_address(pool, command.instance_id, &payload.address)
        .await
        .map_err(|e| match e {
            account_repo::AccountError::Database(e) => WorkerError::Database(e),
            other => WorkerError::Internal(other.to_string()),
        })?
        .ok_or_else(|| WorkerError::AccountNotFound {
            address: payload.address.clone(),
        })?;

    let patch = AccountPatch {
        name: payload.name.clone(),
        allow_negative: payload.allow_negative,
        metadata: payload.metadata.clone(),
    };

    let updated = workers::with_occ_retry(&opts.retry, "update_account", || {
        account_service::update(pool, command.instance_id, account.id, &patch, command)
    })
    .await?;

    Ok(Projection::Account(updated))
}
