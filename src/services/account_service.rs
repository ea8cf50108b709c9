//! Account projection service
//!
//! Creates and updates account rows together with their journal event and
//! link fan-out enqueue, in one database transaction. Balance columns are
//! never written here; they only move through transaction projections.

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::repos::account_repo::{self, Account, AccountError, AccountPatch, NewAccount};
use crate::repos::command_repo::Command;
use crate::repos::journal_repo::{self, JournalError};
use crate::repos::outbox_repo::{self, OutboxError};

#[derive(Debug, Error)]
pub enum AccountServiceError {
    #[error("Account address already taken: {address}")]
    AddressTaken { address: String },

    #[error("Account not found: {account_id}")]
    NotFound { account_id: Uuid },

    #[error("Stale account row: {account_id}")]
    StaleRow { account_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AccountError> for AccountServiceError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::AddressTaken { address } => AccountServiceError::AddressTaken { address },
            AccountError::NotFound { account_id } => AccountServiceError::NotFound { account_id },
            AccountError::StaleRow { account_id } => AccountServiceError::StaleRow { account_id },
            AccountError::Database(e) => AccountServiceError::Database(e),
        }
    }
}

impl From<JournalError> for AccountServiceError {
    fn from(e: JournalError) -> Self {
        let JournalError::Database(e) = e;
        AccountServiceError::Database(e)
    }
}

impl From<OutboxError> for AccountServiceError {
    fn from(e: OutboxError) -> Self {
        let OutboxError::Database(e) = e;
        AccountServiceError::Database(e)
    }
}

/// Project a create_account command
pub async fn create(
    pool: &PgPool,
    instance_id: Uuid,
    attrs: &NewAccount,
    command: &Command,
) -> Result<Account, AccountServiceError> {
    let mut tx = pool.begin().await?;

    let account = account_repo::tx_create(&mut tx, instance_id, attrs).await?;

    let event = journal_repo::tx_insert_event(
        &mut tx,
        command.id,
        instance_id,
        command.action.as_str(),
        &command.payload,
    )
    .await?;
    outbox_repo::tx_enqueue(&mut tx, event.id, command.id, None, &[account.id]).await?;

    tx.commit().await?;

    tracing::info!(
        account_id = %account.id,
        instance_id = %instance_id,
        command_id = %command.id,
        address = %account.address,
        "Projected account create"
    );

    Ok(account)
}

/// Project an update_account command (metadata fields only)
pub async fn update(
    pool: &PgPool,
    instance_id: Uuid,
    account_id: Uuid,
    patch: &AccountPatch,
    command: &Command,
) -> Result<Account, AccountServiceError> {
    let mut tx = pool.begin().await?;

    let current = account_repo::tx_find_by_ids(&mut tx, &[account_id])
        .await?
        .into_iter()
        .next()
        .ok_or(AccountServiceError::NotFound { account_id })?;

    let account =
        account_repo::tx_update_metadata(&mut tx, account_id, current.lock_version, patch).await?;

    let event = journal_repo::tx_insert_event(
        &mut tx,
        command.id,
        instance_id,
        command.action.as_str(),
        &command.payload,
    )
    .await?;
    outbox_repo::tx_enqueue(&mut tx, event.id, command.id, None, &[account.id]).await?;

    tx.commit().await?;

    tracing::info!(
        account_id = %account.id,
        instance_id = %instance_id,
        command_id = %command.id,
        lock_version = account.lock_version,
        "Projected account update"
    );

    Ok(account)
}
