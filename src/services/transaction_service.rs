//! Transaction projection service
//!
//! Compiles a create or update command into one database transaction:
//! transaction row, entry rows, OCC-checked balance writes, balance history
//! snapshots, the journal event, and the link fan-out enqueue all commit or
//! roll back together. A failed optimistic version check surfaces as
//! `StaleRow` for the worker's retry loop; nothing here sleeps or retries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::repos::account_repo::{self, Account, AccountError};
use crate::repos::balance_history_repo::{self, BalanceHistoryError};
use crate::repos::command_repo::Command;
use crate::repos::journal_repo::{self, JournalError};
use crate::repos::outbox_repo::{self, OutboxError};
use crate::repos::transaction_repo::{
    self, Entry, NewEntry, TransactionRecord, TransactionRepoError, TransactionStatus,
};
use crate::services::balances::{self, AccountBalances, BalanceError, BalanceTransition};
use crate::services::validation::{self, ValidationError};

/// Attributes for projecting a new transaction
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub status: TransactionStatus,
    pub effective_at: DateTime<Utc>,
    pub metadata: JsonValue,
    pub entries: Vec<NewEntry>,
}

/// Attributes for projecting an update to a pending transaction
///
/// `entries` replaces the transaction's entry set; it is only honored on
/// the transition out of `pending`. When absent, the original entries are
/// restatused.
#[derive(Debug, Clone)]
pub struct TransactionUpdate {
    pub status: TransactionStatus,
    pub entries: Option<Vec<NewEntry>>,
}

#[derive(Debug, Error)]
pub enum TransactionStoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An account's `lock_version` moved between load and write; the whole
    /// projection was rolled back.
    #[error("Stale account row: {account_id}")]
    StaleRow { account_id: Uuid },

    #[error("Transaction not found: {transaction_id}")]
    NotFound { transaction_id: Uuid },

    #[error("Transaction is not pending: {transaction_id}")]
    NotPending { transaction_id: Uuid },

    #[error("Invalid balance state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AccountError> for TransactionStoreError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::StaleRow { account_id } => TransactionStoreError::StaleRow { account_id },
            AccountError::NotFound { account_id } => {
                TransactionStoreError::Validation(ValidationError::AccountNotFound { account_id })
            }
            AccountError::AddressTaken { address } => {
                TransactionStoreError::InvalidState(format!("unexpected address conflict: {address}"))
            }
            AccountError::Database(e) => TransactionStoreError::Database(e),
        }
    }
}

impl From<TransactionRepoError> for TransactionStoreError {
    fn from(e: TransactionRepoError) -> Self {
        match e {
            TransactionRepoError::NotFound(transaction_id) => {
                TransactionStoreError::NotFound { transaction_id }
            }
            TransactionRepoError::Database(e) => TransactionStoreError::Database(e),
        }
    }
}

impl From<BalanceHistoryError> for TransactionStoreError {
    fn from(e: BalanceHistoryError) -> Self {
        let BalanceHistoryError::Database(e) = e;
        TransactionStoreError::Database(e)
    }
}

impl From<JournalError> for TransactionStoreError {
    fn from(e: JournalError) -> Self {
        let JournalError::Database(e) = e;
        TransactionStoreError::Database(e)
    }
}

impl From<OutboxError> for TransactionStoreError {
    fn from(e: OutboxError) -> Self {
        let OutboxError::Database(e) = e;
        TransactionStoreError::Database(e)
    }
}

/// Project a create_transaction command
pub async fn create(
    pool: &PgPool,
    instance_id: Uuid,
    new: &NewTransaction,
    command: &Command,
) -> Result<(TransactionRecord, Vec<Entry>), TransactionStoreError> {
    validation::validate_transition(None, new.status)?;

    let mut tx = pool.begin().await?;

    let account_ids = distinct_account_ids(&new.entries, &[]);
    let accounts = load_accounts(&mut tx, &account_ids).await?;

    validation::validate_entry_set(instance_id, &new.entries, &accounts)?;

    let posted_at = match new.status {
        TransactionStatus::Posted => Some(Utc::now()),
        _ => None,
    };

    let record = transaction_repo::tx_insert(
        &mut tx,
        instance_id,
        new.status,
        new.effective_at,
        posted_at,
        &new.metadata,
    )
    .await?;

    let entries = transaction_repo::tx_insert_entries(&mut tx, record.id, &new.entries).await?;

    let transition = match new.status {
        TransactionStatus::Posted => BalanceTransition::Posted,
        TransactionStatus::Pending => BalanceTransition::Pending,
        // Unreachable behind validate_transition.
        TransactionStatus::Archived => BalanceTransition::Pending,
    };

    for account_id in &account_ids {
        let account = accounts.get(account_id).ok_or_else(|| {
            TransactionStoreError::InvalidState(format!("account {account_id} not loaded"))
        })?;
        let mut next = account.balances();

        for entry in new.entries.iter().filter(|e| e.account_id == *account_id) {
            next = apply(account, &next, entry.entry_type, entry.amount, transition)?;
        }

        finish_account(&mut tx, account, &next, record.id).await?;
    }

    let event =
        journal_repo::tx_insert_event(&mut tx, command.id, instance_id, command.action.as_str(), &command.payload)
            .await?;
    outbox_repo::tx_enqueue(&mut tx, event.id, command.id, Some(record.id), &account_ids).await?;

    tx.commit().await?;

    tracing::info!(
        transaction_id = %record.id,
        instance_id = %instance_id,
        command_id = %command.id,
        status = ?record.status,
        entry_count = entries.len(),
        "Projected transaction create"
    );

    Ok((record, entries))
}

/// Project an update_transaction command against a pending transaction
///
/// Pending holds of the original entries are released; when the target
/// status is `posted` the effective entry set (replacement or original) is
/// applied to the posted pools. The whole reverse-and-reapply runs under
/// the same OCC checks as a create.
pub async fn update(
    pool: &PgPool,
    instance_id: Uuid,
    transaction_id: Uuid,
    change: &TransactionUpdate,
    command: &Command,
) -> Result<(TransactionRecord, Vec<Entry>), TransactionStoreError> {
    let mut tx = pool.begin().await?;

    let (record, old_entries) = transaction_repo::tx_find_with_entries(&mut tx, transaction_id)
        .await?
        .ok_or(TransactionStoreError::NotFound { transaction_id })?;

    if record.status != TransactionStatus::Pending {
        return Err(TransactionStoreError::NotPending { transaction_id });
    }

    validation::validate_transition(Some(record.status), change.status)?;

    let new_entries: Vec<NewEntry> = match &change.entries {
        Some(replacement) => replacement.clone(),
        None => old_entries
            .iter()
            .map(|e| NewEntry {
                account_id: e.account_id,
                entry_type: e.entry_type,
                amount: e.amount,
                currency: e.currency.clone(),
            })
            .collect(),
    };

    let account_ids = distinct_account_ids(&new_entries, &old_entries);
    let accounts = load_accounts(&mut tx, &account_ids).await?;

    validation::validate_entry_set(instance_id, &new_entries, &accounts)?;

    for account_id in &account_ids {
        let account = accounts.get(account_id).ok_or_else(|| {
            TransactionStoreError::InvalidState(format!("account {account_id} not loaded"))
        })?;
        let mut next = account.balances();

        // Release the original holds.
        for entry in old_entries.iter().filter(|e| e.account_id == *account_id) {
            next = apply(
                account,
                &next,
                entry.entry_type,
                entry.amount,
                BalanceTransition::PendingToArchived,
            )?;
        }

        // Apply the effective entries to the posted pools.
        if change.status == TransactionStatus::Posted {
            for entry in new_entries.iter().filter(|e| e.account_id == *account_id) {
                next = apply(
                    account,
                    &next,
                    entry.entry_type,
                    entry.amount,
                    BalanceTransition::Posted,
                )?;
            }
        }

        finish_account(&mut tx, account, &next, transaction_id).await?;
    }

    let entries = match &change.entries {
        Some(replacement) => {
            transaction_repo::tx_replace_entries(&mut tx, transaction_id, replacement).await?
        }
        None => old_entries,
    };

    let posted_at = match change.status {
        TransactionStatus::Posted => Some(Utc::now()),
        _ => None,
    };
    let record = transaction_repo::tx_set_status(&mut tx, transaction_id, change.status, posted_at)
        .await?;

    let event =
        journal_repo::tx_insert_event(&mut tx, command.id, instance_id, command.action.as_str(), &command.payload)
            .await?;
    outbox_repo::tx_enqueue(&mut tx, event.id, command.id, Some(transaction_id), &account_ids)
        .await?;

    tx.commit().await?;

    tracing::info!(
        transaction_id = %transaction_id,
        instance_id = %instance_id,
        command_id = %command.id,
        status = ?record.status,
        "Projected transaction update"
    );

    Ok((record, entries))
}

fn distinct_account_ids(new_entries: &[NewEntry], old_entries: &[Entry]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = new_entries
        .iter()
        .map(|e| e.account_id)
        .chain(old_entries.iter().map(|e| e.account_id))
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

async fn load_accounts(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account_ids: &[Uuid],
) -> Result<HashMap<Uuid, Account>, TransactionStoreError> {
    let accounts = account_repo::tx_find_by_ids(tx, account_ids).await?;
    Ok(accounts.into_iter().map(|a| (a.id, a)).collect())
}

fn apply(
    account: &Account,
    balances: &AccountBalances,
    entry_type: crate::repos::transaction_repo::EntryType,
    amount: i64,
    transition: BalanceTransition,
) -> Result<AccountBalances, TransactionStoreError> {
    balances::apply_entry(account.normal_side, balances, entry_type, amount, transition, None)
        .map_err(|e| match e {
            BalanceError::PendingUnderflow { .. } => {
                TransactionStoreError::InvalidState(format!(
                    "pending balance underflow on account {}: {e}",
                    account.id
                ))
            }
            BalanceError::NegativeAvailable { available } => {
                TransactionStoreError::Validation(ValidationError::NegativeAvailable {
                    account_id: account.id,
                    available,
                })
            }
        })
}

/// Non-negativity check, OCC balance write, and history snapshot for one
/// account of the projection.
async fn finish_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account: &Account,
    next: &AccountBalances,
    transaction_id: Uuid,
) -> Result<(), TransactionStoreError> {
    balances::ensure_available(account.allow_negative, next).map_err(|e| match e {
        BalanceError::NegativeAvailable { available } => {
            TransactionStoreError::Validation(ValidationError::NegativeAvailable {
                account_id: account.id,
                available,
            })
        }
        other => TransactionStoreError::InvalidState(other.to_string()),
    })?;

    account_repo::tx_apply_balances(tx, account.id, account.lock_version, next).await?;
    balance_history_repo::tx_insert(tx, account.id, transaction_id, next).await?;

    Ok(())
}
