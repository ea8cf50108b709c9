//! Command workers
//!
//! A worker translates one claimed command into its projection, running the
//! projection service inside a bounded OCC retry loop. Workers never touch
//! the queue; the processor maps the outcome onto the queue item.

pub mod create_account;
pub mod create_transaction;
pub mod update_account;
pub mod update_transaction;

use sqlx::PgPool;
use thiserror::Error;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::EngineOptions;
use crate::repos::account_repo::Account;
use crate::repos::command_repo::{Command, CommandAction};
use crate::repos::transaction_repo::{Entry, TransactionRecord};
use crate::retry::RetryPolicy;
use crate::services::account_service::AccountServiceError;
use crate::services::transaction_service::TransactionStoreError;
use crate::services::validation::ValidationError;

/// What a successful command projected
#[derive(Debug, Clone)]
pub enum Projection {
    Transaction {
        record: TransactionRecord,
        entries: Vec<Entry>,
    },
    Account(Account),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid command payload: {0}")]
    InvalidPayload(String),

    #[error("Account address already taken: {address}")]
    AddressTaken { address: String },

    #[error("Account not found: {address}")]
    AccountNotFound { address: String },

    #[error("No prior create_transaction for source={cmd_source}, source_idempk={source_idempk}")]
    UpdateTargetMissing { cmd_source: String, source_idempk: String },

    #[error("Update target transaction {transaction_id} is not pending")]
    UpdateTargetNotPending { transaction_id: Uuid },

    #[error("Pending update already in flight for transaction {transaction_id}")]
    PendingUpdateInFlight { transaction_id: Uuid },

    #[error("OCC retries exhausted after {attempts} attempts")]
    OccTimeout { attempts: u32 },

    #[error("Inconsistent projection state: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// How the processor should treat a worker failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Business-rule rejection; never succeeds on retry
    Terminal,
    /// The worker's own OCC retry budget ran out
    OccTimeout,
    /// Transient condition; eligible for reclaim after backoff
    Transient,
}

impl WorkerError {
    pub fn class(&self) -> FailureClass {
        match self {
            WorkerError::Validation(_)
            | WorkerError::InvalidPayload(_)
            | WorkerError::AddressTaken { .. }
            | WorkerError::AccountNotFound { .. }
            | WorkerError::UpdateTargetMissing { .. }
            | WorkerError::UpdateTargetNotPending { .. }
            | WorkerError::Internal(_) => FailureClass::Terminal,
            WorkerError::OccTimeout { .. } => FailureClass::OccTimeout,
            WorkerError::PendingUpdateInFlight { .. } | WorkerError::Database(_) => {
                FailureClass::Transient
            }
        }
    }
}

impl From<TransactionStoreError> for WorkerError {
    fn from(e: TransactionStoreError) -> Self {
        match e {
            TransactionStoreError::Validation(e) => WorkerError::Validation(e),
            TransactionStoreError::NotFound { transaction_id } => WorkerError::Internal(format!(
                "projection target transaction {transaction_id} disappeared"
            )),
            TransactionStoreError::NotPending { transaction_id } => {
                WorkerError::UpdateTargetNotPending { transaction_id }
            }
            TransactionStoreError::InvalidState(msg) => WorkerError::Internal(msg),
            TransactionStoreError::StaleRow { account_id } => WorkerError::Internal(format!(
                "stale row for account {account_id} escaped the retry loop"
            )),
            TransactionStoreError::Database(e) => WorkerError::Database(e),
        }
    }
}

impl From<AccountServiceError> for WorkerError {
    fn from(e: AccountServiceError) -> Self {
        match e {
            AccountServiceError::AddressTaken { address } => WorkerError::AddressTaken { address },
            AccountServiceError::NotFound { account_id } => WorkerError::Internal(format!(
                "projection target account {account_id} disappeared"
            )),
            AccountServiceError::StaleRow { account_id } => WorkerError::Internal(format!(
                "stale row for account {account_id} escaped the retry loop"
            )),
            AccountServiceError::Database(e) => WorkerError::Database(e),
        }
    }
}

/// Projection errors that participate in the OCC retry loop
pub(crate) trait OccConflict {
    fn is_stale(&self) -> bool;
}

impl OccConflict for TransactionStoreError {
    fn is_stale(&self) -> bool {
        matches!(self, TransactionStoreError::StaleRow { .. })
    }
}

impl OccConflict for AccountServiceError {
    fn is_stale(&self) -> bool {
        matches!(self, AccountServiceError::StaleRow { .. })
    }
}

/// Run a projection attempt under the OCC retry protocol
///
/// `StaleRow` failures are retried up to `max_retries` times with
/// millisecond-scaled exponential backoff; everything else passes through
/// on the first occurrence. The projection service rolls its transaction
/// back before the error ever reaches this loop.
pub(crate) async fn with_occ_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    context: &str,
    operation: F,
) -> Result<T, WorkerError>
where
    E: OccConflict + Into<WorkerError> + std::fmt::Display,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        context = %context,
                        attempt = attempt,
                        "Projection committed after OCC retry"
                    );
                }
                return Ok(value);
            }
            Err(e) if e.is_stale() => {
                if attempt >= policy.max_retries.max(1) {
                    tracing::warn!(
                        context = %context,
                        attempts = attempt,
                        error = %e,
                        "OCC retries exhausted"
                    );
                    return Err(WorkerError::OccTimeout { attempts: attempt });
                }

                let backoff = policy.backoff_duration_ms(attempt);
                tracing::debug!(
                    context = %context,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Stale account row, retrying projection"
                );
                sleep(backoff).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Parse the stored payload into the action's typed shape
pub(crate) fn parse_payload<T: serde::de::DeserializeOwned>(
    command: &Command,
) -> Result<T, WorkerError> {
    serde_json::from_value(command.payload.clone())
        .map_err(|e| WorkerError::InvalidPayload(e.to_string()))
}

/// Resolve entry inputs to accounts and translate signed amounts
///
/// A positive amount on a debit-normal account becomes a debit entry, a
/// negative one a credit entry; mirrored for credit-normal accounts. The
/// stored entry amount is the magnitude.
pub(crate) async fn resolve_entries(
    pool: &PgPool,
    instance_id: Uuid,
    inputs: &[crate::contracts::command_request_v1::EntryInput],
) -> Result<Vec<crate::repos::transaction_repo::NewEntry>, WorkerError> {
    use crate::repos::{account_repo, transaction_repo::NewEntry};
    use crate::services::balances::sign_to_entry_type;

    let mut entries = Vec::with_capacity(inputs.len());

    for input in inputs {
        let account = account_repo::find_by_address(pool, instance_id, &input.account_address)
            .await
            .map_err(|e| match e {
                account_repo::AccountError::Database(e) => WorkerError::Database(e),
                other => WorkerError::Internal(other.to_string()),
            })?
            .ok_or_else(|| WorkerError::AccountNotFound {
                address: input.account_address.clone(),
            })?;

        let amount = input
            .amount
            .checked_abs()
            .ok_or(WorkerError::Validation(ValidationError::InvalidAmount {
                amount: input.amount,
            }))?;

        entries.push(NewEntry {
            account_id: account.id,
            entry_type: sign_to_entry_type(account.normal_side, input.amount),
            amount,
            currency: input.currency.clone(),
        });
    }

    Ok(entries)
}

/// Dispatch a claimed command to the worker for its action
pub async fn execute(
    pool: &PgPool,
    opts: &EngineOptions,
    command: &Command,
) -> Result<Projection, WorkerError> {
    match command.action {
        CommandAction::CreateTransaction => create_transaction::run(pool, opts, command).await,
        CommandAction::UpdateTransaction => update_transaction::run(pool, opts, command).await,
        CommandAction::CreateAccount => create_account::run(pool, opts, command).await,
        CommandAction::UpdateAccount => update_account::run(pool, opts, command).await,
    }
}
