use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::services::balances::{AccountBalances, Balance};

/// Account type enum matching database account_type
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "account_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    /// Polarity derived from the account type: asset and expense accounts
    /// grow on the debit side, the rest on the credit side.
    pub fn normal_side(self) -> NormalSide {
        match self {
            AccountType::Asset | AccountType::Expense => NormalSide::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                NormalSide::Credit
            }
        }
    }
}

/// Normal side enum matching database normal_side
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "normal_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NormalSide {
    Debit,
    Credit,
}

/// Account model with embedded balance columns and OCC version
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub address: String,
    pub name: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub normal_side: NormalSide,
    pub currency: String,
    pub allow_negative: bool,
    pub posted_debit: i64,
    pub posted_credit: i64,
    pub pending_debit: i64,
    pub pending_credit: i64,
    pub available: i64,
    pub lock_version: i32,
    pub metadata: JsonValue,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// View of the embedded balance columns as the arithmetic module's
    /// working representation.
    pub fn balances(&self) -> AccountBalances {
        AccountBalances {
            posted: Balance::from_sides(self.normal_side, self.posted_debit, self.posted_credit),
            pending: Balance::from_sides(self.normal_side, self.pending_debit, self.pending_credit),
            available: self.available,
        }
    }
}

/// Attributes for creating an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub address: String,
    pub name: Option<String>,
    pub account_type: AccountType,
    pub currency: String,
    pub allow_negative: bool,
    pub metadata: JsonValue,
}

/// Metadata-only attributes for updating an account
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub name: Option<String>,
    pub allow_negative: Option<bool>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account address already taken: {address}")]
    AddressTaken { address: String },

    #[error("Account not found: {account_id}")]
    NotFound { account_id: Uuid },

    #[error("Stale account row: {account_id}")]
    StaleRow { account_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const ACCOUNT_COLUMNS: &str = r#"id, instance_id, address, name, type, normal_side, currency,
       allow_negative, posted_debit, posted_credit, pending_debit, pending_credit,
       available, lock_version, metadata, inserted_at, updated_at"#;

/// Insert an account with zeroed balances
///
/// The normal side is derived from the account type, never supplied by the
/// caller. Uniqueness of `(instance_id, address)` is enforced by the
/// database and surfaced as `AddressTaken`.
pub async fn tx_create(
    tx: &mut Transaction<'_, Postgres>,
    instance_id: Uuid,
    attrs: &NewAccount,
) -> Result<Account, AccountError> {
    let account = sqlx::query_as::<_, Account>(&format!(
        r#"
        INSERT INTO accounts (id, instance_id, address, name, type, normal_side, currency,
                              allow_negative, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {ACCOUNT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(instance_id)
    .bind(&attrs.address)
    .bind(&attrs.name)
    .bind(attrs.account_type)
    .bind(attrs.account_type.normal_side())
    .bind(&attrs.currency)
    .bind(attrs.allow_negative)
    .bind(&attrs.metadata)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => AccountError::AddressTaken {
            address: attrs.address.clone(),
        },
        other => AccountError::Database(other),
    })?;

    Ok(account)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Account>, AccountError> {
    let account = sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

pub async fn find_by_address(
    pool: &PgPool,
    instance_id: Uuid,
    address: &str,
) -> Result<Option<Account>, AccountError> {
    let account = sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE instance_id = $1 AND address = $2"
    ))
    .bind(instance_id)
    .bind(address)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

/// Load a set of accounts inside the projection transaction
///
/// Returns whatever subset exists; the validator reports the missing ones.
pub async fn tx_find_by_ids(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
) -> Result<Vec<Account>, AccountError> {
    let accounts = sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ANY($1)"
    ))
    .bind(ids)
    .fetch_all(&mut **tx)
    .await?;

    Ok(accounts)
}

pub async fn list_for_instance(
    pool: &PgPool,
    instance_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Account>, AccountError> {
    let accounts = sqlx::query_as::<_, Account>(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts
        WHERE instance_id = $1
        ORDER BY address
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(instance_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(accounts)
}

/// Write new balance columns under an optimistic version check
///
/// The row is only updated when `lock_version` still matches what the
/// caller observed when it loaded the account; zero affected rows means a
/// concurrent writer got there first and the whole projection transaction
/// must be rolled back and retried.
pub async fn tx_apply_balances(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    expected_version: i32,
    balances: &AccountBalances,
) -> Result<Account, AccountError> {
    let account = sqlx::query_as::<_, Account>(&format!(
        r#"
        UPDATE accounts
        SET posted_debit = $3,
            posted_credit = $4,
            pending_debit = $5,
            pending_credit = $6,
            available = $7,
            lock_version = lock_version + 1,
            updated_at = NOW()
        WHERE id = $1 AND lock_version = $2
        RETURNING {ACCOUNT_COLUMNS}
        "#
    ))
    .bind(account_id)
    .bind(expected_version)
    .bind(balances.posted.debit)
    .bind(balances.posted.credit)
    .bind(balances.pending.debit)
    .bind(balances.pending.credit)
    .bind(balances.available)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AccountError::StaleRow { account_id })?;

    Ok(account)
}

/// Update metadata fields under an optimistic version check
///
/// Balance columns are never touched here; they only move through
/// [`tx_apply_balances`] inside a projection transaction.
pub async fn tx_update_metadata(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    expected_version: i32,
    patch: &AccountPatch,
) -> Result<Account, AccountError> {
    let account = sqlx::query_as::<_, Account>(&format!(
        r#"
        UPDATE accounts
        SET name = COALESCE($3, name),
            allow_negative = COALESCE($4, allow_negative),
            metadata = COALESCE($5, metadata),
            lock_version = lock_version + 1,
            updated_at = NOW()
        WHERE id = $1 AND lock_version = $2
        RETURNING {ACCOUNT_COLUMNS}
        "#
    ))
    .bind(account_id)
    .bind(expected_version)
    .bind(&patch.name)
    .bind(patch.allow_negative)
    .bind(&patch.metadata)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AccountError::StaleRow { account_id })?;

    Ok(account)
}
