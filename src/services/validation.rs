//! Transaction validation
//!
//! Side-effect-free checks over an entry set and the accounts it touches.
//! The caller loads the account rows (typically inside the projection
//! transaction) and hands them in; nothing here mutates state.
//!
//! Validators operate on any entry representation through [`EntryView`],
//! so persisted rows and in-flight drafts go through the same code path.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::repos::account_repo::Account;
use crate::repos::transaction_repo::{Entry, EntryType, NewEntry, TransactionStatus};

/// Capability view over one entry, independent of its representation
pub trait EntryView {
    fn account_id(&self) -> Uuid;
    fn entry_type(&self) -> EntryType;
    fn amount(&self) -> i64;
    fn currency(&self) -> &str;
}

impl EntryView for Entry {
    fn account_id(&self) -> Uuid {
        self.account_id
    }
    fn entry_type(&self) -> EntryType {
        self.entry_type
    }
    fn amount(&self) -> i64 {
        self.amount
    }
    fn currency(&self) -> &str {
        &self.currency
    }
}

impl EntryView for NewEntry {
    fn account_id(&self) -> Uuid {
        self.account_id
    }
    fn entry_type(&self) -> EntryType {
        self.entry_type
    }
    fn amount(&self) -> i64 {
        self.amount
    }
    fn currency(&self) -> &str {
        &self.currency
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A transaction needs at least 2 entries, got {count}")]
    TooFewEntries { count: usize },

    #[error("Debits and credits are unbalanced for {currency}: debits={debits}, credits={credits}")]
    UnbalancedByCurrency {
        currency: String,
        debits: i64,
        credits: i64,
    },

    #[error("Entry currency {got} does not match account {account_id} currency {expected}")]
    CurrencyMismatch {
        account_id: Uuid,
        expected: String,
        got: String,
    },

    #[error("Account {account_id} belongs to a different instance")]
    CrossInstance { account_id: Uuid },

    #[error("Account not found: {account_id}")]
    AccountNotFound { account_id: Uuid },

    #[error("Illegal status transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: Option<TransactionStatus>,
        to: TransactionStatus,
    },

    #[error("Entry amount out of range: {amount}")]
    InvalidAmount { amount: i64 },

    #[error("Available balance on account {account_id} would become negative: {available}")]
    NegativeAvailable { account_id: Uuid, available: i64 },
}

impl ValidationError {
    /// Field name for changeset-style error envelopes
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::TooFewEntries { .. }
            | ValidationError::UnbalancedByCurrency { .. } => "entries",
            ValidationError::CurrencyMismatch { .. } => "currency",
            ValidationError::CrossInstance { .. } | ValidationError::AccountNotFound { .. } => {
                "account"
            }
            ValidationError::IllegalTransition { .. } => "status",
            ValidationError::InvalidAmount { .. } => "amount",
            ValidationError::NegativeAvailable { .. } => "available",
        }
    }
}

/// Validate an entry set against the accounts it references
///
/// Checks, in order: entry count, account existence, instance ownership,
/// currency agreement, non-negative amounts, and per-currency
/// debit/credit balance.
pub fn validate_entry_set<E: EntryView>(
    instance_id: Uuid,
    entries: &[E],
    accounts: &HashMap<Uuid, Account>,
) -> Result<(), ValidationError> {
    if entries.len() < 2 {
        return Err(ValidationError::TooFewEntries {
            count: entries.len(),
        });
    }

    for entry in entries {
        let account = accounts
            .get(&entry.account_id())
            .ok_or(ValidationError::AccountNotFound {
                account_id: entry.account_id(),
            })?;

        if account.instance_id != instance_id {
            return Err(ValidationError::CrossInstance {
                account_id: account.id,
            });
        }

        if account.currency != entry.currency() {
            return Err(ValidationError::CurrencyMismatch {
                account_id: account.id,
                expected: account.currency.clone(),
                got: entry.currency().to_string(),
            });
        }

        if entry.amount() < 0 {
            return Err(ValidationError::InvalidAmount {
                amount: entry.amount(),
            });
        }
    }

    // Per-currency debit/credit sums must agree.
    let mut sums: HashMap<&str, (i64, i64)> = HashMap::new();
    for entry in entries {
        let (debits, credits) = sums.entry(entry.currency()).or_insert((0, 0));
        match entry.entry_type() {
            EntryType::Debit => *debits += entry.amount(),
            EntryType::Credit => *credits += entry.amount(),
        }
    }

    let mut currencies: Vec<&&str> = sums.keys().collect();
    currencies.sort();
    for currency in currencies {
        let (debits, credits) = sums[*currency];
        if debits != credits {
            return Err(ValidationError::UnbalancedByCurrency {
                currency: currency.to_string(),
                debits,
                credits,
            });
        }
    }

    Ok(())
}

/// Enforce the transaction lifecycle
///
/// Creation (`from = None`) may land in `pending` or `posted`. A pending
/// transaction may move to `posted` or `archived`. `posted` and `archived`
/// are terminal, and a pending transaction cannot be "updated" back into
/// `pending`.
pub fn validate_transition(
    from: Option<TransactionStatus>,
    to: TransactionStatus,
) -> Result<(), ValidationError> {
    let legal = matches!(
        (from, to),
        (None, TransactionStatus::Pending)
            | (None, TransactionStatus::Posted)
            | (Some(TransactionStatus::Pending), TransactionStatus::Posted)
            | (Some(TransactionStatus::Pending), TransactionStatus::Archived)
    );

    if legal {
        Ok(())
    } else {
        Err(ValidationError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::account_repo::{AccountType, NormalSide};
    use chrono::Utc;

    fn account(instance_id: Uuid, currency: &str) -> Account {
        Account {
            id: Uuid::new_v4(),
            instance_id,
            address: format!("acct:{}", Uuid::new_v4()),
            name: None,
            account_type: AccountType::Asset,
            normal_side: NormalSide::Debit,
            currency: currency.to_string(),
            allow_negative: false,
            posted_debit: 0,
            posted_credit: 0,
            pending_debit: 0,
            pending_credit: 0,
            available: 0,
            lock_version: 0,
            metadata: serde_json::json!({}),
            inserted_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn entry(account: &Account, entry_type: EntryType, amount: i64) -> NewEntry {
        NewEntry {
            account_id: account.id,
            entry_type,
            amount,
            currency: account.currency.clone(),
        }
    }

    fn accounts_map(accounts: &[&Account]) -> HashMap<Uuid, Account> {
        accounts.iter().map(|a| (a.id, (*a).clone())).collect()
    }

    #[test]
    fn accepts_a_balanced_pair() {
        let instance_id = Uuid::new_v4();
        let cash = account(instance_id, "EUR");
        let equity = account(instance_id, "EUR");

        let entries = vec![
            entry(&cash, EntryType::Debit, 100_000),
            entry(&equity, EntryType::Credit, 100_000),
        ];

        let result = validate_entry_set(instance_id, &entries, &accounts_map(&[&cash, &equity]));
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_fewer_than_two_entries() {
        let instance_id = Uuid::new_v4();
        let cash = account(instance_id, "EUR");
        let entries = vec![entry(&cash, EntryType::Debit, 100)];

        assert_eq!(
            validate_entry_set(instance_id, &entries, &accounts_map(&[&cash])),
            Err(ValidationError::TooFewEntries { count: 1 })
        );
    }

    #[test]
    fn rejects_unbalanced_currency() {
        let instance_id = Uuid::new_v4();
        let cash = account(instance_id, "EUR");
        let equity = account(instance_id, "EUR");

        let entries = vec![
            entry(&cash, EntryType::Debit, 100),
            entry(&equity, EntryType::Credit, 50),
        ];

        assert_eq!(
            validate_entry_set(instance_id, &entries, &accounts_map(&[&cash, &equity])),
            Err(ValidationError::UnbalancedByCurrency {
                currency: "EUR".to_string(),
                debits: 100,
                credits: 50,
            })
        );
    }

    #[test]
    fn balances_each_currency_independently() {
        let instance_id = Uuid::new_v4();
        let cash_eur = account(instance_id, "EUR");
        let equity_eur = account(instance_id, "EUR");
        let cash_usd = account(instance_id, "USD");
        let equity_usd = account(instance_id, "USD");

        let entries = vec![
            entry(&cash_eur, EntryType::Debit, 100),
            entry(&equity_eur, EntryType::Credit, 100),
            entry(&cash_usd, EntryType::Debit, 70),
            entry(&equity_usd, EntryType::Credit, 70),
        ];

        let map = accounts_map(&[&cash_eur, &equity_eur, &cash_usd, &equity_usd]);
        assert!(validate_entry_set(instance_id, &entries, &map).is_ok());
    }

    #[test]
    fn rejects_currency_mismatch_with_account() {
        let instance_id = Uuid::new_v4();
        let cash = account(instance_id, "EUR");
        let equity = account(instance_id, "EUR");

        let mut bad = entry(&cash, EntryType::Debit, 100);
        bad.currency = "USD".to_string();
        let entries = vec![bad, entry(&equity, EntryType::Credit, 100)];

        let result = validate_entry_set(instance_id, &entries, &accounts_map(&[&cash, &equity]));
        assert!(matches!(
            result,
            Err(ValidationError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn rejects_cross_instance_accounts() {
        let instance_id = Uuid::new_v4();
        let cash = account(instance_id, "EUR");
        let foreign = account(Uuid::new_v4(), "EUR");

        let entries = vec![
            entry(&cash, EntryType::Debit, 100),
            entry(&foreign, EntryType::Credit, 100),
        ];

        let result = validate_entry_set(instance_id, &entries, &accounts_map(&[&cash, &foreign]));
        assert_eq!(
            result,
            Err(ValidationError::CrossInstance {
                account_id: foreign.id
            })
        );
    }

    #[test]
    fn rejects_unknown_account() {
        let instance_id = Uuid::new_v4();
        let cash = account(instance_id, "EUR");
        let ghost = account(instance_id, "EUR");

        let entries = vec![
            entry(&cash, EntryType::Debit, 100),
            entry(&ghost, EntryType::Credit, 100),
        ];

        // ghost is not in the loaded account map
        let result = validate_entry_set(instance_id, &entries, &accounts_map(&[&cash]));
        assert_eq!(
            result,
            Err(ValidationError::AccountNotFound {
                account_id: ghost.id
            })
        );
    }

    #[test]
    fn lifecycle_transitions() {
        use TransactionStatus::*;

        assert!(validate_transition(None, Pending).is_ok());
        assert!(validate_transition(None, Posted).is_ok());
        assert!(validate_transition(Some(Pending), Posted).is_ok());
        assert!(validate_transition(Some(Pending), Archived).is_ok());

        assert!(validate_transition(None, Archived).is_err());
        assert!(validate_transition(Some(Pending), Pending).is_err());
        assert!(validate_transition(Some(Posted), Archived).is_err());
        assert!(validate_transition(Some(Posted), Pending).is_err());
        assert!(validate_transition(Some(Archived), Posted).is_err());
    }
}
