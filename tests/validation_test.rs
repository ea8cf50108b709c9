//! Validator behavior over both entry representations, plus the
//! transaction lifecycle rules.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use ledger_rs::repos::account_repo::{Account, AccountType, NormalSide};
use ledger_rs::repos::transaction_repo::{Entry, EntryType, NewEntry, TransactionStatus};
use ledger_rs::services::validation::{
    validate_entry_set, validate_transition, EntryView, ValidationError,
};

fn account(instance_id: Uuid, address: &str, currency: &str) -> Account {
    let account_type = AccountType::Asset;
    Account {
        id: Uuid::new_v4(),
        instance_id,
        address: address.to_string(),
        name: None,
        account_type,
        normal_side: account_type.normal_side(),
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

fn map(accounts: &[&Account]) -> HashMap<Uuid, Account> {
    accounts.iter().map(|a| (a.id, (*a).clone())).collect()
}

#[test]
fn rejects_an_unbalanced_pair_and_writes_nothing_else() {
    let instance_id = Uuid::new_v4();
    let cash = account(instance_id, "cash:op", "EUR");
    let equity = account(instance_id, "equity:cap", "EUR");

    let entries = vec![
        NewEntry {
            account_id: cash.id,
            entry_type: EntryType::Debit,
            amount: 100,
            currency: "EUR".to_string(),
        },
        NewEntry {
            account_id: equity.id,
            entry_type: EntryType::Credit,
            amount: 50,
            currency: "EUR".to_string(),
        },
    ];

    let result = validate_entry_set(instance_id, &entries, &map(&[&cash, &equity]));
    assert_eq!(
        result,
        Err(ValidationError::UnbalancedByCurrency {
            currency: "EUR".to_string(),
            debits: 100,
            credits: 50,
        })
    );
}

#[test]
fn persisted_entries_validate_through_the_same_capability() {
    let instance_id = Uuid::new_v4();
    let cash = account(instance_id, "cash:op", "EUR");
    let equity = account(instance_id, "equity:cap", "EUR");
    let transaction_id = Uuid::new_v4();

    let persisted = vec![
        Entry {
            id: Uuid::new_v4(),
            transaction_id,
            account_id: cash.id,
            entry_type: EntryType::Debit,
            amount: 70_000,
            currency: "EUR".to_string(),
            inserted_at: Utc::now(),
        },
        Entry {
            id: Uuid::new_v4(),
            transaction_id,
            account_id: equity.id,
            entry_type: EntryType::Credit,
            amount: 70_000,
            currency: "EUR".to_string(),
            inserted_at: Utc::now(),
        },
    ];

    // Persisted rows and in-flight drafts expose the same view.
    assert_eq!(persisted[0].entry_type(), EntryType::Debit);
    assert_eq!(persisted[0].amount(), 70_000);

    let result = validate_entry_set(instance_id, &persisted, &map(&[&cash, &equity]));
    assert!(result.is_ok());
}

#[test]
fn mixed_currency_sets_balance_per_currency() {
    let instance_id = Uuid::new_v4();
    let cash_eur = account(instance_id, "cash:eur", "EUR");
    let equity_eur = account(instance_id, "equity:eur", "EUR");
    let cash_usd = account(instance_id, "cash:usd", "USD");
    let equity_usd = account(instance_id, "equity:usd", "USD");

    let balanced = vec![
        NewEntry {
            account_id: cash_eur.id,
            entry_type: EntryType::Debit,
            amount: 100,
            currency: "EUR".to_string(),
        },
        NewEntry {
            account_id: equity_eur.id,
            entry_type: EntryType::Credit,
            amount: 100,
            currency: "EUR".to_string(),
        },
        NewEntry {
            account_id: cash_usd.id,
            entry_type: EntryType::Debit,
            amount: 40,
            currency: "USD".to_string(),
        },
        NewEntry {
            account_id: equity_usd.id,
            entry_type: EntryType::Credit,
            amount: 40,
            currency: "USD".to_string(),
        },
    ];

    let accounts = map(&[&cash_eur, &equity_eur, &cash_usd, &equity_usd]);
    assert!(validate_entry_set(instance_id, &balanced, &accounts).is_ok());

    // Currencies cannot cover for each other.
    let cross_subsidized = vec![
        NewEntry {
            account_id: cash_eur.id,
            entry_type: EntryType::Debit,
            amount: 100,
            currency: "EUR".to_string(),
        },
        NewEntry {
            account_id: equity_usd.id,
            entry_type: EntryType::Credit,
            amount: 100,
            currency: "USD".to_string(),
        },
    ];
    assert!(matches!(
        validate_entry_set(instance_id, &cross_subsidized, &accounts),
        Err(ValidationError::UnbalancedByCurrency { .. })
    ));
}

#[test]
fn transaction_lifecycle_is_enforced() {
    use TransactionStatus::*;

    // Creation may land pending or posted, never archived.
    assert!(validate_transition(None, Pending).is_ok());
    assert!(validate_transition(None, Posted).is_ok());
    assert_eq!(
        validate_transition(None, Archived),
        Err(ValidationError::IllegalTransition {
            from: None,
            to: Archived
        })
    );

    // Pending moves forward only.
    assert!(validate_transition(Some(Pending), Posted).is_ok());
    assert!(validate_transition(Some(Pending), Archived).is_ok());
    assert!(validate_transition(Some(Pending), Pending).is_err());

    // Posted and archived are terminal.
    for terminal in [Posted, Archived] {
        for target in [Pending, Posted, Archived] {
            assert!(validate_transition(Some(terminal), target).is_err());
        }
    }
}
