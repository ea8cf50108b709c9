//! Fingerprint behavior backing the duplicate-command guarantees.

use ledger_rs::repos::command_repo::CommandAction;
use ledger_rs::services::idempotency::fingerprint;

const SECRET: &str = "test-idempotency-secret";

#[test]
fn resubmitting_the_same_command_hashes_identically() {
    let first = fingerprint(
        SECRET,
        CommandAction::CreateTransaction,
        "Acme:Ledger",
        "billing",
        "inv_001",
        None,
        None,
    )
    .unwrap();

    let second = fingerprint(
        SECRET,
        CommandAction::CreateTransaction,
        "Acme:Ledger",
        "billing",
        "inv_001",
        None,
        None,
    )
    .unwrap();

    // The unique index on (instance_id, idempotency_hash) turns the second
    // submission into DuplicateCommand.
    assert_eq!(first, second);
}

#[test]
fn every_tuple_component_is_significant() {
    let base = fingerprint(
        SECRET,
        CommandAction::CreateTransaction,
        "Acme:Ledger",
        "billing",
        "inv_001",
        None,
        None,
    )
    .unwrap();

    let variants = [
        fingerprint(
            SECRET,
            CommandAction::UpdateTransaction,
            "Acme:Ledger",
            "billing",
            "inv_001",
            None,
            None,
        )
        .unwrap(),
        fingerprint(
            SECRET,
            CommandAction::CreateTransaction,
            "Other:Ledger",
            "billing",
            "inv_001",
            None,
            None,
        )
        .unwrap(),
        fingerprint(
            SECRET,
            CommandAction::CreateTransaction,
            "Acme:Ledger",
            "crm",
            "inv_001",
            None,
            None,
        )
        .unwrap(),
        fingerprint(
            SECRET,
            CommandAction::CreateTransaction,
            "Acme:Ledger",
            "billing",
            "inv_002",
            None,
            None,
        )
        .unwrap(),
        fingerprint(
            SECRET,
            CommandAction::CreateTransaction,
            "Acme:Ledger",
            "billing",
            "inv_001",
            Some("crm"),
            None,
        )
        .unwrap(),
        fingerprint(
            SECRET,
            CommandAction::CreateTransaction,
            "Acme:Ledger",
            "billing",
            "inv_001",
            None,
            Some("rev_1"),
        )
        .unwrap(),
    ];

    for variant in &variants {
        assert_ne!(&base, variant);
    }
}

#[test]
fn successive_updates_get_distinct_fingerprints() {
    // An update chain keeps (source, source_idempk) and varies
    // update_idempk per revision.
    let rev_1 = fingerprint(
        SECRET,
        CommandAction::UpdateTransaction,
        "Acme:Ledger",
        "billing",
        "inv_001",
        None,
        Some("rev_1"),
    )
    .unwrap();

    let rev_2 = fingerprint(
        SECRET,
        CommandAction::UpdateTransaction,
        "Acme:Ledger",
        "billing",
        "inv_001",
        None,
        Some("rev_2"),
    )
    .unwrap();

    assert_ne!(rev_1, rev_2);
}

#[test]
fn fingerprints_are_hex_sha256_width() {
    let hash = fingerprint(
        SECRET,
        CommandAction::CreateAccount,
        "Acme:Ledger",
        "onboarding",
        "acct_1",
        None,
        None,
    )
    .unwrap();

    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}
