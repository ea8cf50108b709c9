//! End-to-end balance walkthroughs at the arithmetic level: a capital
//! injection posted directly, and a hold that is later posted, tracking
//! both sides of each transaction.

use ledger_rs::repos::account_repo::NormalSide;
use ledger_rs::repos::transaction_repo::EntryType;
use ledger_rs::services::balances::{
    apply_entry, ensure_available, sign_to_entry_type, AccountBalances, Balance, BalanceTransition,
};

fn fresh() -> AccountBalances {
    AccountBalances::zero()
}

#[test]
fn posted_capital_injection_updates_both_sides() {
    // Asset account cash:op (debit-normal) and equity account equity:cap
    // (credit-normal), both EUR, both starting at zero. A posted
    // transaction moves +100_000 into each.
    let cash_entry = sign_to_entry_type(NormalSide::Debit, 100_000);
    let equity_entry = sign_to_entry_type(NormalSide::Credit, 100_000);
    assert_eq!(cash_entry, EntryType::Debit);
    assert_eq!(equity_entry, EntryType::Credit);

    let cash = apply_entry(
        NormalSide::Debit,
        &fresh(),
        cash_entry,
        100_000,
        BalanceTransition::Posted,
        None,
    )
    .unwrap();
    let equity = apply_entry(
        NormalSide::Credit,
        &fresh(),
        equity_entry,
        100_000,
        BalanceTransition::Posted,
        None,
    )
    .unwrap();

    assert_eq!(
        cash.posted,
        Balance {
            debit: 100_000,
            credit: 0,
            amount: 100_000
        }
    );
    assert_eq!(cash.available, 100_000);

    assert_eq!(
        equity.posted,
        Balance {
            debit: 0,
            credit: 100_000,
            amount: 100_000
        }
    );
    assert_eq!(equity.available, 100_000);

    // Instance solvency: total posted debits equal total posted credits.
    assert_eq!(
        cash.posted.debit + equity.posted.debit,
        cash.posted.credit + equity.posted.credit
    );
}

#[test]
fn pending_hold_then_post_keeps_available_constant() {
    // Continue from the capital injection: a -20_000 hold on both
    // accounts, created pending, later posted.
    let cash_start = apply_entry(
        NormalSide::Debit,
        &fresh(),
        EntryType::Debit,
        100_000,
        BalanceTransition::Posted,
        None,
    )
    .unwrap();

    // -20_000 on a debit-normal account translates to a credit entry.
    let hold_entry = sign_to_entry_type(NormalSide::Debit, -20_000);
    assert_eq!(hold_entry, EntryType::Credit);

    let cash_held = apply_entry(
        NormalSide::Debit,
        &cash_start,
        hold_entry,
        20_000,
        BalanceTransition::Pending,
        None,
    )
    .unwrap();

    assert_eq!(cash_held.pending.debit, 0);
    assert_eq!(cash_held.pending.credit, 20_000);
    assert_eq!(cash_held.pending.amount, -20_000);
    assert_eq!(cash_held.available, 80_000);
    // Posted pools untouched while pending.
    assert_eq!(cash_held.posted.amount, 100_000);

    // Posting the hold zeroes pending and mutates posted; available is
    // unchanged because the hold already reduced it.
    let cash_posted = apply_entry(
        NormalSide::Debit,
        &cash_held,
        hold_entry,
        20_000,
        BalanceTransition::PendingToPosted,
        None,
    )
    .unwrap();

    assert_eq!(cash_posted.pending, Balance::zero());
    assert_eq!(cash_posted.posted.debit, 100_000);
    assert_eq!(cash_posted.posted.credit, 20_000);
    assert_eq!(cash_posted.posted.amount, 80_000);
    assert_eq!(cash_posted.available, 80_000);
}

#[test]
fn credit_normal_mirror_of_the_hold() {
    // The equity side of the same hold: -20_000 on a credit-normal
    // account translates to a debit entry and reduces available.
    let equity_start = apply_entry(
        NormalSide::Credit,
        &fresh(),
        EntryType::Credit,
        100_000,
        BalanceTransition::Posted,
        None,
    )
    .unwrap();

    let hold_entry = sign_to_entry_type(NormalSide::Credit, -20_000);
    assert_eq!(hold_entry, EntryType::Debit);

    let equity_held = apply_entry(
        NormalSide::Credit,
        &equity_start,
        hold_entry,
        20_000,
        BalanceTransition::Pending,
        None,
    )
    .unwrap();

    assert_eq!(equity_held.pending.debit, 20_000);
    assert_eq!(equity_held.pending.amount, -20_000);
    assert_eq!(equity_held.available, 80_000);

    let equity_archived = apply_entry(
        NormalSide::Credit,
        &equity_held,
        hold_entry,
        20_000,
        BalanceTransition::PendingToArchived,
        None,
    )
    .unwrap();

    // Archiving releases the hold without touching posted pools.
    assert_eq!(equity_archived.pending, Balance::zero());
    assert_eq!(equity_archived.posted.amount, 100_000);
    assert_eq!(equity_archived.available, 100_000);
}

#[test]
fn overdraft_is_caught_at_the_commit_boundary() {
    // Spending more than the account holds must fail the non-negativity
    // check when allow_negative is off.
    let cash = apply_entry(
        NormalSide::Debit,
        &fresh(),
        EntryType::Debit,
        10_000,
        BalanceTransition::Posted,
        None,
    )
    .unwrap();

    let overdrawn = apply_entry(
        NormalSide::Debit,
        &cash,
        EntryType::Credit,
        15_000,
        BalanceTransition::Posted,
        None,
    )
    .unwrap();

    assert_eq!(overdrawn.available, -5_000);
    assert!(ensure_available(false, &overdrawn).is_err());
    assert!(ensure_available(true, &overdrawn).is_ok());
}

#[test]
fn pending_pools_never_go_negative() {
    // Releasing a hold twice is an invariant violation, not a silent
    // negative pool.
    let cash = apply_entry(
        NormalSide::Debit,
        &fresh(),
        EntryType::Credit,
        5_000,
        BalanceTransition::Pending,
        None,
    )
    .unwrap();

    let released = apply_entry(
        NormalSide::Debit,
        &cash,
        EntryType::Credit,
        5_000,
        BalanceTransition::PendingToArchived,
        None,
    )
    .unwrap();
    assert_eq!(released.pending, Balance::zero());

    let double_release = apply_entry(
        NormalSide::Debit,
        &released,
        EntryType::Credit,
        5_000,
        BalanceTransition::PendingToArchived,
        None,
    );
    assert!(double_release.is_err());
}
