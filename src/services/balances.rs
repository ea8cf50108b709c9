//! Pure balance arithmetic
//!
//! Applies one entry to an account's posted/pending/available balances for
//! a given transaction state transition. No I/O; the projection service
//! feeds in the account snapshot it loaded under OCC and writes back the
//! result.
//!
//! The signed `amount` of a balance is `debit - credit` for debit-normal
//! accounts and `credit - debit` for credit-normal accounts. Available
//! funds are the posted amount reduced by any pending hold:
//! `available = posted.amount + min(0, pending.amount)`. Pending credits
//! to a debit-normal account never increase what is spendable.

use serde::Serialize;
use thiserror::Error;

use crate::repos::account_repo::NormalSide;
use crate::repos::transaction_repo::EntryType;

/// One debit/credit pool with its signed amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub debit: i64,
    pub credit: i64,
    pub amount: i64,
}

impl Balance {
    pub fn zero() -> Self {
        Self {
            debit: 0,
            credit: 0,
            amount: 0,
        }
    }

    /// Rebuild from raw pools, deriving the signed amount for the side
    pub fn from_sides(side: NormalSide, debit: i64, credit: i64) -> Self {
        Self {
            debit,
            credit,
            amount: signed_amount(side, debit, credit),
        }
    }

    fn add(&self, side: NormalSide, entry_type: EntryType, amount: i64) -> Balance {
        let (debit, credit) = match entry_type {
            EntryType::Debit => (self.debit + amount, self.credit),
            EntryType::Credit => (self.debit, self.credit + amount),
        };
        Balance::from_sides(side, debit, credit)
    }

    fn sub(
        &self,
        side: NormalSide,
        entry_type: EntryType,
        amount: i64,
    ) -> Result<Balance, BalanceError> {
        let (debit, credit) = match entry_type {
            EntryType::Debit => (self.debit - amount, self.credit),
            EntryType::Credit => (self.debit, self.credit - amount),
        };
        if debit < 0 || credit < 0 {
            return Err(BalanceError::PendingUnderflow { debit, credit });
        }
        Ok(Balance::from_sides(side, debit, credit))
    }
}

/// Posted and pending pools plus the denormalized available figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountBalances {
    pub posted: Balance,
    pub pending: Balance,
    pub available: i64,
}

impl AccountBalances {
    pub fn zero() -> Self {
        Self {
            posted: Balance::zero(),
            pending: Balance::zero(),
            available: 0,
        }
    }
}

/// Which lifecycle step the entry application belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceTransition {
    /// Entry of a transaction created directly in `posted`
    Posted,
    /// Entry of a transaction created in `pending` (a hold)
    Pending,
    /// Pending transaction moves to `posted`: the hold is released and the
    /// posted pools take the entry
    PendingToPosted,
    /// Pending transaction moves to `archived`: the hold is released only
    PendingToArchived,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalanceError {
    /// Post-application available would be negative on an account that
    /// does not allow it.
    #[error("Available balance would become negative: {available}")]
    NegativeAvailable { available: i64 },

    /// Reversing a pending entry drove a pool below zero; the hold being
    /// released was never recorded.
    #[error("Pending balance underflow: debit={debit}, credit={credit}")]
    PendingUnderflow { debit: i64, credit: i64 },
}

/// Translate a signed payload amount into the entry side for an account
///
/// A positive amount grows the account along its normal side; a negative
/// amount shrinks it. Zero maps to the normal side.
pub fn sign_to_entry_type(side: NormalSide, amount: i64) -> EntryType {
    match (side, amount >= 0) {
        (NormalSide::Debit, true) => EntryType::Debit,
        (NormalSide::Debit, false) => EntryType::Credit,
        (NormalSide::Credit, true) => EntryType::Credit,
        (NormalSide::Credit, false) => EntryType::Debit,
    }
}

/// Apply one entry to an account's balances for a state transition
///
/// For `PendingToPosted` and `PendingToArchived` the `previous` pair names
/// the pending entry being released; it defaults to the entry itself for
/// restatus-only updates where entries are unchanged.
pub fn apply_entry(
    side: NormalSide,
    balances: &AccountBalances,
    entry_type: EntryType,
    amount: i64,
    transition: BalanceTransition,
    previous: Option<(EntryType, i64)>,
) -> Result<AccountBalances, BalanceError> {
    let (posted, pending) = match transition {
        BalanceTransition::Posted => (
            balances.posted.add(side, entry_type, amount),
            balances.pending,
        ),
        BalanceTransition::Pending => (
            balances.posted,
            balances.pending.add(side, entry_type, amount),
        ),
        BalanceTransition::PendingToPosted => {
            let (prev_type, prev_amount) = previous.unwrap_or((entry_type, amount));
            (
                balances.posted.add(side, entry_type, amount),
                balances.pending.sub(side, prev_type, prev_amount)?,
            )
        }
        BalanceTransition::PendingToArchived => {
            let (prev_type, prev_amount) = previous.unwrap_or((entry_type, amount));
            (
                balances.posted,
                balances.pending.sub(side, prev_type, prev_amount)?,
            )
        }
    };

    Ok(AccountBalances {
        posted,
        pending,
        available: posted.amount + pending.amount.min(0),
    })
}

/// Enforce the non-negative-available invariant at a commit boundary
pub fn ensure_available(
    allow_negative: bool,
    balances: &AccountBalances,
) -> Result<(), BalanceError> {
    if !allow_negative && balances.available < 0 {
        return Err(BalanceError::NegativeAvailable {
            available: balances.available,
        });
    }
    Ok(())
}

fn signed_amount(side: NormalSide, debit: i64, credit: i64) -> i64 {
    match side {
        NormalSide::Debit => debit - credit,
        NormalSide::Credit => credit - debit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debit_normal(posted: (i64, i64), pending: (i64, i64)) -> AccountBalances {
        let posted = Balance::from_sides(NormalSide::Debit, posted.0, posted.1);
        let pending = Balance::from_sides(NormalSide::Debit, pending.0, pending.1);
        AccountBalances {
            posted,
            pending,
            available: posted.amount + pending.amount.min(0),
        }
    }

    #[test]
    fn posted_debit_on_debit_normal_grows_available() {
        let balances = debit_normal((0, 0), (0, 0));
        let next = apply_entry(
            NormalSide::Debit,
            &balances,
            EntryType::Debit,
            100_000,
            BalanceTransition::Posted,
            None,
        )
        .unwrap();

        assert_eq!(next.posted.debit, 100_000);
        assert_eq!(next.posted.amount, 100_000);
        assert_eq!(next.available, 100_000);
    }

    #[test]
    fn posted_credit_on_debit_normal_shrinks_available() {
        let balances = debit_normal((100_000, 0), (0, 0));
        let next = apply_entry(
            NormalSide::Debit,
            &balances,
            EntryType::Credit,
            30_000,
            BalanceTransition::Posted,
            None,
        )
        .unwrap();

        assert_eq!(next.posted.credit, 30_000);
        assert_eq!(next.posted.amount, 70_000);
        assert_eq!(next.available, 70_000);
    }

    #[test]
    fn posted_credit_on_credit_normal_grows_amount() {
        let posted = Balance::zero();
        let balances = AccountBalances {
            posted,
            pending: Balance::zero(),
            available: 0,
        };
        let next = apply_entry(
            NormalSide::Credit,
            &balances,
            EntryType::Credit,
            100_000,
            BalanceTransition::Posted,
            None,
        )
        .unwrap();

        assert_eq!(next.posted.credit, 100_000);
        assert_eq!(next.posted.amount, 100_000);
        assert_eq!(next.available, 100_000);
    }

    #[test]
    fn pending_hold_reduces_available_without_touching_posted() {
        let balances = debit_normal((100_000, 0), (0, 0));
        let next = apply_entry(
            NormalSide::Debit,
            &balances,
            EntryType::Credit,
            20_000,
            BalanceTransition::Pending,
            None,
        )
        .unwrap();

        assert_eq!(next.posted.amount, 100_000);
        assert_eq!(next.pending.credit, 20_000);
        assert_eq!(next.pending.amount, -20_000);
        assert_eq!(next.available, 80_000);
    }

    #[test]
    fn pending_inflow_does_not_increase_available() {
        let balances = debit_normal((100_000, 0), (0, 0));
        let next = apply_entry(
            NormalSide::Debit,
            &balances,
            EntryType::Debit,
            50_000,
            BalanceTransition::Pending,
            None,
        )
        .unwrap();

        assert_eq!(next.pending.amount, 50_000);
        assert_eq!(next.available, 100_000);
    }

    #[test]
    fn pending_to_posted_moves_the_hold() {
        let held = debit_normal((100_000, 0), (0, 20_000));
        assert_eq!(held.available, 80_000);

        let next = apply_entry(
            NormalSide::Debit,
            &held,
            EntryType::Credit,
            20_000,
            BalanceTransition::PendingToPosted,
            None,
        )
        .unwrap();

        assert_eq!(next.pending, Balance::zero());
        assert_eq!(next.posted.credit, 20_000);
        assert_eq!(next.posted.amount, 80_000);
        assert_eq!(next.available, 80_000);
    }

    #[test]
    fn pending_to_archived_releases_the_hold() {
        let held = debit_normal((100_000, 0), (0, 20_000));
        let next = apply_entry(
            NormalSide::Debit,
            &held,
            EntryType::Credit,
            20_000,
            BalanceTransition::PendingToArchived,
            None,
        )
        .unwrap();

        assert_eq!(next.pending, Balance::zero());
        assert_eq!(next.posted.amount, 100_000);
        assert_eq!(next.available, 100_000);
    }

    #[test]
    fn releasing_an_unrecorded_hold_underflows() {
        let balances = debit_normal((0, 0), (0, 0));
        let result = apply_entry(
            NormalSide::Debit,
            &balances,
            EntryType::Credit,
            500,
            BalanceTransition::PendingToArchived,
            None,
        );

        assert!(matches!(result, Err(BalanceError::PendingUnderflow { .. })));
    }

    #[test]
    fn ensure_available_rejects_negative_when_disallowed() {
        let balances = debit_normal((0, 10_000), (0, 0));
        assert_eq!(balances.available, -10_000);

        let err = ensure_available(false, &balances).unwrap_err();
        assert_eq!(err, BalanceError::NegativeAvailable { available: -10_000 });
        assert!(ensure_available(true, &balances).is_ok());
    }

    #[test]
    fn sign_translation_follows_polarity() {
        assert_eq!(sign_to_entry_type(NormalSide::Debit, 100), EntryType::Debit);
        assert_eq!(sign_to_entry_type(NormalSide::Debit, -100), EntryType::Credit);
        assert_eq!(sign_to_entry_type(NormalSide::Credit, 100), EntryType::Credit);
        assert_eq!(sign_to_entry_type(NormalSide::Credit, -100), EntryType::Debit);
    }
}
