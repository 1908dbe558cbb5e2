//! Ledger postings
//!
//! A posting is one immutable debit or credit row against one account for one
//! transaction. Postings are only ever created at settlement, in balanced sets.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::money::Currency;
use super::transaction::TransactionId;

/// Posting identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostingId(pub Uuid);

/// One side of a double-entry record
///
/// Exactly one of `debit` / `credit` is non-zero; the ledger store rejects rows
/// that break this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Unique posting id
    pub id: PostingId,

    /// Transaction this posting belongs to
    pub transaction_id: TransactionId,

    /// Account being debited or credited
    pub account_id: AccountId,

    /// Debit amount (zero for a credit row)
    pub debit: Decimal,

    /// Credit amount (zero for a debit row)
    pub credit: Decimal,

    /// Currency of the posting, equal to the account's currency
    pub currency: Currency,
}

impl Posting {
    /// Build a debit row
    pub fn debit(
        transaction_id: TransactionId,
        account_id: AccountId,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        Posting {
            id: PostingId(Uuid::new_v4()),
            transaction_id,
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
            currency,
        }
    }

    /// Build a credit row
    pub fn credit(
        transaction_id: TransactionId,
        account_id: AccountId,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        Posting {
            id: PostingId(Uuid::new_v4()),
            transaction_id,
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
            currency,
        }
    }

    /// Signed effect on the account balance (credits minus debits)
    pub fn signed_amount(&self) -> Decimal {
        self.credit - self.debit
    }

    /// Whether exactly one side is non-zero and neither side is negative
    pub fn is_well_formed(&self) -> bool {
        let non_negative = self.debit >= Decimal::ZERO && self.credit >= Decimal::ZERO;
        let one_sided = (self.debit.is_zero()) != (self.credit.is_zero());
        non_negative && one_sided
    }
}

/// Build the balanced two-row set moving `amount` from `from` to `to`
///
/// `from` is debited and `to` is credited, so the set always balances.
pub fn balanced_pair(
    transaction_id: TransactionId,
    from: AccountId,
    to: AccountId,
    amount: Decimal,
    currency: &Currency,
) -> Vec<Posting> {
    vec![
        Posting::debit(transaction_id, from, amount, currency.clone()),
        Posting::credit(transaction_id, to, amount, currency.clone()),
    ]
}
