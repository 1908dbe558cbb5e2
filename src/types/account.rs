//! Account-related types for the wallet ledger
//!
//! An account is a holding of one currency for one owner (a user) or for a
//! system purpose (escrow). Accounts carry no balance: balances are always
//! derived from the posting log held by the ledger store.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::money::Currency;

/// User identifier
///
/// Supplied by the authentication collaborator and trusted as-is.
pub type UserId = String;

/// Account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Generate a fresh random account id
    pub fn new() -> Self {
        AccountId(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Purpose of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountKind {
    /// A user's wallet in one currency
    User,

    /// The system account standing in for the external payment rail
    ///
    /// Deposits debit escrow and credit the user; withdrawals debit the user and
    /// credit escrow, modeling money entering or leaving the closed ledger.
    Escrow,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountKind::User => f.write_str("user"),
            AccountKind::Escrow => f.write_str("escrow"),
        }
    }
}

/// Holding of one currency for one owner or system purpose
///
/// Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account id
    pub id: AccountId,

    /// Owning user (`None` for escrow accounts)
    pub owner: Option<UserId>,

    /// Currency held by the account
    pub currency: Currency,

    /// User wallet or escrow
    pub kind: AccountKind,
}

impl Account {
    /// Create a user account with a fresh id
    pub fn user(owner: &str, currency: Currency) -> Self {
        Account {
            id: AccountId::new(),
            owner: Some(owner.to_string()),
            currency,
            kind: AccountKind::User,
        }
    }

    /// Create an escrow account with a fresh id
    pub fn escrow(currency: Currency) -> Self {
        Account {
            id: AccountId::new(),
            owner: None,
            currency,
            kind: AccountKind::Escrow,
        }
    }

    /// Uniqueness key: at most one account per (kind, owner, currency)
    pub fn key(&self) -> AccountKey {
        AccountKey {
            kind: self.kind,
            owner: self.owner.clone(),
            currency: self.currency.clone(),
        }
    }
}

/// Natural key enforcing the one-account-per-(kind, owner, currency) invariant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountKey {
    /// Account kind
    pub kind: AccountKind,
    /// Owner (`None` for escrow)
    pub owner: Option<UserId>,
    /// Currency
    pub currency: Currency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_account_has_owner() {
        let account = Account::user("alice", Currency::new("EUR").unwrap());
        assert_eq!(account.owner.as_deref(), Some("alice"));
        assert_eq!(account.kind, AccountKind::User);
    }

    #[test]
    fn test_escrow_account_has_no_owner() {
        let account = Account::escrow(Currency::new("EUR").unwrap());
        assert!(account.owner.is_none());
        assert_eq!(account.kind, AccountKind::Escrow);
    }

    #[test]
    fn test_key_ignores_id() {
        let eur = Currency::new("EUR").unwrap();
        let a = Account::user("alice", eur.clone());
        let b = Account::user("alice", eur);
        assert_ne!(a.id, b.id);
        assert_eq!(a.key(), b.key());
    }
}
