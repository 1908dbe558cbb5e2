//! Store abstractions for the ledger core
//!
//! The orchestrator talks to storage only through these traits, receiving
//! explicitly constructed handles (`Arc<dyn ...>`) rather than reaching for a
//! process-wide client. In-memory implementations live next to this module;
//! a database-backed implementation only has to honour the same contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::ledger_store::LedgerAudit;
use crate::types::{
    Account, AccountId, AccountKind, Currency, FailureReason, Posting, ProviderReference,
    Transaction, TransactionId, TransactionKind, TransactionStatus, UserId, WalletError,
};

/// Append-only posting storage plus balance derivation
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create an account, or return the existing one for the same
    /// (kind, owner, currency)
    async fn create_account(
        &self,
        owner: Option<&str>,
        currency: &Currency,
        kind: AccountKind,
    ) -> Result<Account, WalletError>;

    /// Look up an account by its natural key
    async fn find_account(
        &self,
        owner: Option<&str>,
        currency: &Currency,
        kind: AccountKind,
    ) -> Result<Option<Account>, WalletError>;

    /// Look up an account by id
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, WalletError>;

    /// All accounts
    async fn accounts(&self) -> Result<Vec<Account>, WalletError>;

    /// Credits minus debits over the account's committed postings
    ///
    /// Must never observe a partially committed posting set.
    async fn get_balance(&self, id: AccountId) -> Result<Decimal, WalletError>;

    /// Atomically commit the balanced posting set of one transaction
    ///
    /// Writes everything or nothing. Fails with `ImbalancedPostings`,
    /// `DuplicatePostings` or `InvalidPosting`.
    async fn commit_postings(
        &self,
        transaction: TransactionId,
        postings: Vec<Posting>,
    ) -> Result<(), WalletError>;

    /// Postings committed for a transaction (empty while it is pending)
    async fn postings_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<Posting>, WalletError>;

    /// Postings committed against an account, in commit order
    async fn postings_for_account(&self, id: AccountId) -> Result<Vec<Posting>, WalletError>;

    /// Recompute every balance from the raw posting log and check the
    /// double-entry invariants against it
    async fn audit(&self) -> Result<LedgerAudit, WalletError>;
}

/// Result of an idempotent insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// The row was inserted
    Created(Transaction),
    /// A row with the same (kind, idempotency key) already existed
    Existing(Transaction),
}

impl Insertion {
    /// The stored transaction, whichever way the insert went
    pub fn transaction(&self) -> &Transaction {
        match self {
            Insertion::Created(tx) | Insertion::Existing(tx) => tx,
        }
    }
}

/// Transactional store for `Transaction` rows
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert unless (kind, idempotency key) is taken; atomic per key
    async fn insert_if_absent(&self, transaction: Transaction) -> Result<Insertion, WalletError>;

    /// Look up a transaction by id
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, WalletError>;

    /// Look up a transaction by its idempotency key within a kind
    async fn find_by_key(
        &self,
        kind: TransactionKind,
        key: &str,
    ) -> Result<Option<Transaction>, WalletError>;

    /// Look up a transaction by the reference the provider knows it by
    async fn find_by_reference(
        &self,
        reference: ProviderReference,
    ) -> Result<Option<Transaction>, WalletError>;

    /// Move a `PENDING` transaction to a terminal status
    ///
    /// Fails with `InvalidStateTransition` if the transaction is no longer
    /// pending. `reason` is recorded for `FAILED`.
    async fn transition(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        reason: Option<FailureReason>,
    ) -> Result<Transaction, WalletError>;

    /// Record that the provider acknowledged the request
    async fn mark_submitted(&self, id: TransactionId) -> Result<Transaction, WalletError>;

    /// Record one reconciliation attempt; returns the updated row
    async fn record_poll(
        &self,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<Transaction, WalletError>;

    /// All `PENDING` transactions, oldest first
    async fn pending(&self) -> Result<Vec<Transaction>, WalletError>;

    /// Sum of the user's `PENDING` withdrawals in `currency`
    async fn pending_withdrawals(
        &self,
        user: &str,
        currency: &Currency,
    ) -> Result<Decimal, WalletError>;

    /// Transactions the user initiated or received, newest first
    async fn for_user(&self, user: &str) -> Result<Vec<Transaction>, WalletError>;

    /// All transactions, oldest first
    async fn all(&self) -> Result<Vec<Transaction>, WalletError>;
}

/// Read access to the user registry owned by the authentication collaborator
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Whether `user` is a registered user
    async fn contains(&self, user: &str) -> bool;

    /// Register a user; returns `false` if it was already known
    async fn register(&self, user: UserId) -> bool;
}
