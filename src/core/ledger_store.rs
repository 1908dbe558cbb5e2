//! In-memory double-entry ledger
//!
//! This module provides `InMemoryLedgerStore`, the reference implementation of
//! [`LedgerStore`]. Accounts live in a `DashMap` keyed by id, with a second map
//! enforcing the one-account-per-(kind, owner, currency) rule. Postings live in
//! an append-only journal behind a single `RwLock`.
//!
//! # Atomicity
//!
//! A posting set is validated in full before the journal write lock is taken,
//! and is appended under that one lock acquisition. Balance reads take the read
//! lock, so a reader sees either none or all of a transaction's postings.
//!
//! # Balances
//!
//! The journal keeps a running (credits - debits) total per account alongside
//! the raw rows. [`LedgerStore::audit`] recomputes every total from the rows and
//! reports any drift.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::traits::LedgerStore;
use crate::types::{
    Account, AccountId, AccountKey, AccountKind, Currency, Posting, TransactionId, WalletError,
};

#[derive(Debug, Default)]
struct Journal {
    postings: Vec<Posting>,
    by_transaction: HashMap<TransactionId, Vec<usize>>,
    by_account: HashMap<AccountId, Vec<usize>>,
    balances: HashMap<AccountId, Decimal>,
}

impl Journal {
    fn rows(&self, indices: Option<&Vec<usize>>) -> Vec<Posting> {
        indices
            .map(|indices| indices.iter().map(|&i| self.postings[i].clone()).collect())
            .unwrap_or_default()
    }
}

/// Outcome of a full ledger audit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerAudit {
    /// Transactions that own postings
    pub transactions: usize,

    /// Posting rows in the journal
    pub postings: usize,

    /// Sum of all debits, per currency
    pub debits: BTreeMap<String, Decimal>,

    /// Sum of all credits, per currency
    pub credits: BTreeMap<String, Decimal>,

    /// Transactions whose posting set does not net to zero
    pub imbalanced: Vec<TransactionId>,

    /// Accounts whose running balance disagrees with their posting rows
    pub drifted: Vec<AccountId>,
}

impl LedgerAudit {
    /// Whether every transaction balances, every currency nets to zero and no
    /// running balance has drifted
    pub fn is_consistent(&self) -> bool {
        self.imbalanced.is_empty() && self.drifted.is_empty() && self.debits == self.credits
    }
}

/// Ledger store backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    accounts: DashMap<AccountId, Account>,
    index: DashMap<AccountKey, AccountId>,
    journal: RwLock<Journal>,
}

impl InMemoryLedgerStore {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    fn key(
        owner: Option<&str>,
        currency: &Currency,
        kind: AccountKind,
    ) -> Result<AccountKey, WalletError> {
        match (kind, owner) {
            (AccountKind::User, None) => Err(WalletError::InvalidAccount {
                message: "user accounts need an owner".to_string(),
            }),
            (AccountKind::User, Some(owner)) if owner.trim().is_empty() => {
                Err(WalletError::InvalidAccount {
                    message: "user accounts need a non-empty owner".to_string(),
                })
            }
            (AccountKind::Escrow, Some(owner)) => Err(WalletError::InvalidAccount {
                message: format!("escrow accounts have no owner, got '{}'", owner),
            }),
            _ => Ok(AccountKey {
                kind,
                owner: owner.map(str::to_string),
                currency: currency.clone(),
            }),
        }
    }

    /// Check one transaction's posting set against the accounts it touches
    fn validate(&self, transaction: TransactionId, postings: &[Posting]) -> Result<(), WalletError> {
        let first = postings
            .first()
            .ok_or_else(|| WalletError::invalid_posting(transaction, "empty posting set"))?;

        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;

        for posting in postings {
            if posting.transaction_id != transaction {
                return Err(WalletError::invalid_posting(
                    transaction,
                    format!("posting {} belongs to {}", posting.id.0, posting.transaction_id),
                ));
            }
            if !posting.is_well_formed() {
                return Err(WalletError::invalid_posting(
                    transaction,
                    format!("posting {} must have exactly one positive side", posting.id.0),
                ));
            }
            if posting.currency != first.currency {
                return Err(WalletError::invalid_posting(
                    transaction,
                    format!("mixed currencies {} and {}", first.currency, posting.currency),
                ));
            }

            let account = self
                .accounts
                .get(&posting.account_id)
                .ok_or(WalletError::UnknownAccount {
                    id: posting.account_id,
                })?;
            if account.currency != posting.currency {
                return Err(WalletError::invalid_posting(
                    transaction,
                    format!(
                        "account {} holds {}, posting is in {}",
                        account.id, account.currency, posting.currency
                    ),
                ));
            }

            debits = debits
                .checked_add(posting.debit)
                .ok_or_else(|| WalletError::amount_overflow(format!("debits of {}", transaction)))?;
            credits = credits
                .checked_add(posting.credit)
                .ok_or_else(|| WalletError::amount_overflow(format!("credits of {}", transaction)))?;
        }

        if debits != credits {
            return Err(WalletError::ImbalancedPostings {
                transaction,
                debits,
                credits,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(
        &self,
        owner: Option<&str>,
        currency: &Currency,
        kind: AccountKind,
    ) -> Result<Account, WalletError> {
        let key = Self::key(owner, currency, kind)?;

        // The index entry guard makes check-and-create atomic per key
        let id = *self.index.entry(key).or_insert_with(|| {
            let account = match owner {
                Some(owner) => Account::user(owner, currency.clone()),
                None => Account::escrow(currency.clone()),
            };
            info!(account = %account.id, %kind, owner, %currency, "account created");
            let id = account.id;
            self.accounts.insert(id, account);
            id
        });

        self.accounts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(WalletError::UnknownAccount { id })
    }

    async fn find_account(
        &self,
        owner: Option<&str>,
        currency: &Currency,
        kind: AccountKind,
    ) -> Result<Option<Account>, WalletError> {
        let key = Self::key(owner, currency, kind)?;
        let id = match self.index.get(&key) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self.accounts.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, WalletError> {
        Ok(self.accounts.get(&id).map(|entry| entry.value().clone()))
    }

    async fn accounts(&self) -> Result<Vec<Account>, WalletError> {
        Ok(self
            .accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_balance(&self, id: AccountId) -> Result<Decimal, WalletError> {
        if !self.accounts.contains_key(&id) {
            return Err(WalletError::UnknownAccount { id });
        }

        let journal = self.journal.read().await;
        Ok(journal.balances.get(&id).copied().unwrap_or(Decimal::ZERO))
    }

    async fn commit_postings(
        &self,
        transaction: TransactionId,
        postings: Vec<Posting>,
    ) -> Result<(), WalletError> {
        // Accounts are immutable, so validation does not need the journal lock
        self.validate(transaction, &postings)?;

        let mut journal = self.journal.write().await;
        if journal.by_transaction.contains_key(&transaction) {
            return Err(WalletError::DuplicatePostings { transaction });
        }

        // New running balances are computed in full before the journal changes
        let mut updated: HashMap<AccountId, Decimal> = HashMap::new();
        for posting in &postings {
            let current = match updated.get(&posting.account_id) {
                Some(balance) => *balance,
                None => journal
                    .balances
                    .get(&posting.account_id)
                    .copied()
                    .unwrap_or(Decimal::ZERO),
            };
            let next = current
                .checked_add(posting.signed_amount())
                .ok_or_else(|| {
                    WalletError::amount_overflow(format!("balance of account {}", posting.account_id))
                })?;
            updated.insert(posting.account_id, next);
        }

        let rows = postings.len();
        let mut indices = Vec::with_capacity(rows);
        for posting in postings {
            let index = journal.postings.len();
            journal
                .by_account
                .entry(posting.account_id)
                .or_default()
                .push(index);
            journal.postings.push(posting);
            indices.push(index);
        }
        journal.by_transaction.insert(transaction, indices);
        journal.balances.extend(updated);

        debug!(%transaction, rows, "postings committed");
        Ok(())
    }

    async fn postings_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<Posting>, WalletError> {
        let journal = self.journal.read().await;
        Ok(journal.rows(journal.by_transaction.get(&transaction)))
    }

    async fn postings_for_account(&self, id: AccountId) -> Result<Vec<Posting>, WalletError> {
        if !self.accounts.contains_key(&id) {
            return Err(WalletError::UnknownAccount { id });
        }

        let journal = self.journal.read().await;
        Ok(journal.rows(journal.by_account.get(&id)))
    }

    async fn audit(&self) -> Result<LedgerAudit, WalletError> {
        let journal = self.journal.read().await;

        let mut audit = LedgerAudit {
            transactions: journal.by_transaction.len(),
            postings: journal.postings.len(),
            ..Default::default()
        };

        let mut recomputed: HashMap<AccountId, Decimal> = HashMap::new();
        for posting in &journal.postings {
            let code = posting.currency.code();
            accumulate(
                audit.debits.entry(code.to_string()).or_default(),
                posting.debit,
                "audit debits",
            )?;
            accumulate(
                audit.credits.entry(code.to_string()).or_default(),
                posting.credit,
                "audit credits",
            )?;
            accumulate(
                recomputed.entry(posting.account_id).or_default(),
                posting.signed_amount(),
                "audit balances",
            )?;
        }

        for (transaction, indices) in &journal.by_transaction {
            let net = indices.iter().try_fold(Decimal::ZERO, |net, &i| {
                net.checked_add(journal.postings[i].signed_amount())
                    .ok_or_else(|| WalletError::amount_overflow(format!("net of {}", transaction)))
            })?;
            if !net.is_zero() {
                audit.imbalanced.push(*transaction);
            }
        }

        for (account, running) in &journal.balances {
            let expected = recomputed.get(account).copied().unwrap_or(Decimal::ZERO);
            if *running != expected {
                audit.drifted.push(*account);
            }
        }

        audit.imbalanced.sort();
        audit.drifted.sort();
        Ok(audit)
    }
}

fn accumulate(total: &mut Decimal, amount: Decimal, context: &str) -> Result<(), WalletError> {
    *total = total
        .checked_add(amount)
        .ok_or_else(|| WalletError::amount_overflow(context))?;
    Ok(())
}
