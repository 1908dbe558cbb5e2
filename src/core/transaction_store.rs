//! Thread-safe transaction storage
//!
//! This module provides `InMemoryTransactionStore`, the reference
//! implementation of [`TransactionRepository`].
//!
//! # Design
//!
//! Rows live in a `DashMap` keyed by transaction id. Two secondary `DashMap`s
//! index them by (kind, idempotency key) and by provider reference. The key
//! index doubles as the uniqueness constraint: inserting goes through its entry
//! API, so two concurrent inserts under the same key cannot both succeed.
//!
//! # Thread Safety
//!
//! DashMap shards its locks, so reads and writes on different transactions do
//! not block each other, while updates to one row are serialized by its entry
//! guard. Callers that need read-modify-write sequences spanning the ledger as
//! well (settlement) serialize on a per-transaction lock of their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use super::traits::{Insertion, TransactionRepository};
use crate::types::{
    Currency, FailureReason, ProviderReference, Transaction, TransactionId, TransactionKind,
    TransactionStatus, WalletError,
};

/// Transaction store backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    /// Rows by transaction id
    transactions: DashMap<TransactionId, Transaction>,

    /// Uniqueness index over (kind, idempotency key)
    keys: DashMap<(TransactionKind, String), TransactionId>,

    /// Lookup index for provider callbacks
    references: DashMap<ProviderReference, TransactionId>,
}

impl InMemoryTransactionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to a stored row under its entry guard and return the result
    fn update<F>(&self, id: TransactionId, f: F) -> Result<Transaction, WalletError>
    where
        F: FnOnce(&mut Transaction) -> Result<(), WalletError>,
    {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or(WalletError::TransactionNotFound { id })?;
        f(entry.value_mut())?;
        entry.updated_at = Utc::now();
        Ok(entry.value().clone())
    }

    fn sorted(&self, mut rows: Vec<Transaction>) -> Vec<Transaction> {
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionStore {
    async fn insert_if_absent(&self, transaction: Transaction) -> Result<Insertion, WalletError> {
        let key = (transaction.kind, transaction.idempotency_key.clone());
        let mut created = false;

        let id = *self.keys.entry(key).or_insert_with(|| {
            created = true;
            if let Some(reference) = transaction.metadata.provider_reference {
                self.references.insert(reference, transaction.id);
            }
            self.transactions.insert(transaction.id, transaction.clone());
            transaction.id
        });

        let stored = self
            .transactions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(WalletError::TransactionNotFound { id })?;

        if created {
            debug!(transaction = %id, kind = %stored.kind, "transaction created");
            Ok(Insertion::Created(stored))
        } else {
            debug!(
                transaction = %id,
                key = %stored.idempotency_key,
                "idempotent replay of existing transaction"
            );
            Ok(Insertion::Existing(stored))
        }
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, WalletError> {
        Ok(self.transactions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_key(
        &self,
        kind: TransactionKind,
        key: &str,
    ) -> Result<Option<Transaction>, WalletError> {
        let id = match self.keys.get(&(kind, key.to_string())) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        self.get(id).await
    }

    async fn find_by_reference(
        &self,
        reference: ProviderReference,
    ) -> Result<Option<Transaction>, WalletError> {
        let id = match self.references.get(&reference) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        self.get(id).await
    }

    async fn transition(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        reason: Option<FailureReason>,
    ) -> Result<Transaction, WalletError> {
        self.update(id, |tx| {
            if tx.status.is_terminal() || !to.is_terminal() {
                return Err(WalletError::invalid_transition(id, tx.status, to));
            }
            tx.status = to;
            if to == TransactionStatus::Failed {
                tx.metadata.failure_reason = reason;
            }
            Ok(())
        })
    }

    async fn mark_submitted(&self, id: TransactionId) -> Result<Transaction, WalletError> {
        self.update(id, |tx| {
            tx.metadata.submitted = true;
            Ok(())
        })
    }

    async fn record_poll(
        &self,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<Transaction, WalletError> {
        self.update(id, |tx| {
            tx.metadata.poll_attempts = tx.metadata.poll_attempts.saturating_add(1);
            tx.metadata.last_polled_at = Some(at);
            Ok(())
        })
    }

    async fn pending(&self) -> Result<Vec<Transaction>, WalletError> {
        let rows = self
            .transactions
            .iter()
            .filter(|entry| entry.status == TransactionStatus::Pending)
            .map(|entry| entry.value().clone())
            .collect();
        Ok(self.sorted(rows))
    }

    async fn pending_withdrawals(
        &self,
        user: &str,
        currency: &Currency,
    ) -> Result<Decimal, WalletError> {
        self.transactions
            .iter()
            .filter(|entry| {
                entry.kind == TransactionKind::Withdrawal
                    && entry.status == TransactionStatus::Pending
                    && entry.metadata.user_id == user
                    && &entry.currency == currency
            })
            .try_fold(Decimal::ZERO, |reserved, entry| {
                reserved.checked_add(entry.amount).ok_or_else(|| {
                    WalletError::amount_overflow(format!("pending withdrawals of '{}'", user))
                })
            })
    }

    async fn for_user(&self, user: &str) -> Result<Vec<Transaction>, WalletError> {
        let rows = self
            .transactions
            .iter()
            .filter(|entry| {
                entry.metadata.user_id == user
                    || entry.metadata.counterparty.as_deref() == Some(user)
            })
            .map(|entry| entry.value().clone())
            .collect();
        let mut rows = self.sorted(rows);
        rows.reverse();
        Ok(rows)
    }

    async fn all(&self) -> Result<Vec<Transaction>, WalletError> {
        let rows = self
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        Ok(self.sorted(rows))
    }
}
