//! Transaction orchestration
//!
//! The orchestrator drives every money movement through the
//! `PENDING → SUCCESS | FAILED` state machine and is the only component that
//! commits postings.
//!
//! # Flow
//!
//! - **Deposit / withdrawal**: validate, resolve idempotency, persist a `PENDING`
//!   row carrying its provider reference, then hand the request to the
//!   provider. The outcome is learned later through reconciliation or a
//!   provider notification, which call [`TransactionOrchestrator::settle`] or
//!   [`TransactionOrchestrator::fail`].
//! - **Transfer**: internal only, validated and settled on the caller's task.
//!
//! # Locking
//!
//! Two per-key lock tables guard the read-modify-write sequences:
//! - per account, around "check available balance, then reserve or debit";
//! - per transaction, around settle/fail.
//!
//! Locks are always taken transaction first, account second. No lock is held
//! across a provider call.
//!
//! # Available balance
//!
//! A withdrawal reserves its amount from the moment it is created: the available
//! balance of a user is the ledger balance minus the user's `PENDING`
//! withdrawals. Deposits only count once settled.

use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::account_registry::AccountRegistry;
use super::locks::KeyedLocks;
use super::traits::{Insertion, LedgerStore, TransactionRepository, UserDirectory};
use crate::config::OrchestratorConfig;
use crate::provider::{PaymentProvider, ProviderError, ProviderRequest, ProviderStatus};
use crate::types::{
    balanced_pair, validate_msisdn, Account, AccountId, Currency, FailureReason,
    ProviderReference, Transaction, TransactionId, TransactionKind, TransactionMetadata,
    TransactionStatus, WalletError,
};

/// What happened when a request was handed to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The provider queued the request; the transaction is now submitted
    Accepted,
    /// The provider refused the request; the transaction is now `FAILED`
    Rejected(String),
    /// The provider could not be reached; the transaction stays unsubmitted
    Unavailable(String),
}

/// The transaction state machine
pub struct TransactionOrchestrator {
    registry: AccountRegistry,
    ledger: Arc<dyn LedgerStore>,
    transactions: Arc<dyn TransactionRepository>,
    provider: Arc<dyn PaymentProvider>,
    config: OrchestratorConfig,
    account_locks: KeyedLocks<AccountId>,
    transaction_locks: KeyedLocks<TransactionId>,
}

impl TransactionOrchestrator {
    /// Wire an orchestrator from explicit store and provider handles
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        transactions: Arc<dyn TransactionRepository>,
        users: Arc<dyn UserDirectory>,
        provider: Arc<dyn PaymentProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry: AccountRegistry::new(Arc::clone(&ledger), users),
            ledger,
            transactions,
            provider,
            config,
            account_locks: KeyedLocks::new(),
            transaction_locks: KeyedLocks::new(),
        }
    }

    /// Ledger store handle
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Transaction store handle
    pub fn transactions(&self) -> &Arc<dyn TransactionRepository> {
        &self.transactions
    }

    /// Account registry
    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    /// Request a deposit from the user's mobile-money wallet
    ///
    /// # Returns
    ///
    /// The id of the new transaction, or of the existing one when `key` was
    /// already used for a deposit. The provider's verdict is reflected in the
    /// transaction status, not in the return value: a rejected request yields
    /// a `FAILED` transaction and an unreachable provider leaves it `PENDING`
    /// for reconciliation to resubmit.
    ///
    /// # Errors
    ///
    /// Validation errors (`InvalidIdempotencyKey`, `InvalidAmount`,
    /// `InvalidMsisdn`, `UnknownUser`) create no state.
    pub async fn initiate_deposit(
        &self,
        user: &str,
        amount: Decimal,
        currency: &Currency,
        msisdn: &str,
        key: &str,
    ) -> Result<TransactionId, WalletError> {
        let key = validate_key(key)?;
        let amount = currency.validate_amount(amount)?;
        let msisdn = validate_msisdn(msisdn)?;
        if !self.registry.is_known_user(user).await {
            return Err(WalletError::unknown_user(user));
        }

        if let Some(existing) = self
            .transactions
            .find_by_key(TransactionKind::Deposit, key)
            .await?
        {
            return Ok(existing.id);
        }

        self.registry
            .get_or_create_user_account(user, currency)
            .await?;

        let pending = Transaction::pending(
            key,
            TransactionKind::Deposit,
            currency.clone(),
            amount,
            provider_metadata(user, msisdn),
        );

        match self.transactions.insert_if_absent(pending).await? {
            Insertion::Existing(tx) => Ok(tx.id),
            Insertion::Created(tx) => {
                info!(
                    transaction_id = %tx.id,
                    kind = %tx.kind,
                    user_id = user,
                    amount = %tx.amount,
                    currency = %tx.currency,
                    "deposit initiated"
                );
                self.submit(&tx).await?;
                Ok(tx.id)
            }
        }
    }

    /// Request a payout to the user's mobile-money wallet
    ///
    /// Same contract as [`Self::initiate_deposit`]. When the available balance
    /// does not cover `amount`, the transaction is recorded directly as
    /// `FAILED` with reason `InsufficientFunds` and the provider is not called.
    pub async fn initiate_withdrawal(
        &self,
        user: &str,
        amount: Decimal,
        currency: &Currency,
        msisdn: &str,
        key: &str,
    ) -> Result<TransactionId, WalletError> {
        let key = validate_key(key)?;
        let amount = currency.validate_amount(amount)?;
        let msisdn = validate_msisdn(msisdn)?;
        if !self.registry.is_known_user(user).await {
            return Err(WalletError::unknown_user(user));
        }
        if let Some(existing) = self
            .transactions
            .find_by_key(TransactionKind::Withdrawal, key)
            .await?
        {
            return Ok(existing.id);
        }
        let account = self
            .registry
            .get_or_create_user_account(user, currency)
            .await?;

        let insertion = {
            let _account = self.account_locks.lock(&account.id).await;

            if let Some(existing) = self
                .transactions
                .find_by_key(TransactionKind::Withdrawal, key)
                .await?
            {
                return Ok(existing.id);
            }

            let available = self.available_in(&account, user, currency).await?;
            let mut pending = Transaction::pending(
                key,
                TransactionKind::Withdrawal,
                currency.clone(),
                amount,
                provider_metadata(user, msisdn),
            );
            if available < amount {
                pending.status = TransactionStatus::Failed;
                pending.metadata.failure_reason = Some(FailureReason::InsufficientFunds);
            }

            self.transactions.insert_if_absent(pending).await?
        };

        match insertion {
            Insertion::Existing(tx) => Ok(tx.id),
            Insertion::Created(tx) if tx.status == TransactionStatus::Failed => {
                warn!(
                    transaction_id = %tx.id,
                    user_id = user,
                    amount = %tx.amount,
                    currency = %tx.currency,
                    "withdrawal refused: insufficient funds"
                );
                Ok(tx.id)
            }
            Insertion::Created(tx) => {
                info!(
                    transaction_id = %tx.id,
                    kind = %tx.kind,
                    user_id = user,
                    amount = %tx.amount,
                    currency = %tx.currency,
                    "withdrawal initiated"
                );
                self.submit(&tx).await?;
                Ok(tx.id)
            }
        }
    }

    /// Move money between two users, settling immediately
    ///
    /// # Errors
    ///
    /// `SelfTransferNotAllowed`, `UnknownUser` (sender), `UnknownRecipient`,
    /// `InsufficientFunds` and the amount/key validation errors. None of them
    /// create a transaction. Replaying a used key returns the original id.
    /// When the ledger refuses the postings, the error is returned and the
    /// transaction is left `FAILED` with reason `PostingRejected`.
    pub async fn initiate_transfer(
        &self,
        sender: &str,
        receiver: &str,
        amount: Decimal,
        currency: &Currency,
        key: &str,
    ) -> Result<TransactionId, WalletError> {
        let key = validate_key(key)?;
        let amount = currency.validate_amount(amount)?;
        if sender == receiver {
            return Err(WalletError::SelfTransferNotAllowed {
                user: sender.to_string(),
            });
        }
        if !self.registry.is_known_user(sender).await {
            return Err(WalletError::unknown_user(sender));
        }
        if !self.registry.is_known_user(receiver).await {
            return Err(WalletError::unknown_recipient(receiver));
        }
        if let Some(existing) = self
            .transactions
            .find_by_key(TransactionKind::Transfer, key)
            .await?
        {
            return Ok(existing.id);
        }
        let from = self
            .registry
            .get_or_create_user_account(sender, currency)
            .await?;
        let to = self
            .registry
            .get_or_create_user_account(receiver, currency)
            .await?;

        let sender_lock = self.account_locks.lock(&from.id).await;

        if let Some(existing) = self
            .transactions
            .find_by_key(TransactionKind::Transfer, key)
            .await?
        {
            return Ok(existing.id);
        }

        let available = self.available_in(&from, sender, currency).await?;
        if available < amount {
            return Err(WalletError::insufficient_funds(sender, available, amount));
        }

        let pending = Transaction::pending(
            key,
            TransactionKind::Transfer,
            currency.clone(),
            amount,
            TransactionMetadata {
                user_id: sender.to_string(),
                counterparty: Some(receiver.to_string()),
                ..Default::default()
            },
        );
        let tx = match self.transactions.insert_if_absent(pending).await? {
            Insertion::Existing(tx) => return Ok(tx.id),
            Insertion::Created(tx) => tx,
        };

        let postings = balanced_pair(tx.id, from.id, to.id, amount, currency);
        if let Err(err) = self.ledger.commit_postings(tx.id, postings).await {
            error!(transaction_id = %tx.id, error = %err, "transfer postings rejected");
            // Transaction locks come before account locks
            drop(sender_lock);
            if let Err(fail_err) = self
                .fail(tx.id, FailureReason::PostingRejected(err.to_string()))
                .await
            {
                error!(transaction_id = %tx.id, error = %fail_err, "could not fail transfer");
            }
            return Err(err);
        }
        self.transactions
            .transition(tx.id, TransactionStatus::Success, None)
            .await?;

        info!(
            transaction_id = %tx.id,
            user_id = sender,
            counterparty = receiver,
            amount = %amount,
            currency = %currency,
            "transfer settled"
        );
        Ok(tx.id)
    }

    /// Commit the balanced postings of a `PENDING` transaction and mark it
    /// `SUCCESS`
    ///
    /// Idempotent: settling a `SUCCESS` transaction is a no-op, and postings
    /// already present for the transaction are not written again.
    ///
    /// # Errors
    ///
    /// `TransactionNotFound`, `InvalidStateTransition` for a `FAILED`
    /// transaction, and the storage invariant errors.
    pub async fn settle(&self, id: TransactionId) -> Result<Transaction, WalletError> {
        let _tx = self.transaction_locks.lock(&id).await;
        let tx = self.get_transaction(id).await?;

        match tx.status {
            TransactionStatus::Success => return Ok(tx),
            TransactionStatus::Failed => {
                return Err(WalletError::invalid_transition(
                    id,
                    TransactionStatus::Failed,
                    TransactionStatus::Success,
                ))
            }
            TransactionStatus::Pending => {}
        }

        let (from, to) = self.posting_accounts(&tx).await?;

        // Debits of user accounts serialize with balance checks on that account
        let _account = match tx.kind {
            TransactionKind::Deposit => None,
            TransactionKind::Withdrawal | TransactionKind::Transfer => {
                Some(self.account_locks.lock(&from).await)
            }
        };

        if self.ledger.postings_for_transaction(id).await?.is_empty() {
            let postings = balanced_pair(id, from, to, tx.amount, &tx.currency);
            if let Err(err) = self.ledger.commit_postings(id, postings).await {
                error!(transaction_id = %id, error = %err, "settlement postings rejected");
                return Err(err);
            }
        }

        let settled = self
            .transactions
            .transition(id, TransactionStatus::Success, None)
            .await?;
        info!(
            transaction_id = %id,
            kind = %settled.kind,
            user_id = %settled.metadata.user_id,
            amount = %settled.amount,
            currency = %settled.currency,
            "transaction settled"
        );
        Ok(settled)
    }

    /// Mark a `PENDING` transaction `FAILED` without moving money
    ///
    /// Idempotent on `FAILED`; `InvalidStateTransition` on `SUCCESS`.
    pub async fn fail(
        &self,
        id: TransactionId,
        reason: FailureReason,
    ) -> Result<Transaction, WalletError> {
        let _tx = self.transaction_locks.lock(&id).await;
        let tx = self.get_transaction(id).await?;

        match tx.status {
            TransactionStatus::Failed => Ok(tx),
            TransactionStatus::Success => Err(WalletError::invalid_transition(
                id,
                TransactionStatus::Success,
                TransactionStatus::Failed,
            )),
            TransactionStatus::Pending => {
                let failed = self
                    .transactions
                    .transition(id, TransactionStatus::Failed, Some(reason))
                    .await?;
                warn!(
                    transaction_id = %id,
                    kind = %failed.kind,
                    user_id = %failed.metadata.user_id,
                    reason = ?failed.metadata.failure_reason,
                    "transaction failed"
                );
                Ok(failed)
            }
        }
    }

    /// Apply a provider callback for `reference`
    ///
    /// `SUCCESS` settles, `FAILED` fails, `PENDING` is ignored. A callback that
    /// loses the race against reconciliation finds the transaction terminal and
    /// is dropped. Unknown references are ignored.
    pub async fn handle_provider_notification(
        &self,
        reference: ProviderReference,
        status: ProviderStatus,
    ) -> Result<Option<Transaction>, WalletError> {
        let Some(tx) = self.transactions.find_by_reference(reference).await? else {
            warn!(%reference, %status, "notification for unknown reference");
            return Ok(None);
        };

        let outcome = match status {
            ProviderStatus::Pending => return Ok(Some(tx)),
            ProviderStatus::Success => self.settle(tx.id).await,
            ProviderStatus::Failed => {
                self.fail(tx.id, FailureReason::ProviderFailed(status.to_string()))
                    .await
            }
        };

        match outcome {
            Ok(updated) => Ok(Some(updated)),
            Err(WalletError::InvalidStateTransition { from, .. }) => {
                warn!(
                    transaction_id = %tx.id,
                    %reference,
                    %status,
                    current = %from,
                    "notification conflicts with terminal status, ignored"
                );
                self.transactions.get(tx.id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Hand a provider-backed transaction to the provider
    ///
    /// Reuses the reference assigned at creation, so resubmitting after an
    /// outage cannot create a second request on the provider side.
    pub async fn submit(&self, tx: &Transaction) -> Result<SubmitOutcome, WalletError> {
        let request = self.provider_request(tx)?;
        let call = async {
            match tx.kind {
                TransactionKind::Deposit => self.provider.request_deposit(&request).await,
                TransactionKind::Withdrawal => self.provider.request_withdrawal(&request).await,
                TransactionKind::Transfer => {
                    Err(ProviderError::rejected("transfers are settled internally"))
                }
            }
        };

        match self.bounded(call).await {
            Ok(()) => {
                self.transactions.mark_submitted(tx.id).await?;
                info!(
                    transaction_id = %tx.id,
                    reference = %request.reference,
                    "provider accepted request"
                );
                Ok(SubmitOutcome::Accepted)
            }
            Err(ProviderError::Rejected { reason }) => {
                warn!(
                    transaction_id = %tx.id,
                    reference = %request.reference,
                    %reason,
                    "provider rejected request"
                );
                match self
                    .fail(tx.id, FailureReason::ProviderRejected(reason.clone()))
                    .await
                {
                    // Settled meanwhile through a notification; nothing to undo
                    Ok(_) | Err(WalletError::InvalidStateTransition { .. }) => {}
                    Err(err) => return Err(err),
                }
                Ok(SubmitOutcome::Rejected(reason))
            }
            Err(ProviderError::Unavailable { message }) => {
                warn!(
                    transaction_id = %tx.id,
                    reference = %request.reference,
                    %message,
                    "provider unavailable, left for reconciliation"
                );
                Ok(SubmitOutcome::Unavailable(message))
            }
        }
    }

    /// Ask the provider for the status of a submitted transaction
    pub async fn query_provider(&self, tx: &Transaction) -> Result<ProviderStatus, ProviderError> {
        let reference = tx
            .metadata
            .provider_reference
            .ok_or_else(|| ProviderError::rejected("transaction has no provider reference"))?;
        self.bounded(self.provider.get_status(reference, tx.kind))
            .await
    }

    /// Current status of a transaction
    pub async fn get_status(&self, id: TransactionId) -> Result<TransactionStatus, WalletError> {
        Ok(self.get_transaction(id).await?.status)
    }

    /// Full transaction row
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, WalletError> {
        self.transactions
            .get(id)
            .await?
            .ok_or(WalletError::TransactionNotFound { id })
    }

    /// Transactions the user initiated or received, newest first
    pub async fn history(&self, user: &str) -> Result<Vec<Transaction>, WalletError> {
        if !self.registry.is_known_user(user).await {
            return Err(WalletError::unknown_user(user));
        }
        self.transactions.for_user(user).await
    }

    /// Ledger balance of the user in `currency`
    pub async fn balance(&self, user: &str, currency: &Currency) -> Result<Decimal, WalletError> {
        self.registry.user_balance(user, currency).await
    }

    /// Ledger balance minus the user's `PENDING` withdrawals
    pub async fn available_balance(
        &self,
        user: &str,
        currency: &Currency,
    ) -> Result<Decimal, WalletError> {
        let balance = self.registry.user_balance(user, currency).await?;
        let reserved = self
            .transactions
            .pending_withdrawals(user, currency)
            .await?;
        available(user, balance, reserved)
    }

    async fn available_in(
        &self,
        account: &Account,
        user: &str,
        currency: &Currency,
    ) -> Result<Decimal, WalletError> {
        let balance = self.ledger.get_balance(account.id).await?;
        let reserved = self
            .transactions
            .pending_withdrawals(user, currency)
            .await?;
        available(user, balance, reserved)
    }

    /// (debited, credited) accounts for settling `tx`
    async fn posting_accounts(&self, tx: &Transaction) -> Result<(AccountId, AccountId), WalletError> {
        let user = self
            .registry
            .get_or_create_user_account(&tx.metadata.user_id, &tx.currency)
            .await?;

        match tx.kind {
            TransactionKind::Deposit => {
                let escrow = self
                    .registry
                    .get_or_create_escrow_account(&tx.currency)
                    .await?;
                Ok((escrow.id, user.id))
            }
            TransactionKind::Withdrawal => {
                let escrow = self
                    .registry
                    .get_or_create_escrow_account(&tx.currency)
                    .await?;
                Ok((user.id, escrow.id))
            }
            TransactionKind::Transfer => {
                let receiver = tx
                    .metadata
                    .counterparty
                    .as_deref()
                    .ok_or_else(|| WalletError::invalid_posting(tx.id, "transfer has no receiver"))?;
                let to = self
                    .registry
                    .get_or_create_user_account(receiver, &tx.currency)
                    .await?;
                Ok((user.id, to.id))
            }
        }
    }

    fn provider_request(&self, tx: &Transaction) -> Result<ProviderRequest, WalletError> {
        let reference = tx
            .metadata
            .provider_reference
            .ok_or_else(|| WalletError::ProviderRejected {
                reason: format!("transaction {} has no provider reference", tx.id),
            })?;

        Ok(ProviderRequest {
            reference,
            amount: tx.amount,
            currency: tx.currency.clone(),
            msisdn: tx.metadata.msisdn.clone().unwrap_or_default(),
            external_id: tx.id.to_string(),
            payer_message: self.config.payer_message.clone(),
            payee_note: self.config.payee_note.clone(),
        })
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::unavailable(format!(
                "no response within {}ms",
                self.config.provider_timeout.as_millis()
            ))),
        }
    }
}

fn available(user: &str, balance: Decimal, reserved: Decimal) -> Result<Decimal, WalletError> {
    balance
        .checked_sub(reserved)
        .ok_or_else(|| WalletError::amount_overflow(format!("available balance of '{}'", user)))
}

fn validate_key(key: &str) -> Result<&str, WalletError> {
    if key.trim().is_empty() {
        return Err(WalletError::InvalidIdempotencyKey);
    }
    Ok(key)
}

fn provider_metadata(user: &str, msisdn: String) -> TransactionMetadata {
    TransactionMetadata {
        user_id: user.to_string(),
        msisdn: Some(msisdn),
        provider_reference: Some(ProviderReference::new()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account_registry::InMemoryUserDirectory;
    use crate::core::ledger_store::InMemoryLedgerStore;
    use crate::core::transaction_store::InMemoryTransactionStore;
    use crate::provider::sandbox::MSISDN_PENDING;
    use crate::provider::{ProviderKind, SandboxProvider};
    use async_trait::async_trait;
    use rstest::rstest;
    use crate::core::ledger_store::LedgerAudit;
    use crate::types::{AccountKind, Posting};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const MSISDN: &str = "256772000001";

    fn eur() -> Currency {
        Currency::new("EUR").unwrap()
    }

    fn orchestrator_with(provider: Arc<dyn PaymentProvider>) -> TransactionOrchestrator {
        TransactionOrchestrator::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryUserDirectory::with_users(["alice", "bob"])),
            provider,
            OrchestratorConfig::default(),
        )
    }

    fn sandboxed() -> (TransactionOrchestrator, Arc<SandboxProvider>) {
        let sandbox = Arc::new(SandboxProvider::new());
        (orchestrator_with(sandbox.clone()), sandbox)
    }

    async fn fund(orchestrator: &TransactionOrchestrator, user: &str, amount: Decimal) {
        let id = orchestrator
            .initiate_deposit(user, amount, &eur(), MSISDN, &format!("fund-{}", user))
            .await
            .unwrap();
        orchestrator.settle(id).await.unwrap();
    }

    #[rstest]
    #[case::empty_key(dec!(10), MSISDN, "", WalletError::InvalidIdempotencyKey)]
    #[case::zero_amount(
        dec!(0),
        MSISDN,
        "k",
        WalletError::invalid_amount(dec!(0), "EUR", "amount must be positive")
    )]
    #[case::bad_msisdn(
        dec!(10),
        "12ab",
        "k",
        WalletError::InvalidMsisdn { msisdn: "12ab".to_string() }
    )]
    #[tokio::test]
    async fn test_deposit_validation_creates_nothing(
        #[case] amount: Decimal,
        #[case] msisdn: &str,
        #[case] key: &str,
        #[case] expected: WalletError,
    ) {
        let (orchestrator, sandbox) = sandboxed();
        let result = orchestrator
            .initiate_deposit("alice", amount, &eur(), msisdn, key)
            .await;

        assert_eq!(result, Err(expected));
        assert!(orchestrator.transactions().all().await.unwrap().is_empty());
        assert_eq!(sandbox.deposit_requests(), 0);
    }

    #[tokio::test]
    async fn test_deposit_unknown_user() {
        let (orchestrator, _) = sandboxed();
        let result = orchestrator
            .initiate_deposit("mallory", dec!(10), &eur(), MSISDN, "k1")
            .await;
        assert_eq!(result, Err(WalletError::unknown_user("mallory")));
    }

    #[tokio::test]
    async fn test_deposit_is_submitted_and_stays_pending() {
        let (orchestrator, sandbox) = sandboxed();
        let id = orchestrator
            .initiate_deposit("alice", dec!(100.00), &eur(), MSISDN, "k1")
            .await
            .unwrap();

        let tx = orchestrator.get_transaction(id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.metadata.submitted);
        assert_eq!(sandbox.deposit_requests(), 1);
        assert_eq!(orchestrator.balance("alice", &eur()).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_deposit_replay_returns_same_id_without_provider_call() {
        let (orchestrator, sandbox) = sandboxed();
        let first = orchestrator
            .initiate_deposit("alice", dec!(100.00), &eur(), MSISDN, "k1")
            .await
            .unwrap();
        let second = orchestrator
            .initiate_deposit("alice", dec!(5.00), &eur(), MSISDN, "k1")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(sandbox.deposit_requests(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_provider_leaves_deposit_unsubmitted() {
        let (orchestrator, sandbox) = sandboxed();
        sandbox.fail_next(1);
        let id = orchestrator
            .initiate_deposit("alice", dec!(10), &eur(), MSISDN, "k1")
            .await
            .unwrap();

        let tx = orchestrator.get_transaction(id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(!tx.metadata.submitted);

        let outcome = orchestrator.submit(&tx).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted);
        assert!(sandbox.knows(tx.metadata.provider_reference.unwrap()));
    }

    #[tokio::test]
    async fn test_settle_deposit_posts_escrow_to_user() {
        let (orchestrator, _) = sandboxed();
        let id = orchestrator
            .initiate_deposit("alice", dec!(100.00), &eur(), MSISDN, "k1")
            .await
            .unwrap();

        let settled = orchestrator.settle(id).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);

        let postings = orchestrator.ledger().postings_for_transaction(id).await.unwrap();
        assert_eq!(postings.len(), 2);
        let escrow = orchestrator
            .registry()
            .get_or_create_escrow_account(&eur())
            .await
            .unwrap();
        assert_eq!(
            orchestrator.ledger().get_balance(escrow.id).await.unwrap(),
            dec!(-100.00)
        );
        assert_eq!(orchestrator.balance("alice", &eur()).await.unwrap(), dec!(100.00));

        // Second settle is a no-op
        orchestrator.settle(id).await.unwrap();
        assert_eq!(
            orchestrator.ledger().postings_for_transaction(id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_settle_after_fail_is_rejected() {
        let (orchestrator, _) = sandboxed();
        let id = orchestrator
            .initiate_deposit("alice", dec!(10), &eur(), MSISDN, "k1")
            .await
            .unwrap();

        orchestrator.fail(id, FailureReason::Timeout).await.unwrap();
        assert_eq!(
            orchestrator.settle(id).await,
            Err(WalletError::invalid_transition(
                id,
                TransactionStatus::Failed,
                TransactionStatus::Success
            ))
        );
        // fail is idempotent
        let again = orchestrator.fail(id, FailureReason::Timeout).await.unwrap();
        assert_eq!(again.metadata.failure_reason, Some(FailureReason::Timeout));
        assert!(orchestrator.ledger().postings_for_transaction(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_withdrawal_without_funds_fails_immediately() {
        let (orchestrator, sandbox) = sandboxed();
        let id = orchestrator
            .initiate_withdrawal("alice", dec!(10), &eur(), MSISDN, "w1")
            .await
            .unwrap();

        let tx = orchestrator.get_transaction(id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.metadata.failure_reason, Some(FailureReason::InsufficientFunds));
        assert_eq!(sandbox.withdrawal_requests(), 0);
    }

    #[tokio::test]
    async fn test_pending_withdrawal_reserves_funds() {
        let (orchestrator, _) = sandboxed();
        fund(&orchestrator, "alice", dec!(100)).await;

        let first = orchestrator
            .initiate_withdrawal("alice", dec!(70), &eur(), MSISDN_PENDING, "w1")
            .await
            .unwrap();
        assert_eq!(orchestrator.get_status(first).await.unwrap(), TransactionStatus::Pending);
        assert_eq!(
            orchestrator.available_balance("alice", &eur()).await.unwrap(),
            dec!(30)
        );

        let second = orchestrator
            .initiate_withdrawal("alice", dec!(70), &eur(), MSISDN_PENDING, "w2")
            .await
            .unwrap();
        assert_eq!(orchestrator.get_status(second).await.unwrap(), TransactionStatus::Failed);

        // A transfer cannot spend the reserved amount either
        let transfer = orchestrator
            .initiate_transfer("alice", "bob", dec!(50), &eur(), "t1")
            .await;
        assert!(matches!(transfer, Err(WalletError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn test_settled_withdrawal_debits_user() {
        let (orchestrator, _) = sandboxed();
        fund(&orchestrator, "alice", dec!(100)).await;

        let id = orchestrator
            .initiate_withdrawal("alice", dec!(40), &eur(), MSISDN, "w1")
            .await
            .unwrap();
        orchestrator.settle(id).await.unwrap();

        assert_eq!(orchestrator.balance("alice", &eur()).await.unwrap(), dec!(60));
        assert_eq!(
            orchestrator.available_balance("alice", &eur()).await.unwrap(),
            dec!(60)
        );
    }

    #[rstest]
    #[case::self_transfer("alice", "alice", WalletError::SelfTransferNotAllowed { user: "alice".to_string() })]
    #[case::unknown_sender("mallory", "bob", WalletError::unknown_user("mallory"))]
    #[case::unknown_recipient("alice", "mallory", WalletError::unknown_recipient("mallory"))]
    #[tokio::test]
    async fn test_transfer_validation(
        #[case] sender: &str,
        #[case] receiver: &str,
        #[case] expected: WalletError,
    ) {
        let (orchestrator, _) = sandboxed();
        let result = orchestrator
            .initiate_transfer(sender, receiver, dec!(1), &eur(), "t1")
            .await;
        assert_eq!(result, Err(expected));
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_without_provider() {
        let (orchestrator, sandbox) = sandboxed();
        fund(&orchestrator, "alice", dec!(100.00)).await;

        let id = orchestrator
            .initiate_transfer("alice", "bob", dec!(50.00), &eur(), "t1")
            .await
            .unwrap();
        let replay = orchestrator
            .initiate_transfer("alice", "bob", dec!(50.00), &eur(), "t1")
            .await
            .unwrap();

        assert_eq!(id, replay);
        assert_eq!(orchestrator.get_status(id).await.unwrap(), TransactionStatus::Success);
        assert_eq!(orchestrator.balance("alice", &eur()).await.unwrap(), dec!(50.00));
        assert_eq!(orchestrator.balance("bob", &eur()).await.unwrap(), dec!(50.00));
        assert_eq!(sandbox.withdrawal_requests(), 0);

        let history = orchestrator.history("bob").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
    }

    #[tokio::test]
    async fn test_transfer_overdraft_creates_nothing() {
        let (orchestrator, _) = sandboxed();
        let result = orchestrator
            .initiate_transfer("alice", "bob", dec!(1), &eur(), "t1")
            .await;

        assert_eq!(
            result,
            Err(WalletError::insufficient_funds("alice", Decimal::ZERO, dec!(1)))
        );
        assert!(orchestrator
            .transactions()
            .find_by_key(TransactionKind::Transfer, "t1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_notification_settles_and_late_duplicate_is_ignored() {
        let (orchestrator, _) = sandboxed();
        let id = orchestrator
            .initiate_deposit("alice", dec!(25), &eur(), MSISDN, "k1")
            .await
            .unwrap();
        let reference = orchestrator
            .get_transaction(id)
            .await
            .unwrap()
            .metadata
            .provider_reference
            .unwrap();

        let settled = orchestrator
            .handle_provider_notification(reference, ProviderStatus::Success)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);

        let late = orchestrator
            .handle_provider_notification(reference, ProviderStatus::Failed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.status, TransactionStatus::Success);
        assert_eq!(orchestrator.balance("alice", &eur()).await.unwrap(), dec!(25));

        let unknown = orchestrator
            .handle_provider_notification(ProviderReference::new(), ProviderStatus::Success)
            .await
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_lock_tables_drain_after_settlement() {
        let (orchestrator, _) = sandboxed();
        fund(&orchestrator, "alice", dec!(20)).await;
        for i in 0..20 {
            orchestrator
                .initiate_transfer("alice", "bob", dec!(1), &eur(), &format!("t{}", i))
                .await
                .unwrap();
        }
        let id = orchestrator
            .initiate_withdrawal("bob", dec!(5), &eur(), MSISDN, "w1")
            .await
            .unwrap();
        orchestrator.settle(id).await.unwrap();

        assert!(orchestrator.transaction_locks.is_empty());
        assert!(orchestrator.account_locks.is_empty());
    }

    /// Ledger that refuses every commit once `reject` is set
    #[derive(Default)]
    struct RejectingLedger {
        inner: InMemoryLedgerStore,
        reject: AtomicBool,
    }

    #[async_trait]
    impl LedgerStore for RejectingLedger {
        async fn create_account(
            &self,
            owner: Option<&str>,
            currency: &Currency,
            kind: AccountKind,
        ) -> Result<Account, WalletError> {
            self.inner.create_account(owner, currency, kind).await
        }

        async fn find_account(
            &self,
            owner: Option<&str>,
            currency: &Currency,
            kind: AccountKind,
        ) -> Result<Option<Account>, WalletError> {
            self.inner.find_account(owner, currency, kind).await
        }

        async fn get_account(&self, id: AccountId) -> Result<Option<Account>, WalletError> {
            self.inner.get_account(id).await
        }

        async fn accounts(&self) -> Result<Vec<Account>, WalletError> {
            self.inner.accounts().await
        }

        async fn get_balance(&self, id: AccountId) -> Result<Decimal, WalletError> {
            self.inner.get_balance(id).await
        }

        async fn commit_postings(
            &self,
            transaction: TransactionId,
            postings: Vec<Posting>,
        ) -> Result<(), WalletError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(WalletError::amount_overflow("balance of receiver"));
            }
            self.inner.commit_postings(transaction, postings).await
        }

        async fn postings_for_transaction(
            &self,
            transaction: TransactionId,
        ) -> Result<Vec<Posting>, WalletError> {
            self.inner.postings_for_transaction(transaction).await
        }

        async fn postings_for_account(&self, id: AccountId) -> Result<Vec<Posting>, WalletError> {
            self.inner.postings_for_account(id).await
        }

        async fn audit(&self) -> Result<LedgerAudit, WalletError> {
            self.inner.audit().await
        }
    }

    #[tokio::test]
    async fn test_rejected_transfer_postings_fail_the_transaction() {
        let ledger = Arc::new(RejectingLedger::default());
        let orchestrator = TransactionOrchestrator::new(
            ledger.clone(),
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryUserDirectory::with_users(["alice", "bob"])),
            Arc::new(SandboxProvider::new()),
            OrchestratorConfig::default(),
        );
        fund(&orchestrator, "alice", dec!(100)).await;
        ledger.reject.store(true, Ordering::SeqCst);

        let result = orchestrator
            .initiate_transfer("alice", "bob", dec!(40), &eur(), "t1")
            .await;
        assert!(matches!(result, Err(WalletError::AmountOverflow { .. })));

        let tx = orchestrator
            .transactions()
            .find_by_key(TransactionKind::Transfer, "t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(
            tx.metadata.failure_reason,
            Some(FailureReason::PostingRejected(
                "Amount overflow in balance of receiver".to_string()
            ))
        );
        assert!(orchestrator.transactions().pending().await.unwrap().is_empty());
        assert_eq!(orchestrator.balance("alice", &eur()).await.unwrap(), dec!(100));
        assert_eq!(orchestrator.available_balance("alice", &eur()).await.unwrap(), dec!(100));

        // The key stays bound to the failed attempt
        ledger.reject.store(false, Ordering::SeqCst);
        let replay = orchestrator
            .initiate_transfer("alice", "bob", dec!(40), &eur(), "t1")
            .await
            .unwrap();
        assert_eq!(replay, tx.id);
        assert_eq!(orchestrator.balance("bob", &eur()).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_replay_in_other_currency_opens_no_account() {
        let (orchestrator, _) = sandboxed();
        let ugx = Currency::new("UGX").unwrap();
        fund(&orchestrator, "alice", dec!(100)).await;
        let deposit = orchestrator
            .transactions()
            .find_by_key(TransactionKind::Deposit, "fund-alice")
            .await
            .unwrap()
            .unwrap()
            .id;
        let withdrawal = orchestrator
            .initiate_withdrawal("alice", dec!(10), &eur(), MSISDN, "w1")
            .await
            .unwrap();
        let transfer = orchestrator
            .initiate_transfer("alice", "bob", dec!(10), &eur(), "t1")
            .await
            .unwrap();
        let accounts = orchestrator.ledger().accounts().await.unwrap().len();

        let replayed = [
            orchestrator
                .initiate_deposit("alice", dec!(500), &ugx, MSISDN, "fund-alice")
                .await
                .unwrap(),
            orchestrator
                .initiate_withdrawal("alice", dec!(500), &ugx, MSISDN, "w1")
                .await
                .unwrap(),
            orchestrator
                .initiate_transfer("alice", "bob", dec!(500), &ugx, "t1")
                .await
                .unwrap(),
        ];

        assert_eq!(replayed, [deposit, withdrawal, transfer]);
        assert_eq!(orchestrator.ledger().accounts().await.unwrap().len(), accounts);
        for user in ["alice", "bob"] {
            assert!(orchestrator
                .ledger()
                .find_account(Some(user), &ugx, AccountKind::User)
                .await
                .unwrap()
                .is_none());
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl PaymentProvider for StalledProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Sandbox
        }

        async fn request_deposit(&self, _: &ProviderRequest) -> Result<(), ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn request_withdrawal(&self, _: &ProviderRequest) -> Result<(), ProviderError> {
            Err(ProviderError::rejected("PAYEE_NOT_FOUND"))
        }

        async fn get_status(
            &self,
            _: ProviderReference,
            _: TransactionKind,
        ) -> Result<ProviderStatus, ProviderError> {
            Ok(ProviderStatus::Pending)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_leaves_deposit_pending() {
        let orchestrator = orchestrator_with(Arc::new(StalledProvider));
        let id = orchestrator
            .initiate_deposit("alice", dec!(10), &eur(), MSISDN, "k1")
            .await
            .unwrap();

        let tx = orchestrator.get_transaction(id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(!tx.metadata.submitted);
    }

    #[tokio::test]
    async fn test_synchronous_rejection_fails_withdrawal() {
        let orchestrator = orchestrator_with(Arc::new(StalledProvider));
        // This provider never answers deposits, so seed a settled one directly
        let deposit = Transaction::pending(
            "seed",
            TransactionKind::Deposit,
            eur(),
            dec!(100),
            provider_metadata("alice", MSISDN.to_string()),
        );
        let seeded = orchestrator
            .transactions()
            .insert_if_absent(deposit)
            .await
            .unwrap()
            .transaction()
            .clone();
        orchestrator.settle(seeded.id).await.unwrap();

        let id = orchestrator
            .initiate_withdrawal("alice", dec!(40), &eur(), MSISDN, "w1")
            .await
            .unwrap();

        let tx = orchestrator.get_transaction(id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(
            tx.metadata.failure_reason,
            Some(FailureReason::ProviderRejected("PAYEE_NOT_FOUND".to_string()))
        );
        assert_eq!(orchestrator.balance("alice", &eur()).await.unwrap(), dec!(100));
        assert!(orchestrator.ledger().postings_for_transaction(id).await.unwrap().is_empty());
    }
}
