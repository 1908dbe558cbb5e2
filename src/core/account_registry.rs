//! Account lookup and lazy creation
//!
//! The registry maps (user, currency) pairs and currencies to ledger accounts,
//! creating them on first use. It also fronts the user directory, so that an
//! account is only ever opened for a user the authentication side knows about.

use async_trait::async_trait;
use dashmap::DashSet;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::traits::{LedgerStore, UserDirectory};
use crate::types::{Account, AccountKind, Currency, UserId, WalletError};

/// User directory backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashSet<UserId>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated with `users`
    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        let directory = Self::new();
        for user in users {
            directory.users.insert(user.into());
        }
        directory
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn contains(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    async fn register(&self, user: UserId) -> bool {
        self.users.insert(user)
    }
}

/// Resolves user and escrow accounts, creating them on first use
#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<dyn LedgerStore>,
    users: Arc<dyn UserDirectory>,
}

impl AccountRegistry {
    /// Create a registry over a ledger store and a user directory
    pub fn new(store: Arc<dyn LedgerStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    /// Whether the user directory knows `user`
    pub async fn is_known_user(&self, user: &str) -> bool {
        self.users.contains(user).await
    }

    /// Get the user's account in `currency`, creating it on first call
    ///
    /// Fails with `UnknownUser` if the user directory does not know `user`.
    pub async fn get_or_create_user_account(
        &self,
        user: &str,
        currency: &Currency,
    ) -> Result<Account, WalletError> {
        if !self.users.contains(user).await {
            return Err(WalletError::unknown_user(user));
        }
        self.store
            .create_account(Some(user), currency, AccountKind::User)
            .await
    }

    /// Get the shared escrow account for `currency`, creating it on first call
    pub async fn get_or_create_escrow_account(
        &self,
        currency: &Currency,
    ) -> Result<Account, WalletError> {
        self.store
            .create_account(None, currency, AccountKind::Escrow)
            .await
    }

    /// Ledger balance of the user's account in `currency`
    ///
    /// Zero when the account has not been opened yet. Does not create it.
    pub async fn user_balance(&self, user: &str, currency: &Currency) -> Result<Decimal, WalletError> {
        if !self.users.contains(user).await {
            return Err(WalletError::unknown_user(user));
        }
        match self
            .store
            .find_account(Some(user), currency, AccountKind::User)
            .await?
        {
            Some(account) => self.store.get_balance(account.id).await,
            None => Ok(Decimal::ZERO),
        }
    }

    /// The underlying ledger store
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger_store::InMemoryLedgerStore;

    fn registry() -> AccountRegistry {
        AccountRegistry::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryUserDirectory::with_users(["alice"])),
        )
    }

    #[tokio::test]
    async fn test_user_account_created_once() {
        let registry = registry();
        let eur = Currency::new("EUR").unwrap();

        let first = registry.get_or_create_user_account("alice", &eur).await.unwrap();
        let second = registry.get_or_create_user_account("alice", &eur).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, AccountKind::User);
    }

    #[tokio::test]
    async fn test_unknown_user_gets_no_account() {
        let registry = registry();
        let eur = Currency::new("EUR").unwrap();

        assert_eq!(
            registry.get_or_create_user_account("mallory", &eur).await,
            Err(WalletError::unknown_user("mallory"))
        );
        assert!(registry.store().accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_escrow_per_currency() {
        let registry = registry();
        let eur = Currency::new("EUR").unwrap();
        let ugx = Currency::new("UGX").unwrap();

        let a = registry.get_or_create_escrow_account(&eur).await.unwrap();
        let b = registry.get_or_create_escrow_account(&eur).await.unwrap();
        let c = registry.get_or_create_escrow_account(&ugx).await.unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.owner.is_none());
    }

    #[tokio::test]
    async fn test_user_balance_does_not_open_account() {
        let registry = registry();
        let eur = Currency::new("EUR").unwrap();

        assert_eq!(registry.user_balance("alice", &eur).await.unwrap(), Decimal::ZERO);
        assert!(registry.store().accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_reports_new_users() {
        let directory = InMemoryUserDirectory::new();
        assert!(directory.register("bob".to_string()).await);
        assert!(!directory.register("bob".to_string()).await);
        assert!(directory.contains("bob").await);
    }
}
