//! Types module
//!
//! Contains core data structures used throughout the ledger core.
//! This module organizes types into logical submodules:
//! - `account`: Account identity and kinds
//! - `money`: Currency codes and amount validation
//! - `posting`: Immutable double-entry rows
//! - `transaction`: Transaction lifecycle types and identifiers
//! - `error`: Error types for the ledger core

pub mod account;
pub mod error;
pub mod money;
pub mod posting;
pub mod transaction;

pub use account::{Account, AccountId, AccountKey, AccountKind, UserId};
pub use error::WalletError;
pub use money::{Currency, MAX_AMOUNT_UNITS};
pub use posting::{balanced_pair, Posting, PostingId};
pub use transaction::{
    validate_msisdn, FailureReason, ProviderReference, Transaction, TransactionId,
    TransactionKind, TransactionMetadata, TransactionStatus,
};
