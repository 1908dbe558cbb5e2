//! Error types for the wallet ledger core
//!
//! This module defines every error that can surface from the ledger, the
//! transaction orchestrator and the replay tooling around them.
//!
//! # Error Categories
//!
//! - **Validation Errors**: bad amount, currency, phone number, self-transfer. Rejected
//!   before any state is created.
//! - **Identity Errors**: unknown sender or recipient.
//! - **Funds Errors**: insufficient available balance for a transfer.
//! - **Provider Errors**: transient (`ProviderUnavailable`) or terminal (`ProviderRejected`).
//! - **State Errors**: unknown transaction, illegal lifecycle transition.
//! - **Storage Invariant Errors**: imbalanced or duplicate postings. These indicate an
//!   orchestration bug rather than a user-facing condition.
//! - **File I/O and CSV Errors**: raised by the replay tooling only.

use rust_decimal::Decimal;
use thiserror::Error;

use super::account::AccountId;
use super::transaction::{TransactionId, TransactionStatus};
use crate::provider::ProviderError;

/// Main error type for the wallet ledger core
///
/// Each variant carries enough context to log or report the failure without
/// having to re-query the stores.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalletError {
    /// File not found at the specified path
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found
        path: String,
    },

    /// I/O error occurred while reading or writing files
    #[error("I/O error: {message}")]
    IoError {
        /// Description of the I/O error
        message: String,
    },

    /// CSV parsing error occurred
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },

    /// Configuration could not be turned into a usable runtime setup
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration
        message: String,
    },

    /// The acting user is not known to the user directory
    #[error("Unknown user '{user}'")]
    UnknownUser {
        /// User id supplied by the caller
        user: String,
    },

    /// The transfer recipient is not known to the user directory
    #[error("Unknown recipient '{user}'")]
    UnknownRecipient {
        /// Recipient user id
        user: String,
    },

    /// Sender and receiver of a transfer are the same user
    #[error("User '{user}' cannot transfer to themselves")]
    SelfTransferNotAllowed {
        /// The user attempting the transfer
        user: String,
    },

    /// Available balance does not cover the requested amount
    #[error("Insufficient funds for user '{user}': available {available}, requested {requested}")]
    InsufficientFunds {
        /// User id
        user: String,
        /// Available balance at check time
        available: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// Amount is non-positive or has more decimals than the currency allows
    #[error("Invalid amount {amount} {currency}: {reason}")]
    InvalidAmount {
        /// The rejected amount
        amount: Decimal,
        /// Currency code the amount was given in
        currency: String,
        /// Why the amount was rejected
        reason: String,
    },

    /// Currency code is not a three-letter ISO-4217 code
    #[error("Invalid currency code '{code}'")]
    InvalidCurrency {
        /// The rejected code
        code: String,
    },

    /// Phone number is not a plausible MSISDN
    #[error("Invalid MSISDN '{msisdn}'")]
    InvalidMsisdn {
        /// The rejected phone number
        msisdn: String,
    },

    /// Idempotency key is empty
    #[error("Idempotency key must not be empty")]
    InvalidIdempotencyKey,

    /// The payment provider could not be reached (retryable)
    #[error("Payment provider unavailable: {message}")]
    ProviderUnavailable {
        /// Transport-level description
        message: String,
    },

    /// The payment provider refused the request (terminal)
    #[error("Payment provider rejected the request: {reason}")]
    ProviderRejected {
        /// Provider-reported reason
        reason: String,
    },

    /// Transaction id does not exist
    #[error("Transaction {id} not found")]
    TransactionNotFound {
        /// The missing transaction id
        id: TransactionId,
    },

    /// A lifecycle transition out of a terminal state was requested
    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        /// Transaction id
        id: TransactionId,
        /// Current status
        from: TransactionStatus,
        /// Requested status
        to: TransactionStatus,
    },

    /// Account id does not exist in the ledger
    #[error("Account {id} not found")]
    UnknownAccount {
        /// The missing account id
        id: AccountId,
    },

    /// Account creation arguments violate the owner/kind rules
    #[error("Invalid account: {message}")]
    InvalidAccount {
        /// Description of the violation
        message: String,
    },

    /// A posting row or posting set is malformed
    #[error("Invalid posting for transaction {transaction}: {message}")]
    InvalidPosting {
        /// Owning transaction
        transaction: TransactionId,
        /// Description of the violation
        message: String,
    },

    /// Debits and credits of a posting set differ
    #[error("Imbalanced postings for transaction {transaction}: debits {debits}, credits {credits}")]
    ImbalancedPostings {
        /// Owning transaction
        transaction: TransactionId,
        /// Sum of debits
        debits: Decimal,
        /// Sum of credits
        credits: Decimal,
    },

    /// Postings were already committed for the transaction
    #[error("Postings already committed for transaction {transaction}")]
    DuplicatePostings {
        /// Owning transaction
        transaction: TransactionId,
    },

    /// A balance or total left the representable `Decimal` range
    #[error("Amount overflow in {context}")]
    AmountOverflow {
        /// Which balance or total overflowed
        context: String,
    },
}

// Conversion from io::Error to WalletError
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        WalletError::IoError {
            message: error.to_string(),
        }
    }
}

// Conversion from csv::Error to WalletError
impl From<csv::Error> for WalletError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        WalletError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl From<ProviderError> for WalletError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Unavailable { message } => WalletError::ProviderUnavailable { message },
            ProviderError::Rejected { reason } => WalletError::ProviderRejected { reason },
        }
    }
}

// Helper functions for creating common errors

impl WalletError {
    /// Create an UnknownUser error
    pub fn unknown_user(user: &str) -> Self {
        WalletError::UnknownUser {
            user: user.to_string(),
        }
    }

    /// Create an UnknownRecipient error
    pub fn unknown_recipient(user: &str) -> Self {
        WalletError::UnknownRecipient {
            user: user.to_string(),
        }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(user: &str, available: Decimal, requested: Decimal) -> Self {
        WalletError::InsufficientFunds {
            user: user.to_string(),
            available,
            requested,
        }
    }

    /// Create an InvalidAmount error
    pub fn invalid_amount(amount: Decimal, currency: &str, reason: &str) -> Self {
        WalletError::InvalidAmount {
            amount,
            currency: currency.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an InvalidPosting error
    pub fn invalid_posting(transaction: TransactionId, message: impl Into<String>) -> Self {
        WalletError::InvalidPosting {
            transaction,
            message: message.into(),
        }
    }

    /// Create an AmountOverflow error
    pub fn amount_overflow(context: impl Into<String>) -> Self {
        WalletError::AmountOverflow {
            context: context.into(),
        }
    }

    /// Create an InvalidStateTransition error
    pub fn invalid_transition(
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Self {
        WalletError::InvalidStateTransition { id, from, to }
    }

    /// Whether the error is a storage invariant violation (an orchestration bug)
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            WalletError::ImbalancedPostings { .. }
                | WalletError::DuplicatePostings { .. }
                | WalletError::InvalidPosting { .. }
                | WalletError::AmountOverflow { .. }
        )
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::ProviderUnavailable { .. })
    }
}
