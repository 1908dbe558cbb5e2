//! Transaction-related types for the wallet ledger
//!
//! A transaction is one money-movement intent followed end-to-end: it is
//! created `PENDING`, owns no postings until it settles, and ends in exactly one
//! terminal status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::account::UserId;
use super::error::WalletError;
use super::money::Currency;

/// Transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Generate a fresh random transaction id
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Reference sent to the payment provider (`X-Reference-Id` for MoMo)
///
/// Assigned when the transaction row is created, before any provider call, so
/// a resubmission after a crash or outage reuses the same reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderReference(pub Uuid);

impl ProviderReference {
    /// Generate a fresh UUIDv4 reference
    pub fn new() -> Self {
        ProviderReference(Uuid::new_v4())
    }
}

impl Default for ProviderReference {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProviderReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    /// Money entering the ledger from the provider (MoMo collection)
    Deposit,

    /// Money leaving the ledger through the provider (MoMo disbursement)
    Withdrawal,

    /// Internal movement between two users, settled synchronously
    Transfer,
}

impl TransactionKind {
    /// Whether settlement depends on an external provider
    pub fn is_provider_backed(self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::Withdrawal)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Deposit => f.write_str("deposit"),
            TransactionKind::Withdrawal => f.write_str("withdrawal"),
            TransactionKind::Transfer => f.write_str("transfer"),
        }
    }
}

/// Lifecycle status
///
/// `PENDING → SUCCESS` or `PENDING → FAILED`. Both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    /// Created, not yet resolved
    Pending,
    /// Settled: the balanced posting set is committed
    Success,
    /// Terminated without moving money
    Failed,
}

impl TransactionStatus {
    /// Whether the status is `SUCCESS` or `FAILED`
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => f.write_str("PENDING"),
            TransactionStatus::Success => f.write_str("SUCCESS"),
            TransactionStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// Why a transaction ended `FAILED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum FailureReason {
    /// The provider refused the request synchronously
    ProviderRejected(String),

    /// The provider reported a terminal status while polling
    ProviderFailed(String),

    /// The reconciliation horizon elapsed without a terminal provider status
    Timeout,

    /// The user's available balance did not cover a withdrawal
    InsufficientFunds,

    /// The ledger refused the transaction's postings
    PostingRejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ProviderRejected(reason) => write!(f, "ProviderRejected: {}", reason),
            FailureReason::ProviderFailed(status) => write!(f, "ProviderFailed: {}", status),
            FailureReason::Timeout => f.write_str("Timeout"),
            FailureReason::InsufficientFunds => f.write_str("InsufficientFunds"),
            FailureReason::PostingRejected(message) => write!(f, "PostingRejected: {}", message),
        }
    }
}

/// Free-form transaction details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// Initiating user (depositor, withdrawer or transfer sender)
    pub user_id: UserId,

    /// Transfer receiver
    pub counterparty: Option<UserId>,

    /// Payer/payee phone number for provider-backed kinds
    pub msisdn: Option<String>,

    /// Reference the provider knows the request by
    pub provider_reference: Option<ProviderReference>,

    /// Whether the provider has acknowledged the request
    pub submitted: bool,

    /// Number of reconciliation polls or resubmissions so far
    pub poll_attempts: u32,

    /// When reconciliation last touched the transaction
    pub last_polled_at: Option<DateTime<Utc>>,

    /// Set once the transaction is `FAILED`
    pub failure_reason: Option<FailureReason>,
}

/// One money-movement intent end-to-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction id
    pub id: TransactionId,

    /// Caller-supplied key, unique per kind
    pub idempotency_key: String,

    /// Deposit, withdrawal or transfer
    pub kind: TransactionKind,

    /// Current lifecycle status
    pub status: TransactionStatus,

    /// Currency of `amount`
    pub currency: Currency,

    /// Amount moved on settlement
    pub amount: Decimal,

    /// Counterparties, provider bookkeeping, failure reason
    pub metadata: TransactionMetadata,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new `PENDING` transaction
    pub fn pending(
        idempotency_key: &str,
        kind: TransactionKind,
        currency: Currency,
        amount: Decimal,
        metadata: TransactionMetadata,
    ) -> Self {
        let now = Utc::now();
        Transaction {
            id: TransactionId::new(),
            idempotency_key: idempotency_key.to_string(),
            kind,
            status: TransactionStatus::Pending,
            currency,
            amount,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Instant reconciliation last considered this transaction (or its creation)
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.metadata.last_polled_at.unwrap_or(self.created_at)
    }
}

/// Check that a phone number looks like an international MSISDN
///
/// Accepts an optional leading `+` followed by 8 to 15 digits and returns the
/// digits only, which is the form MoMo expects as `partyId`.
pub fn validate_msisdn(msisdn: &str) -> Result<String, WalletError> {
    let trimmed = msisdn.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    if !(8..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(WalletError::InvalidMsisdn {
            msisdn: msisdn.to_string(),
        });
    }

    Ok(digits.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pending_transaction_defaults() {
        let tx = Transaction::pending(
            "k1",
            TransactionKind::Deposit,
            Currency::new("EUR").unwrap(),
            dec!(100.00),
            TransactionMetadata {
                user_id: "alice".to_string(),
                ..Default::default()
            },
        );

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.created_at, tx.updated_at);
        assert_eq!(tx.last_activity(), tx.created_at);
        assert!(!tx.metadata.submitted);
        assert_eq!(tx.metadata.poll_attempts, 0);
    }

    #[rstest]
    #[case(TransactionStatus::Pending, false)]
    #[case(TransactionStatus::Success, true)]
    #[case(TransactionStatus::Failed, true)]
    fn test_terminal_statuses(#[case] status: TransactionStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[rstest]
    #[case(TransactionKind::Deposit, true)]
    #[case(TransactionKind::Withdrawal, true)]
    #[case(TransactionKind::Transfer, false)]
    fn test_provider_backed_kinds(#[case] kind: TransactionKind, #[case] expected: bool) {
        assert_eq!(kind.is_provider_backed(), expected);
    }

    #[rstest]
    #[case("46733123450", "46733123450")]
    #[case("+256772123456", "256772123456")]
    #[case(" 23350000000 ", "23350000000")]
    fn test_validate_msisdn_accepts(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate_msisdn(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("1234567")]
    #[case("1234567890123456")]
    #[case("0772-123-456")]
    #[case("phone")]
    fn test_validate_msisdn_rejects(#[case] input: &str) {
        assert!(matches!(
            validate_msisdn(input),
            Err(WalletError::InvalidMsisdn { .. })
        ));
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::Timeout.to_string(), "Timeout");
        assert_eq!(
            FailureReason::ProviderFailed("REJECTED".to_string()).to_string(),
            "ProviderFailed: REJECTED"
        );
    }
}
