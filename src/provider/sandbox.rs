//! Deterministic in-process provider
//!
//! Reproduces the behaviour of the MoMo sandbox test numbers so the ledger can be
//! exercised end-to-end without network access:
//!
//! | MSISDN        | raw status reported |
//! |---------------|---------------------|
//! | `46733123450` | `FAILED`            |
//! | `46733123451` | `REJECTED`          |
//! | `46733123452` | `TIMEOUT`           |
//! | `46733123453` | `ONGOING`           |
//! | `46733123454` | `PENDING`           |
//! | anything else | `SUCCESSFUL`        |
//!
//! On top of that, tests can script per-MSISDN status sequences and inject
//! outages, and read call counters to check at-most-once submission.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tracing::debug;

use super::{PaymentProvider, ProviderError, ProviderKind, ProviderRequest, ProviderStatus};
use crate::types::{validate_msisdn, ProviderReference, TransactionKind};

/// Sandbox number whose requests end `FAILED`
pub const MSISDN_FAILED: &str = "46733123450";
/// Sandbox number whose requests end `REJECTED`
pub const MSISDN_REJECTED: &str = "46733123451";
/// Sandbox number whose requests end `TIMEOUT`
pub const MSISDN_TIMEOUT: &str = "46733123452";
/// Sandbox number whose requests stay `ONGOING`
pub const MSISDN_ONGOING: &str = "46733123453";
/// Sandbox number whose requests stay `PENDING`
pub const MSISDN_PENDING: &str = "46733123454";

#[derive(Debug, Clone)]
struct SandboxRequest {
    kind: TransactionKind,
    msisdn: String,
    polls: usize,
}

/// Simulated mobile-money rail
#[derive(Debug, Default)]
pub struct SandboxProvider {
    requests: DashMap<ProviderReference, SandboxRequest>,
    scripts: DashMap<String, Vec<String>>,
    outage: AtomicU32,
    deposit_calls: AtomicUsize,
    withdrawal_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl SandboxProvider {
    /// Create a sandbox with no scripts and no outage
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `statuses` (raw MoMo words) on successive polls for `msisdn`
    ///
    /// The last status repeats once the sequence is exhausted.
    pub fn script(&self, msisdn: &str, statuses: &[&str]) {
        self.scripts.insert(
            msisdn.to_string(),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Make the next `calls` provider calls (of any kind) fail as unavailable
    pub fn fail_next(&self, calls: u32) {
        self.outage.store(calls, Ordering::SeqCst);
    }

    /// Number of `request_deposit` calls received
    pub fn deposit_requests(&self) -> usize {
        self.deposit_calls.load(Ordering::SeqCst)
    }

    /// Number of `request_withdrawal` calls received
    pub fn withdrawal_requests(&self) -> usize {
        self.withdrawal_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_status` calls received
    pub fn status_queries(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Whether the sandbox holds a request under `reference`
    pub fn knows(&self, reference: ProviderReference) -> bool {
        self.requests.get(&reference).is_some()
    }

    fn take_outage(&self) -> Result<(), ProviderError> {
        let consumed = self
            .outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if consumed {
            Err(ProviderError::unavailable("sandbox outage"))
        } else {
            Ok(())
        }
    }

    fn accept(&self, kind: TransactionKind, request: &ProviderRequest) -> Result<(), ProviderError> {
        self.take_outage()?;

        let msisdn = validate_msisdn(&request.msisdn)
            .map_err(|_| ProviderError::rejected("INVALID_MSISDN"))?;
        if request.amount <= Decimal::ZERO {
            return Err(ProviderError::rejected("INVALID_AMOUNT"));
        }

        // A known reference is accepted again, like MoMo's 409 on a duplicate
        self.requests
            .entry(request.reference)
            .or_insert_with(|| SandboxRequest {
                kind,
                msisdn,
                polls: 0,
            });
        debug!(reference = %request.reference, %kind, "sandbox accepted request");

        Ok(())
    }

    fn raw_status(&self, msisdn: &str, poll: usize) -> String {
        if let Some(script) = self.scripts.get(msisdn) {
            if let Some(last) = script.last() {
                let index = poll.saturating_sub(1).min(script.len() - 1);
                return script.get(index).unwrap_or(last).clone();
            }
        }

        match msisdn {
            MSISDN_FAILED => "FAILED",
            MSISDN_REJECTED => "REJECTED",
            MSISDN_TIMEOUT => "TIMEOUT",
            MSISDN_ONGOING => "ONGOING",
            MSISDN_PENDING => "PENDING",
            _ => "SUCCESSFUL",
        }
        .to_string()
    }
}

#[async_trait]
impl PaymentProvider for SandboxProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sandbox
    }

    async fn request_deposit(&self, request: &ProviderRequest) -> Result<(), ProviderError> {
        self.deposit_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(TransactionKind::Deposit, request)
    }

    async fn request_withdrawal(&self, request: &ProviderRequest) -> Result<(), ProviderError> {
        self.withdrawal_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(TransactionKind::Withdrawal, request)
    }

    async fn get_status(
        &self,
        reference: ProviderReference,
        kind: TransactionKind,
    ) -> Result<ProviderStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.take_outage()?;

        let (msisdn, poll) = match self.requests.get_mut(&reference) {
            Some(mut entry) if entry.kind == kind => {
                entry.polls += 1;
                (entry.msisdn.clone(), entry.polls)
            }
            _ => return Ok(ProviderStatus::Pending),
        };

        Ok(ProviderStatus::normalize(&self.raw_status(&msisdn, poll)))
    }
}
