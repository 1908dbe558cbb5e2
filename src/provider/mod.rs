//! Payment provider gateway
//!
//! This module defines the capability interface the orchestrator uses to move
//! money across the boundary of the closed ledger, and the small closed set of
//! implementations behind it:
//!
//! - [`MtnMomoProvider`] - MTN Mobile Money Open API (collections + disbursements)
//! - [`SandboxProvider`] - deterministic in-process simulation of the MoMo sandbox
//!
//! The implementation is chosen explicitly through [`ProviderKind`] and
//! [`create_provider`], never by dynamic lookup.
//!
//! # Error model
//!
//! Providers distinguish two kinds of failure:
//! - [`ProviderError::Unavailable`]: the provider could not be reached or did not
//!   answer in time. Retryable; a transaction must stay `PENDING`.
//! - [`ProviderError::Rejected`]: the provider answered and refused the request.
//!   Terminal; the transaction is marked `FAILED`.

use async_trait::async_trait;
use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::types::{Currency, ProviderReference, TransactionKind, WalletError};

pub mod mtn_momo;
pub mod sandbox;
pub mod status;
mod token_cache;

pub use mtn_momo::{MtnMomoConfig, MtnMomoProvider, ProductCredentials};
pub use sandbox::SandboxProvider;
pub use status::ProviderStatus;

/// Failure talking to a payment provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Network error, timeout, 5xx, throttling or unusable credentials
    #[error("provider unavailable: {message}")]
    Unavailable {
        /// Transport-level description
        message: String,
    },

    /// The provider answered and refused the request
    #[error("provider rejected request: {reason}")]
    Rejected {
        /// Provider-reported reason
        reason: String,
    },
}

impl ProviderError {
    /// Create an Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            message: message.into(),
        }
    }

    /// Create a Rejected error
    pub fn rejected(reason: impl Into<String>) -> Self {
        ProviderError::Rejected {
            reason: reason.into(),
        }
    }
}

/// A collection or disbursement request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    /// Reference the provider will index the request by
    pub reference: ProviderReference,

    /// Amount, already validated against the currency's precision
    pub amount: Decimal,

    /// Currency of the amount
    pub currency: Currency,

    /// Payer (deposit) or payee (withdrawal) phone number, digits only
    pub msisdn: String,

    /// Our identifier for the request, echoed back by the provider
    pub external_id: String,

    /// Message shown to the payer
    pub payer_message: String,

    /// Note attached for the payee
    pub payee_note: String,
}

/// Capability set of an external mobile-money rail
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Which implementation this is
    fn kind(&self) -> ProviderKind;

    /// Ask the provider to pull `amount` from the payer into the rail (deposit)
    ///
    /// `Ok(())` means the provider accepted and queued the request; the outcome
    /// is learned later through [`PaymentProvider::get_status`].
    async fn request_deposit(&self, request: &ProviderRequest) -> Result<(), ProviderError>;

    /// Ask the provider to push `amount` from the rail to the payee (withdrawal)
    async fn request_withdrawal(&self, request: &ProviderRequest) -> Result<(), ProviderError>;

    /// Query the normalized status of a previously submitted request
    async fn get_status(
        &self,
        reference: ProviderReference,
        kind: TransactionKind,
    ) -> Result<ProviderStatus, ProviderError>;
}

/// Available provider implementations
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// In-process simulation of the MoMo sandbox
    Sandbox,
    /// MTN Mobile Money Open API
    MtnMomo,
}

/// Create the provider selected by configuration
///
/// # Arguments
///
/// * `kind` - Which implementation to build
/// * `mtn` - MoMo settings, required when `kind` is [`ProviderKind::MtnMomo`]
///
/// # Returns
///
/// A shared provider handle, or `InvalidConfig` if the MoMo settings are
/// missing or the HTTP client cannot be built.
pub fn create_provider(
    kind: ProviderKind,
    mtn: Option<MtnMomoConfig>,
) -> Result<Arc<dyn PaymentProvider>, WalletError> {
    match kind {
        ProviderKind::Sandbox => Ok(Arc::new(SandboxProvider::new())),
        ProviderKind::MtnMomo => {
            let config = mtn.ok_or_else(|| WalletError::InvalidConfig {
                message: "mtn-momo provider selected but no MoMo configuration given".to_string(),
            })?;
            Ok(Arc::new(MtnMomoProvider::new(config)?))
        }
    }
}
