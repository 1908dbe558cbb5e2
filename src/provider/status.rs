//! Normalized provider status
//!
//! The only wire contract the ledger core owns with a payment rail is this
//! three-value status. Every provider maps its own vocabulary onto it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a provider-side request, as the ledger core understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderStatus {
    /// Still being processed (or unknown wording)
    Pending,
    /// Funds moved on the provider side
    Success,
    /// The provider gave up on the request
    Failed,
}

impl ProviderStatus {
    /// Map a raw provider status string onto the normalized status
    ///
    /// `FAILED`, `REJECTED` and `TIMEOUT` become `Failed`, `SUCCESSFUL` becomes
    /// `Success`, and anything else (including `PENDING`, `ONGOING` or an
    /// unknown word) stays `Pending` so that reconciliation never guesses a
    /// terminal outcome. Matching is case-insensitive.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESSFUL" => ProviderStatus::Success,
            "FAILED" | "REJECTED" | "TIMEOUT" => ProviderStatus::Failed,
            _ => ProviderStatus::Pending,
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderStatus::Pending => f.write_str("PENDING"),
            ProviderStatus::Success => f.write_str("SUCCESS"),
            ProviderStatus::Failed => f.write_str("FAILED"),
        }
    }
}
