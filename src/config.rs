//! Runtime configuration
//!
//! Plain structs with defaults. The validating constructors never fail: an
//! out-of-range value is replaced by its default and a warning is logged, so a
//! bad flag degrades the run instead of aborting it.

use std::time::Duration;
use tracing::warn;

use crate::provider::{MtnMomoConfig, ProviderKind};

/// Settings for the transaction orchestrator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Upper bound on every provider call
    pub provider_timeout: Duration,
    /// Message shown to the payer on provider requests
    pub payer_message: String,
    /// Note shown to the payee on provider requests
    pub payee_note: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            payer_message: "Wallet deposit".to_string(),
            payee_note: "Wallet withdrawal".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Create an OrchestratorConfig with a custom provider timeout
    pub fn new(provider_timeout: Duration) -> Self {
        let default = Self::default();

        let provider_timeout = if provider_timeout.is_zero() {
            warn!(
                default_ms = default.provider_timeout.as_millis() as u64,
                "invalid provider_timeout (0), using default"
            );
            default.provider_timeout
        } else {
            provider_timeout
        };

        Self {
            provider_timeout,
            ..default
        }
    }
}

/// Settings for the reconciliation loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciliationConfig {
    /// Delay between two reconciliation passes
    pub poll_interval: Duration,
    /// Minimum time between two provider polls of the same transaction
    pub min_poll_interval: Duration,
    /// Attempts after which a pending transaction fails with `Timeout`
    pub max_attempts: u32,
    /// Age after which a pending transaction fails with `Timeout`
    pub max_age: Duration,
    /// Transactions reconciled concurrently within one pass
    pub max_concurrent: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            min_poll_interval: Duration::from_secs(5),
            max_attempts: 60,
            max_age: Duration::from_secs(60 * 60),
            max_concurrent: num_cpus::get(),
        }
    }
}

impl ReconciliationConfig {
    /// Create a ReconciliationConfig with custom values
    ///
    /// `min_poll_interval` follows `poll_interval`.
    pub fn new(poll_interval: Duration, max_attempts: u32, max_concurrent: usize) -> Self {
        let default = Self::default();

        let poll_interval = if poll_interval.is_zero() {
            warn!(
                default_ms = default.poll_interval.as_millis() as u64,
                "invalid poll_interval (0), using default"
            );
            default.poll_interval
        } else {
            poll_interval
        };

        let max_attempts = if max_attempts == 0 {
            warn!(
                default = default.max_attempts,
                "invalid max_attempts (0), using default"
            );
            default.max_attempts
        } else {
            max_attempts
        };

        let max_concurrent = if max_concurrent == 0 {
            warn!(
                default = default.max_concurrent,
                "invalid max_concurrent (0), using default"
            );
            default.max_concurrent
        } else {
            max_concurrent
        };

        Self {
            poll_interval,
            min_poll_interval: poll_interval,
            max_attempts,
            max_age: default.max_age,
            max_concurrent,
        }
    }

    /// Replace the age limit of the poll horizon; zero falls back to the default
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = if max_age.is_zero() {
            let default = Self::default().max_age;
            warn!(
                default_secs = default.as_secs(),
                "invalid max_age (0), using default"
            );
            default
        } else {
            max_age
        };
        self
    }

    /// Poll every due transaction on every pass, regardless of how recently it
    /// was polled
    pub fn without_poll_spacing(mut self) -> Self {
        self.min_poll_interval = Duration::ZERO;
        self
    }
}

/// Everything the replay runner needs to assemble the core
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Intents read per CSV batch
    pub batch_size: usize,
    /// Which payment provider to wire in
    pub provider: ProviderKind,
    /// MoMo settings, required when `provider` is `MtnMomo`
    pub mtn_momo: Option<MtnMomoConfig>,
    /// Orchestrator settings
    pub orchestrator: OrchestratorConfig,
    /// Reconciliation settings
    pub reconciliation: ReconciliationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            provider: ProviderKind::Sandbox,
            mtn_momo: None,
            orchestrator: OrchestratorConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Replace a zero batch size by the default
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 {
            let default = Self::default().batch_size;
            warn!(default, "invalid batch_size (0), using default");
            default
        } else {
            batch_size
        };
        self
    }
}
