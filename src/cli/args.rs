use crate::config::{AppConfig, OrchestratorConfig, ReconciliationConfig};
use crate::provider::{MtnMomoConfig, ProductCredentials, ProviderKind};
use crate::replay::ReportKind;
use crate::telemetry::LogFormat;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Replay wallet intents through the mobile-money ledger core
#[derive(Parser, Debug)]
#[command(name = "momo-ledger")]
#[command(
    about = "Replay wallet intents through the mobile-money ledger core",
    long_about = None
)]
pub struct CliArgs {
    /// Input CSV file path containing intent records
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub input_file: PathBuf,

    /// Report written to stdout
    #[arg(
        long = "report",
        value_name = "REPORT",
        default_value = "balances",
        help = "Report to write: 'balances' or 'transactions'"
    )]
    pub report: ReportKind,

    /// Payment provider
    #[arg(
        long = "provider",
        value_name = "PROVIDER",
        env = "MOMO_PROVIDER",
        default_value = "sandbox",
        help = "Payment provider: 'sandbox' or 'mtn-momo'"
    )]
    pub provider: ProviderKind,

    /// Number of intents per batch
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of intents read per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of transactions reconciled concurrently
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Transactions reconciled concurrently per pass (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,

    /// Delay between reconciliation passes
    #[arg(
        long = "poll-interval-ms",
        value_name = "MS",
        env = "MOMO_POLL_INTERVAL_MS",
        help = "Milliseconds between reconciliation passes (default: 5000)"
    )]
    pub poll_interval_ms: Option<u64>,

    /// Poll horizon in attempts
    #[arg(
        long = "max-attempts",
        value_name = "COUNT",
        env = "MOMO_MAX_ATTEMPTS",
        help = "Polls before a pending transaction times out (default: 60)"
    )]
    pub max_attempts: Option<u32>,

    /// Poll horizon in age
    #[arg(
        long = "max-age-secs",
        value_name = "SECS",
        env = "MOMO_MAX_AGE_SECS",
        help = "Seconds before a pending transaction times out (default: 3600)"
    )]
    pub max_age_secs: Option<u64>,

    /// Bound on each provider call
    #[arg(
        long = "provider-timeout-ms",
        value_name = "MS",
        env = "MOMO_PROVIDER_TIMEOUT_MS",
        help = "Milliseconds before a provider call counts as unavailable (default: 30000)"
    )]
    pub provider_timeout_ms: Option<u64>,

    /// Log output format
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        env = "MOMO_LOG_FORMAT",
        default_value = "pretty",
        help = "Log format on stderr: 'pretty' or 'json'"
    )]
    pub log_format: LogFormat,

    /// MoMo API root
    #[arg(long = "momo-base-url", value_name = "URL", env = "MOMO_BASE_URL")]
    pub momo_base_url: Option<String>,

    /// MoMo target environment
    #[arg(
        long = "momo-target-environment",
        value_name = "ENV",
        env = "MOMO_TARGET_ENVIRONMENT"
    )]
    pub momo_target_environment: Option<String>,

    /// Callback URL sent with MoMo requests
    #[arg(long = "momo-callback-url", value_name = "URL", env = "MOMO_CALLBACK_URL")]
    pub momo_callback_url: Option<String>,

    /// Collection API user
    #[arg(long, env = "MOMO_COLLECTION_API_USER", hide_env_values = true)]
    pub collection_api_user: Option<String>,

    /// Collection API key
    #[arg(long, env = "MOMO_COLLECTION_API_KEY", hide_env_values = true)]
    pub collection_api_key: Option<String>,

    /// Collection subscription key
    #[arg(long, env = "MOMO_COLLECTION_SUBSCRIPTION_KEY", hide_env_values = true)]
    pub collection_subscription_key: Option<String>,

    /// Disbursement API user
    #[arg(long, env = "MOMO_DISBURSEMENT_API_USER", hide_env_values = true)]
    pub disbursement_api_user: Option<String>,

    /// Disbursement API key
    #[arg(long, env = "MOMO_DISBURSEMENT_API_KEY", hide_env_values = true)]
    pub disbursement_api_key: Option<String>,

    /// Disbursement subscription key
    #[arg(long, env = "MOMO_DISBURSEMENT_SUBSCRIPTION_KEY", hide_env_values = true)]
    pub disbursement_subscription_key: Option<String>,
}

impl CliArgs {
    /// Create an AppConfig from CLI arguments
    ///
    /// Values not given on the command line or in the environment keep their
    /// defaults; invalid values fall back to the defaults with a warning.
    pub fn to_app_config(&self) -> AppConfig {
        let default = AppConfig::default();

        let reconciliation = if self.poll_interval_ms.is_some()
            || self.max_attempts.is_some()
            || self.max_concurrent.is_some()
        {
            ReconciliationConfig::new(
                self.poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default.reconciliation.poll_interval),
                self.max_attempts
                    .unwrap_or(default.reconciliation.max_attempts),
                self.max_concurrent
                    .unwrap_or(default.reconciliation.max_concurrent),
            )
        } else {
            default.reconciliation.clone()
        };
        let reconciliation = match self.max_age_secs {
            Some(secs) => reconciliation.with_max_age(Duration::from_secs(secs)),
            None => reconciliation,
        };

        let orchestrator = match self.provider_timeout_ms {
            Some(ms) => OrchestratorConfig::new(Duration::from_millis(ms)),
            None => OrchestratorConfig::default(),
        };

        AppConfig {
            provider: self.provider,
            mtn_momo: self.mtn_momo_config(),
            orchestrator,
            reconciliation,
            ..default
        }
        .with_batch_size(self.batch_size.unwrap_or(default.batch_size))
    }

    /// MoMo settings, present only when the MoMo provider is selected
    fn mtn_momo_config(&self) -> Option<MtnMomoConfig> {
        if self.provider != ProviderKind::MtnMomo {
            return None;
        }

        let default = MtnMomoConfig::default();
        let credentials = |user: &Option<String>, key: &Option<String>, sub: &Option<String>| {
            ProductCredentials {
                api_user: user.clone().unwrap_or_default(),
                api_key: key.clone().unwrap_or_default(),
                subscription_key: sub.clone().unwrap_or_default(),
            }
        };

        Some(MtnMomoConfig {
            base_url: self.momo_base_url.clone().unwrap_or(default.base_url),
            target_environment: self
                .momo_target_environment
                .clone()
                .unwrap_or(default.target_environment),
            callback_url: self.momo_callback_url.clone(),
            collection: credentials(
                &self.collection_api_user,
                &self.collection_api_key,
                &self.collection_subscription_key,
            ),
            disbursement: credentials(
                &self.disbursement_api_user,
                &self.disbursement_api_key,
                &self.disbursement_subscription_key,
            ),
            ..default
        })
    }
}
