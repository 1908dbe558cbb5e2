//! Intent replay
//!
//! Drives the ledger core from a CSV file of intents, the way a wallet API
//! would drive it from requests, and reports the resulting state.
//!
//! # Pipeline
//!
//! ```text
//! ReplayRunner
//!     ├── AsyncReader (batched CSV reading)
//!     ├── TransactionOrchestrator
//!     │   ├── InMemoryLedgerStore
//!     │   ├── InMemoryTransactionStore
//!     │   ├── InMemoryUserDirectory
//!     │   └── PaymentProvider (sandbox or MTN MoMo)
//!     └── ReconciliationLoop (one pass per `tick`, drained at the end)
//! ```
//!
//! Intents run in file order, one at a time, so cross-user transfers replay
//! deterministically. Concurrency lives in the reconciliation passes, which
//! talk to the provider for many transactions at once.

use clap::ValueEnum;
use futures::io::AsyncRead;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::core::{
    InMemoryLedgerStore, InMemoryTransactionStore, InMemoryUserDirectory, LedgerStore,
    ReconciliationLoop, ReconciliationReport, TransactionOrchestrator, UserDirectory,
};
use crate::io::{write_balances_csv, write_transactions_csv, AsyncReader, BalanceRow, Intent};
use crate::provider::{create_provider, PaymentProvider};
use crate::types::WalletError;

/// Which report to write once the replay is done
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    /// One row per account: `owner,kind,currency,balance`
    Balances,
    /// One row per transaction: `key,kind,user,counterparty,amount,currency,status,reason`
    Transactions,
}

/// What a replay did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Intents executed
    pub intents: usize,
    /// Intents refused by the orchestrator
    pub refused: usize,
    /// CSV rows skipped as invalid
    pub skipped_rows: u64,
    /// Reconciliation totals over all ticks and the final drain
    pub reconciliation: ReconciliationReport,
}

/// Replays an intent file against a freshly wired ledger core
#[derive(Debug, Clone)]
pub struct ReplayRunner {
    config: AppConfig,
    report: ReportKind,
}

impl ReplayRunner {
    /// Create a runner
    pub fn new(config: AppConfig, report: ReportKind) -> Self {
        Self { config, report }
    }

    /// Replay `input_path` and write the report to `output`
    ///
    /// Builds its own multi-threaded tokio runtime and the provider selected
    /// by the configuration.
    ///
    /// # Errors
    ///
    /// Fatal errors only: unreadable input, unusable configuration, failed
    /// report output. Refused intents are logged and counted.
    pub fn process(
        &self,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<ReplaySummary, WalletError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.reconciliation.max_concurrent)
            .enable_all()
            .build()
            .map_err(|e| WalletError::InvalidConfig {
                message: format!("failed to create tokio runtime: {}", e),
            })?;

        runtime.block_on(async {
            let provider = create_provider(self.config.provider, self.config.mtn_momo.clone())?;

            let file = tokio::fs::File::open(input_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    WalletError::FileNotFound {
                        path: input_path.display().to_string(),
                    }
                } else {
                    WalletError::from(e)
                }
            })?;

            self.replay(file.compat(), output, provider).await
        })
    }

    /// Replay intents read from `input` through `provider`
    pub async fn replay<R>(
        &self,
        input: R,
        output: &mut dyn Write,
        provider: Arc<dyn PaymentProvider>,
    ) -> Result<ReplaySummary, WalletError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let orchestrator = Arc::new(TransactionOrchestrator::new(
            Arc::clone(&ledger),
            Arc::new(InMemoryTransactionStore::new()),
            users.clone(),
            provider,
            self.config.orchestrator.clone(),
        ));
        // Every tick polls every pending transaction
        let reconciler = ReconciliationLoop::new(
            Arc::clone(&orchestrator),
            self.config.reconciliation.clone().without_poll_spacing(),
        );

        let mut summary = ReplaySummary::default();
        let mut reader = AsyncReader::new(input);

        loop {
            let batch = reader.read_batch(self.config.batch_size).await;
            if batch.is_empty() {
                break;
            }

            for intent in batch {
                summary.intents += 1;
                match self
                    .apply(intent, &orchestrator, users.as_ref(), &reconciler)
                    .await
                {
                    Ok(Some(pass)) => summary.reconciliation.absorb(pass),
                    Ok(None) => {}
                    Err(err) => {
                        summary.refused += 1;
                        warn!(error = %err, "intent refused");
                    }
                }
            }
        }
        summary.skipped_rows = reader.skipped();
        summary.reconciliation.absorb(reconciler.drain().await?);

        let audit = ledger.audit().await?;
        if !audit.is_consistent() {
            error!(?audit, "ledger audit failed");
        }

        match self.report {
            ReportKind::Balances => {
                let mut rows = Vec::new();
                for account in ledger.accounts().await? {
                    rows.push(BalanceRow {
                        balance: ledger.get_balance(account.id).await?,
                        owner: account.owner,
                        kind: account.kind,
                        currency: account.currency,
                    });
                }
                write_balances_csv(&rows, output)?;
            }
            ReportKind::Transactions => {
                let transactions = orchestrator.transactions().all().await?;
                write_transactions_csv(&transactions, output)?;
            }
        }

        info!(
            intents = summary.intents,
            refused = summary.refused,
            skipped_rows = summary.skipped_rows,
            settled = summary.reconciliation.settled,
            failed = summary.reconciliation.failed,
            timed_out = summary.reconciliation.timed_out,
            "replay finished"
        );
        Ok(summary)
    }

    /// Execute one intent; `tick` returns the pass it ran
    async fn apply(
        &self,
        intent: Intent,
        orchestrator: &TransactionOrchestrator,
        users: &dyn UserDirectory,
        reconciler: &ReconciliationLoop,
    ) -> Result<Option<ReconciliationReport>, WalletError> {
        match intent {
            Intent::Register { user } => {
                users.register(user).await;
            }
            Intent::Deposit {
                user,
                amount,
                currency,
                msisdn,
                key,
            } => {
                orchestrator
                    .initiate_deposit(&user, amount, &currency, &msisdn, &key)
                    .await?;
            }
            Intent::Withdrawal {
                user,
                amount,
                currency,
                msisdn,
                key,
            } => {
                orchestrator
                    .initiate_withdrawal(&user, amount, &currency, &msisdn, &key)
                    .await?;
            }
            Intent::Transfer {
                sender,
                receiver,
                amount,
                currency,
                key,
            } => {
                orchestrator
                    .initiate_transfer(&sender, &receiver, amount, &currency, &key)
                    .await?;
            }
            Intent::Tick => return Ok(Some(reconciler.run_once().await?)),
        }
        Ok(None)
    }
}
