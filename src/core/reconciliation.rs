//! Background reconciliation of provider-backed transactions
//!
//! Deposits and withdrawals are only settled once the provider confirms them.
//! The reconciliation loop is the server-side task that gets them there: on
//! every tick it walks the `PENDING` provider-backed transactions and, with
//! bounded concurrency, for each one
//!
//! 1. fails it with `Timeout` once it has used up its attempts or its age limit;
//! 2. skips it if it was touched less than `min_poll_interval` ago;
//! 3. resubmits it (same reference) if the provider never acknowledged it;
//! 4. otherwise polls the provider and settles or fails on a terminal status.
//!
//! Every resubmission and every non-terminal poll counts as one attempt.
//! The loop only talks to the orchestrator, so it races safely with provider
//! notifications and with itself.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::orchestrator::{SubmitOutcome, TransactionOrchestrator};
use crate::config::ReconciliationConfig;
use crate::provider::ProviderStatus;
use crate::types::{FailureReason, Transaction, WalletError};

/// Tally of one or more reconciliation passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Pending provider-backed transactions looked at
    pub examined: usize,
    /// Settled after a `SUCCESS` status
    pub settled: usize,
    /// Failed after a terminal provider status or a rejected resubmission
    pub failed: usize,
    /// Failed because the poll horizon elapsed
    pub timed_out: usize,
    /// Handed to the provider again after an earlier outage
    pub resubmitted: usize,
    /// Polled or retried, still pending
    pub still_pending: usize,
    /// Not due yet
    pub skipped: usize,
    /// Store or invariant errors
    pub errors: usize,
}

impl ReconciliationReport {
    /// Add the counts of `other` to this report
    pub fn absorb(&mut self, other: ReconciliationReport) {
        self.examined += other.examined;
        self.settled += other.settled;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.resubmitted += other.resubmitted;
        self.still_pending += other.still_pending;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }

    /// Transactions that are still `PENDING` after the pass
    pub fn outstanding(&self) -> usize {
        self.resubmitted + self.still_pending + self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Settled,
    Failed,
    TimedOut,
    Resubmitted,
    StillPending,
    Skipped,
}

/// Periodic reconciliation task
#[derive(Clone)]
pub struct ReconciliationLoop {
    orchestrator: Arc<TransactionOrchestrator>,
    config: ReconciliationConfig,
}

impl ReconciliationLoop {
    /// Create a loop driving `orchestrator`
    pub fn new(orchestrator: Arc<TransactionOrchestrator>, config: ReconciliationConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Loop settings
    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Run one pass over all pending provider-backed transactions
    ///
    /// # Errors
    ///
    /// Only a failure to list pending transactions aborts the pass. Errors on
    /// individual transactions are logged and counted in the report.
    pub async fn run_once(&self) -> Result<ReconciliationReport, WalletError> {
        let now = Utc::now();
        let candidates: Vec<Transaction> = self
            .orchestrator
            .transactions()
            .pending()
            .await?
            .into_iter()
            .filter(|tx| tx.kind.is_provider_backed())
            .collect();

        let mut report = ReconciliationReport {
            examined: candidates.len(),
            ..Default::default()
        };

        let steps: Vec<Result<Step, WalletError>> = stream::iter(candidates)
            .map(|tx| self.reconcile(tx, now))
            .buffer_unordered(self.config.max_concurrent)
            .collect()
            .await;

        for step in steps {
            match step {
                Ok(Step::Settled) => report.settled += 1,
                Ok(Step::Failed) => report.failed += 1,
                Ok(Step::TimedOut) => report.timed_out += 1,
                Ok(Step::Resubmitted) => report.resubmitted += 1,
                Ok(Step::StillPending) => report.still_pending += 1,
                Ok(Step::Skipped) => report.skipped += 1,
                Err(_) => report.errors += 1,
            }
        }

        if report.examined > 0 {
            debug!(?report, "reconciliation pass finished");
        }
        Ok(report)
    }

    /// Run passes until no provider-backed transaction is left `PENDING`
    ///
    /// Terminates because every pass either terminalizes a transaction or
    /// consumes one of its attempts. Waits `min_poll_interval` between passes
    /// that skipped transactions as not yet due.
    pub async fn drain(&self) -> Result<ReconciliationReport, WalletError> {
        let mut total = ReconciliationReport::default();
        loop {
            let pass = self.run_once().await?;
            total.absorb(pass);
            if pass.outstanding() == 0 {
                return Ok(total);
            }
            if pass.skipped > 0 {
                tokio::time::sleep(self.config.min_poll_interval).await;
            }
        }
    }

    /// Run a pass every `poll_interval` until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent,
            "reconciliation loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        error!(error = %err, "reconciliation pass aborted");
                    }
                }
            }
        }

        info!("reconciliation loop stopped");
    }

    /// Start [`Self::run`] as its own tokio task
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn reconcile(&self, tx: Transaction, now: DateTime<Utc>) -> Result<Step, WalletError> {
        let result = self.step(&tx, now).await;
        if let Err(err) = &result {
            if err.is_invariant_violation() {
                error!(transaction_id = %tx.id, error = %err, "ledger invariant violated");
            } else {
                warn!(transaction_id = %tx.id, error = %err, "reconciliation step failed");
            }
        }
        result
    }

    async fn step(&self, tx: &Transaction, now: DateTime<Utc>) -> Result<Step, WalletError> {
        let age = elapsed(tx.created_at, now);
        if tx.metadata.poll_attempts >= self.config.max_attempts || age >= self.config.max_age {
            info!(
                transaction_id = %tx.id,
                attempts = tx.metadata.poll_attempts,
                age_secs = age.as_secs(),
                "poll horizon elapsed"
            );
            return self
                .terminal(self.orchestrator.fail(tx.id, FailureReason::Timeout).await, Step::TimedOut);
        }

        if elapsed(tx.last_activity(), now) < self.config.min_poll_interval {
            return Ok(Step::Skipped);
        }

        let transactions = self.orchestrator.transactions();

        if !tx.metadata.submitted {
            return match self.orchestrator.submit(tx).await? {
                SubmitOutcome::Accepted => {
                    transactions.record_poll(tx.id, now).await?;
                    Ok(Step::Resubmitted)
                }
                SubmitOutcome::Rejected(_) => Ok(Step::Failed),
                SubmitOutcome::Unavailable(_) => {
                    transactions.record_poll(tx.id, now).await?;
                    Ok(Step::StillPending)
                }
            };
        }

        match self.orchestrator.query_provider(tx).await {
            Ok(ProviderStatus::Success) => {
                self.terminal(self.orchestrator.settle(tx.id).await, Step::Settled)
            }
            Ok(ProviderStatus::Failed) => {
                let reason = FailureReason::ProviderFailed(ProviderStatus::Failed.to_string());
                self.terminal(self.orchestrator.fail(tx.id, reason).await, Step::Failed)
            }
            Ok(ProviderStatus::Pending) => {
                transactions.record_poll(tx.id, now).await?;
                Ok(Step::StillPending)
            }
            Err(err) => {
                debug!(transaction_id = %tx.id, error = %err, "status query failed");
                transactions.record_poll(tx.id, now).await?;
                Ok(Step::StillPending)
            }
        }
    }

    /// A terminal transition lost to a concurrent one is not an error
    fn terminal(
        &self,
        result: Result<Transaction, WalletError>,
        step: Step,
    ) -> Result<Step, WalletError> {
        match result {
            Ok(_) => Ok(step),
            Err(WalletError::InvalidStateTransition { .. }) => Ok(Step::Skipped),
            Err(err) => Err(err),
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
