//! Mobile-money wallet ledger core
//!
//! # Overview
//!
//! This library keeps user wallet balances in a double-entry ledger and moves
//! money between the ledger and an external mobile-money rail (MTN MoMo). Every
//! money movement is a transaction driven through an idempotent
//! `PENDING → SUCCESS | FAILED` state machine; balances are always derived from
//! committed postings, never stored.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (accounts, postings, transactions, money, errors)
//! - [`core`] - Business logic components:
//!   - [`core::ledger_store`] - Append-only posting storage and balance derivation
//!   - [`core::account_registry`] - Lazy user/escrow account creation
//!   - [`core::transaction_store`] - Transaction rows with idempotent insertion
//!   - [`core::orchestrator`] - The transaction state machine
//!   - [`core::reconciliation`] - Background polling of pending provider requests
//! - [`provider`] - Payment provider gateway (MTN MoMo client, sandbox)
//! - [`config`] - Runtime configuration
//! - [`io`] - CSV intent reading and report writing
//! - [`replay`] - Replays an intent file through a freshly wired core
//! - [`cli`] - CLI arguments parsing
//! - [`telemetry`] - Tracing subscriber setup
//!
//! # Transaction Kinds
//!
//! - **Deposit**: money enters from the payer's mobile wallet; escrow is debited
//!   and the user credited once the provider confirms
//! - **Withdrawal**: money leaves to the payee's mobile wallet; the amount is
//!   reserved at creation and the user debited once the provider confirms
//! - **Transfer**: internal movement between two users, settled synchronously

pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod provider;
pub mod replay;
pub mod telemetry;
pub mod types;

pub use config::{AppConfig, OrchestratorConfig, ReconciliationConfig};
pub use core::{
    InMemoryLedgerStore, InMemoryTransactionStore, InMemoryUserDirectory, ReconciliationLoop,
    TransactionOrchestrator,
};
pub use replay::{ReplayRunner, ReplaySummary, ReportKind};
pub use types::{
    Account, AccountId, AccountKind, Currency, FailureReason, Posting, Transaction,
    TransactionId, TransactionKind, TransactionStatus, WalletError,
};
