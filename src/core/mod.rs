//! Core business logic module
//!
//! This module contains the wallet ledger components:
//! - `traits` - Store abstractions injected into the orchestrator
//! - `ledger_store` - Append-only double-entry posting storage
//! - `transaction_store` - Transaction rows with idempotent insertion
//! - `account_registry` - Lazy user/escrow account creation and the user directory
//! - `orchestrator` - The `PENDING → SUCCESS | FAILED` state machine
//! - `reconciliation` - Background polling of provider-backed transactions
//! - `locks` - Per-key async locks

pub mod account_registry;
pub mod ledger_store;
pub mod locks;
pub mod orchestrator;
pub mod reconciliation;
pub mod traits;
pub mod transaction_store;

pub use account_registry::{AccountRegistry, InMemoryUserDirectory};
pub use ledger_store::{InMemoryLedgerStore, LedgerAudit};
pub use locks::{KeyGuard, KeyedLocks};
pub use orchestrator::{SubmitOutcome, TransactionOrchestrator};
pub use reconciliation::{ReconciliationLoop, ReconciliationReport};
pub use traits::{Insertion, LedgerStore, TransactionRepository, UserDirectory};
pub use transaction_store::InMemoryTransactionStore;
