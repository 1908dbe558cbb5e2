//! I/O module
//!
//! Handles CSV parsing of replay intents and report output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, report serialization)
//! - `async_reader` - Asynchronous CSV reader with batch reading interface

pub mod async_reader;
pub mod csv_format;

pub use async_reader::AsyncReader;
pub use csv_format::{
    convert_intent_record, write_balances_csv, write_transactions_csv, BalanceRow, Intent,
    IntentRecord,
};
