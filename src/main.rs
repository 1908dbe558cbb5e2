//! Mobile-money ledger replay CLI
//!
//! Replays a CSV file of wallet intents through the ledger core and writes a
//! report to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- intents.csv > balances.csv
//! cargo run -- --report transactions intents.csv > transactions.csv
//! cargo run -- --max-attempts 10 --max-concurrent 8 --log-format json intents.csv
//! MOMO_PROVIDER=mtn-momo MOMO_COLLECTION_API_USER=... cargo run -- intents.csv
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (missing arguments, file not found, unusable configuration, etc.)

use momo_ledger::{cli, telemetry, ReplayRunner};
use std::process;
use tracing::error;

fn main() {
    let args = cli::parse_args();
    telemetry::init(args.log_format);

    let runner = ReplayRunner::new(args.to_app_config(), args.report);

    let mut output = std::io::stdout();
    if let Err(e) = runner.process(&args.input_file, &mut output) {
        error!(error = %e, "replay failed");
        process::exit(1);
    }
}
