//! End-to-end replay tests
//!
//! Each fixture directory under tests/fixtures/ holds an intent file and the
//! report the replay must produce for it:
//! 1. input.csv is replayed through a freshly wired core and the sandbox provider
//! 2. the report is written to a temporary file
//! 3. the output is compared byte for byte with expected.csv
//!
//! Fixtures cover:
//! - Deposits, transfers and withdrawals settling through reconciliation
//! - Provider failures and the poll horizon (sandbox test numbers)
//! - Idempotent replays of the same key
//! - Overdraft protection with reserved withdrawals
//! - Zero-decimal currencies and precision rules
//! - Malformed and refused rows
//!
//! Each fixture is replayed with a one-intent batch and with the default batch.

#[cfg(test)]
mod tests {
    use momo_ledger::{AppConfig, ReplayRunner, ReportKind};
    use rstest::rstest;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use tempfile::NamedTempFile;

    /// Replay tests/fixtures/{fixture_name}/input.csv and compare with expected.csv
    ///
    /// # Panics
    ///
    /// Panics if the fixture files cannot be read, the replay fails, or the
    /// report differs from the expected one.
    fn run_test_fixture(fixture_name: &str, report: ReportKind, batch_size: usize) {
        let fixture_dir = format!("tests/fixtures/{}", fixture_name);
        let input_path = format!("{}/input.csv", fixture_dir);
        let expected_path = format!("{}/expected.csv", fixture_dir);

        assert!(
            Path::new(&input_path).exists(),
            "Input file not found: {}",
            input_path
        );
        assert!(
            Path::new(&expected_path).exists(),
            "Expected file not found: {}",
            expected_path
        );

        let runner = ReplayRunner::new(AppConfig::default().with_batch_size(batch_size), report);

        let mut temp_output = NamedTempFile::new().expect("Failed to create temp file");

        runner
            .process(Path::new(&input_path), &mut temp_output)
            .unwrap_or_else(|e| panic!("Failed to replay intents: {}", e));

        temp_output.flush().expect("Failed to flush temp file");

        let actual_output = fs::read_to_string(temp_output.path())
            .unwrap_or_else(|e| panic!("Failed to read temp output file: {}", e));

        let expected_output = fs::read_to_string(&expected_path)
            .unwrap_or_else(|e| panic!("Failed to read expected file {}: {}", expected_path, e));

        assert_eq!(
            actual_output, expected_output,
            "\n\nOutput mismatch for fixture: {} (batch size: {})\n\nActual output:\n{}\n\nExpected output:\n{}\n",
            fixture_name, batch_size, actual_output, expected_output
        );
    }

    #[rstest]
    #[case("happy_path", ReportKind::Balances)]
    #[case("provider_failures", ReportKind::Transactions)]
    #[case("idempotent_replays", ReportKind::Transactions)]
    #[case("overdraft_protection", ReportKind::Balances)]
    #[case("multi_currency_precision", ReportKind::Balances)]
    #[case("malformed_rows", ReportKind::Balances)]
    fn test_fixtures(
        #[case] fixture: &str,
        #[case] report: ReportKind,
        #[values(1, 1000)] batch_size: usize,
    ) {
        run_test_fixture(fixture, report, batch_size);
    }
}
