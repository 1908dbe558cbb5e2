//! CSV format handling for replay intents and reports
//!
//! This module centralizes all CSV format concerns, providing:
//! - `IntentRecord` structure for deserialization
//! - Conversion from intent records to domain [`Intent`]s
//! - Balance and transaction report serialization
//!
//! All functions are pure (no I/O beyond the given writer) for easy testing.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

use crate::types::{AccountKind, Currency, Transaction, UserId, WalletError};

/// CSV record structure for deserialization
///
/// Matches the input columns `type,user,counterparty,amount,currency,msisdn,key`.
/// Every column except `type` is optional because `register` and `tick` rows
/// leave most of them empty.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct IntentRecord {
    #[serde(rename = "type")]
    pub intent_type: String,
    pub user: Option<String>,
    pub counterparty: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub msisdn: Option<String>,
    pub key: Option<String>,
}

/// One replayable instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Make a user known to the user directory
    Register { user: UserId },

    /// Initiate a deposit
    Deposit {
        user: UserId,
        amount: Decimal,
        currency: Currency,
        msisdn: String,
        key: String,
    },

    /// Initiate a withdrawal
    Withdrawal {
        user: UserId,
        amount: Decimal,
        currency: Currency,
        msisdn: String,
        key: String,
    },

    /// Move money between two users
    Transfer {
        sender: UserId,
        receiver: UserId,
        amount: Decimal,
        currency: Currency,
        key: String,
    },

    /// Run one reconciliation pass
    Tick,
}

/// One line of the balances report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    /// Owning user, `None` for escrow
    pub owner: Option<UserId>,
    /// Account kind
    pub kind: AccountKind,
    /// Account currency
    pub currency: Currency,
    /// Ledger balance
    pub balance: Decimal,
}

fn parse_error(message: String) -> WalletError {
    WalletError::ParseError {
        line: None,
        message,
    }
}

fn field(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str, intent: &str) -> Result<&'a str, WalletError> {
    field(value).ok_or_else(|| parse_error(format!("{} intent requires '{}'", intent, name)))
}

/// Convert an IntentRecord to an Intent
///
/// This function:
/// - Parses the intent type (case-insensitive)
/// - Checks that every column the type needs is present
/// - Parses the amount into a Decimal and the currency into a [`Currency`]
///
/// Amount precision, MSISDN format and user existence are left to the
/// orchestrator, which validates them the same way for every caller.
///
/// # Returns
///
/// * `Ok(Intent)` - Successfully converted record
/// * `Err(WalletError::ParseError)` - Missing column or unparsable value
pub fn convert_intent_record(record: IntentRecord) -> Result<Intent, WalletError> {
    let intent_type = record.intent_type.trim().to_lowercase();

    let money = |name: &str| -> Result<(Decimal, Currency), WalletError> {
        let raw = required(&record.amount, "amount", name)?;
        let amount = Decimal::from_str(raw)
            .map_err(|_| parse_error(format!("Invalid amount '{}' in {} intent", raw, name)))?;
        let currency = Currency::new(required(&record.currency, "currency", name)?)?;
        Ok((amount, currency))
    };

    match intent_type.as_str() {
        "register" => Ok(Intent::Register {
            user: required(&record.user, "user", "register")?.to_string(),
        }),
        "deposit" | "withdrawal" => {
            let user = required(&record.user, "user", &intent_type)?.to_string();
            let (amount, currency) = money(&intent_type)?;
            let msisdn = required(&record.msisdn, "msisdn", &intent_type)?.to_string();
            let key = required(&record.key, "key", &intent_type)?.to_string();

            if intent_type == "deposit" {
                Ok(Intent::Deposit {
                    user,
                    amount,
                    currency,
                    msisdn,
                    key,
                })
            } else {
                Ok(Intent::Withdrawal {
                    user,
                    amount,
                    currency,
                    msisdn,
                    key,
                })
            }
        }
        "transfer" => {
            let sender = required(&record.user, "user", "transfer")?.to_string();
            let receiver = required(&record.counterparty, "counterparty", "transfer")?.to_string();
            let (amount, currency) = money("transfer")?;
            let key = required(&record.key, "key", "transfer")?.to_string();
            Ok(Intent::Transfer {
                sender,
                receiver,
                amount,
                currency,
                key,
            })
        }
        "tick" => Ok(Intent::Tick),
        _ => Err(parse_error(format!(
            "Invalid intent type: '{}'",
            record.intent_type
        ))),
    }
}

/// Write account balances to CSV format
///
/// Writes rows with columns: owner, kind, currency, balance. Rows are sorted by
/// kind (users first), owner and currency for deterministic output, and amounts
/// carry exactly the currency's minor units.
pub fn write_balances_csv(rows: &[BalanceRow], output: &mut dyn Write) -> Result<(), WalletError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["owner", "kind", "currency", "balance"])?;

    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| {
        (a.kind, &a.owner, a.currency.code()).cmp(&(b.kind, &b.owner, b.currency.code()))
    });

    for row in sorted {
        writer.write_record(&[
            row.owner.clone().unwrap_or_default(),
            row.kind.to_string(),
            row.currency.to_string(),
            row.currency.format_amount(row.balance),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write transactions to CSV format
///
/// Writes rows with columns: key, kind, user, counterparty, amount, currency,
/// status, reason. Rows are sorted by idempotency key, then kind.
pub fn write_transactions_csv(
    transactions: &[Transaction],
    output: &mut dyn Write,
) -> Result<(), WalletError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record([
        "key",
        "kind",
        "user",
        "counterparty",
        "amount",
        "currency",
        "status",
        "reason",
    ])?;

    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by(|a, b| {
        (a.idempotency_key.as_str(), a.kind).cmp(&(b.idempotency_key.as_str(), b.kind))
    });

    for tx in sorted {
        writer.write_record(&[
            tx.idempotency_key.clone(),
            tx.kind.to_string(),
            tx.metadata.user_id.clone(),
            tx.metadata.counterparty.clone().unwrap_or_default(),
            tx.currency.format_amount(tx.amount),
            tx.currency.to_string(),
            tx.status.to_string(),
            tx.metadata
                .failure_reason
                .as_ref()
                .map(|reason| reason.to_string())
                .unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureReason, TransactionKind, TransactionMetadata, TransactionStatus};
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn record(
        intent_type: &str,
        user: &str,
        counterparty: &str,
        amount: &str,
        currency: &str,
        msisdn: &str,
        key: &str,
    ) -> IntentRecord {
        let opt = |s: &str| Some(s.to_string());
        IntentRecord {
            intent_type: intent_type.to_string(),
            user: opt(user),
            counterparty: opt(counterparty),
            amount: opt(amount),
            currency: opt(currency),
            msisdn: opt(msisdn),
            key: opt(key),
        }
    }

    #[test]
    fn test_convert_deposit() {
        let intent = convert_intent_record(record(
            "Deposit",
            "alice",
            "",
            " 100.00 ",
            "eur",
            "256772000001",
            "k1",
        ))
        .unwrap();

        assert_eq!(
            intent,
            Intent::Deposit {
                user: "alice".to_string(),
                amount: dec!(100.00),
                currency: Currency::new("EUR").unwrap(),
                msisdn: "256772000001".to_string(),
                key: "k1".to_string(),
            }
        );
    }

    #[test]
    fn test_convert_transfer_and_control_rows() {
        let transfer =
            convert_intent_record(record("transfer", "alice", "bob", "5", "UGX", "", "t1"))
                .unwrap();
        assert!(matches!(transfer, Intent::Transfer { ref receiver, .. } if receiver == "bob"));

        let register = IntentRecord {
            intent_type: "register".to_string(),
            user: Some("carol".to_string()),
            ..Default::default()
        };
        assert_eq!(
            convert_intent_record(register).unwrap(),
            Intent::Register {
                user: "carol".to_string()
            }
        );

        let tick = IntentRecord {
            intent_type: "TICK".to_string(),
            ..Default::default()
        };
        assert_eq!(convert_intent_record(tick).unwrap(), Intent::Tick);
    }

    #[rstest]
    #[case::invalid_type(record("refund", "alice", "", "1", "EUR", "", "k"), "Invalid intent type")]
    #[case::missing_amount(record("deposit", "alice", "", "", "EUR", "256772000001", "k"), "requires 'amount'")]
    #[case::bad_amount(record("withdrawal", "alice", "", "ten", "EUR", "256772000001", "k"), "Invalid amount")]
    #[case::missing_key(record("deposit", "alice", "", "1", "EUR", "256772000001", " "), "requires 'key'")]
    #[case::missing_counterparty(record("transfer", "alice", "", "1", "EUR", "", "k"), "requires 'counterparty'")]
    #[case::bad_currency(record("transfer", "alice", "bob", "1", "EURO", "", "k"), "Invalid currency")]
    fn test_convert_errors(#[case] input: IntentRecord, #[case] expected: &str) {
        let err = convert_intent_record(input).unwrap_err();
        assert!(err.to_string().contains(expected), "{}", err);
    }

    #[test]
    fn test_write_balances_csv_sorted_and_formatted() {
        let eur = Currency::new("EUR").unwrap();
        let ugx = Currency::new("UGX").unwrap();
        let rows = vec![
            BalanceRow {
                owner: None,
                kind: AccountKind::Escrow,
                currency: eur.clone(),
                balance: dec!(-150),
            },
            BalanceRow {
                owner: Some("bob".to_string()),
                kind: AccountKind::User,
                currency: eur.clone(),
                balance: dec!(50),
            },
            BalanceRow {
                owner: Some("alice".to_string()),
                kind: AccountKind::User,
                currency: ugx,
                balance: dec!(5000),
            },
            BalanceRow {
                owner: Some("alice".to_string()),
                kind: AccountKind::User,
                currency: eur,
                balance: dec!(100.5),
            },
        ];

        let mut output = Vec::new();
        write_balances_csv(&rows, &mut output).unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "owner,kind,currency,balance\n\
             alice,user,EUR,100.50\n\
             alice,user,UGX,5000\n\
             bob,user,EUR,50.00\n\
             ,escrow,EUR,-150.00\n"
        );
    }

    #[test]
    fn test_write_transactions_csv() {
        let eur = Currency::new("EUR").unwrap();
        let mut failed = Transaction::pending(
            "b-key",
            TransactionKind::Withdrawal,
            eur.clone(),
            dec!(20),
            TransactionMetadata {
                user_id: "alice".to_string(),
                ..Default::default()
            },
        );
        failed.status = TransactionStatus::Failed;
        failed.metadata.failure_reason = Some(FailureReason::InsufficientFunds);

        let mut transfer = Transaction::pending(
            "a-key",
            TransactionKind::Transfer,
            eur,
            dec!(5.5),
            TransactionMetadata {
                user_id: "alice".to_string(),
                counterparty: Some("bob".to_string()),
                ..Default::default()
            },
        );
        transfer.status = TransactionStatus::Success;

        let mut output = Vec::new();
        write_transactions_csv(&[failed, transfer], &mut output).unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "key,kind,user,counterparty,amount,currency,status,reason\n\
             a-key,transfer,alice,bob,5.50,EUR,SUCCESS,\n\
             b-key,withdrawal,alice,,20.00,EUR,FAILED,InsufficientFunds\n"
        );
    }
}
