//! Currency codes and amount validation
//!
//! Amounts are plain `rust_decimal::Decimal` values; what makes an amount valid
//! depends on the currency it is expressed in (how many minor units it has).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::WalletError;

/// Currencies quoted without minor units on the mobile-money rails we talk to
const ZERO_DECIMAL_CURRENCIES: [&str; 5] = ["GNF", "RWF", "UGX", "XAF", "XOF"];

/// Largest amount a single intent may move, in major units of any currency
///
/// Keeps running balances and sums many orders of magnitude below the
/// `Decimal` range.
pub const MAX_AMOUNT_UNITS: i64 = 1_000_000_000_000_000;

/// ISO-4217 alphabetic currency code
///
/// Always stored upper-case. Construct with [`Currency::new`] or `str::parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validate and normalize a currency code
    ///
    /// Accepts any three ASCII letters (case-insensitive, surrounding whitespace
    /// ignored) and rejects everything else with `InvalidCurrency`.
    pub fn new(code: &str) -> Result<Self, WalletError> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(WalletError::InvalidCurrency {
                code: code.to_string(),
            });
        }
        Ok(Currency(trimmed.to_ascii_uppercase()))
    }

    /// The currency code, e.g. `"EUR"`
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal places an amount in this currency may carry
    pub fn minor_units(&self) -> u32 {
        if ZERO_DECIMAL_CURRENCIES.contains(&self.0.as_str()) {
            0
        } else {
            2
        }
    }

    /// Check that `amount` is strictly positive, at most [`MAX_AMOUNT_UNITS`] and
    /// fits the currency's precision
    ///
    /// Trailing zeros are ignored, so `100.000` is a valid EUR amount while
    /// `100.001` is not.
    ///
    /// # Returns
    ///
    /// * `Ok(Decimal)` - the amount rescaled to the currency's minor units
    /// * `Err(WalletError::InvalidAmount)` - non-positive, too large or too precise
    pub fn validate_amount(&self, amount: Decimal) -> Result<Decimal, WalletError> {
        if amount <= Decimal::ZERO {
            return Err(WalletError::invalid_amount(
                amount,
                self.code(),
                "amount must be positive",
            ));
        }
        if amount > Decimal::from(MAX_AMOUNT_UNITS) {
            return Err(WalletError::invalid_amount(
                amount,
                self.code(),
                &format!("amount must not exceed {}", MAX_AMOUNT_UNITS),
            ));
        }

        let precision = self.minor_units();
        if amount.normalize().scale() > precision {
            return Err(WalletError::invalid_amount(
                amount,
                self.code(),
                &format!("at most {} decimal places allowed", precision),
            ));
        }

        let mut rescaled = amount;
        rescaled.rescale(precision);
        Ok(rescaled)
    }

    /// Render an amount with exactly the currency's minor units
    pub fn format_amount(&self, amount: Decimal) -> String {
        let precision = self.minor_units() as usize;
        format!("{:.*}", precision, amount)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = WalletError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case("EUR", "EUR")]
    #[case("eur", "EUR")]
    #[case(" ugx ", "UGX")]
    fn test_currency_normalization(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(Currency::new(input).unwrap().code(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("EU")]
    #[case("EURO")]
    #[case("E1R")]
    fn test_currency_rejects_bad_codes(#[case] input: &str) {
        assert!(matches!(
            Currency::new(input),
            Err(WalletError::InvalidCurrency { .. })
        ));
    }

    #[rstest]
    #[case("EUR", 2)]
    #[case("GHS", 2)]
    #[case("XAF", 0)]
    #[case("UGX", 0)]
    fn test_minor_units(#[case] code: &str, #[case] expected: u32) {
        assert_eq!(Currency::new(code).unwrap().minor_units(), expected);
    }

    #[rstest]
    #[case::whole("EUR", dec!(100), dec!(100.00))]
    #[case::cents("EUR", dec!(0.01), dec!(0.01))]
    #[case::trailing_zeros("EUR", dec!(12.5000), dec!(12.50))]
    #[case::zero_decimal("XAF", dec!(5000), dec!(5000))]
    #[case::at_limit("XAF", Decimal::from(MAX_AMOUNT_UNITS), Decimal::from(MAX_AMOUNT_UNITS))]
    fn test_validate_amount_accepts(
        #[case] code: &str,
        #[case] amount: Decimal,
        #[case] expected: Decimal,
    ) {
        let validated = Currency::new(code).unwrap().validate_amount(amount).unwrap();
        assert_eq!(validated, expected);
    }

    #[rstest]
    #[case::zero("EUR", dec!(0))]
    #[case::negative("EUR", dec!(-1.00))]
    #[case::sub_cent("EUR", dec!(0.001))]
    #[case::fraction_of_zero_decimal("UGX", dec!(10.5))]
    #[case::above_limit("EUR", Decimal::from(MAX_AMOUNT_UNITS) + dec!(0.01))]
    #[case::near_decimal_max("XAF", dec!(50000000000000000000000000000))]
    fn test_validate_amount_rejects(#[case] code: &str, #[case] amount: Decimal) {
        let result = Currency::new(code).unwrap().validate_amount(amount);
        assert!(matches!(result, Err(WalletError::InvalidAmount { .. })));
    }

    #[test]
    fn test_format_amount_uses_minor_units() {
        let eur = Currency::new("EUR").unwrap();
        let xaf = Currency::new("XAF").unwrap();
        assert_eq!(eur.format_amount(dec!(50)), "50.00");
        assert_eq!(eur.format_amount(dec!(-100.5)), "-100.50");
        assert_eq!(xaf.format_amount(dec!(2500)), "2500");
    }
}
