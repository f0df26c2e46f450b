//! Monetary amounts and rounding.
//!
//! Amounts are `rust_decimal::Decimal` values in major units. Every stored
//! amount is rounded to [`AMOUNT_SCALE`] decimals using round-half-up so that
//! the same inputs always produce the same ledger rows.

use core::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places kept for stored amounts.
pub const AMOUNT_SCALE: u32 = 2;

/// Round an amount to [`AMOUNT_SCALE`] decimals, halves away from zero.
///
/// `Decimal::round_dp` uses banker's rounding; ledger amounts must not.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a transaction-currency amount to the company base currency.
pub fn to_base(native: Decimal, exchange_rate: Decimal) -> Decimal {
    round_amount(native * exchange_rate)
}

/// ISO-4217 style check: three ASCII uppercase letters.
pub fn is_valid_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Which set of amounts a balance check looked at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyLevel {
    /// Transaction currency.
    Native,
    /// Company base currency (`native * exchange_rate`).
    Base,
}

impl fmt::Display for CurrencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrencyLevel::Native => f.write_str("native"),
            CurrencyLevel::Base => f.write_str("base"),
        }
    }
}
