//! Unit Conversion Helpers
//!
//! The chain reports transfer values in its smallest unit;
//! one coin is 1e9 base units.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Base units per whole coin
pub const BASE_UNITS_PER_COIN: i64 = 1_000_000_000;

const BASE_UNIT_SCALE: u32 = 9;

/// Convert a raw chain value to coins
pub fn base_units_to_coins(value: i64) -> Decimal {
    Decimal::new(value, BASE_UNIT_SCALE)
}

/// Convert a coin amount to base units, truncating sub-unit precision
pub fn coins_to_base_units(coins: Decimal) -> i64 {
    (coins * Decimal::from(BASE_UNITS_PER_COIN))
        .trunc()
        .to_i64()
        .unwrap_or(0)
}

/// Parse a user-entered amount
pub fn parse_amount(s: &str) -> Option<Decimal> {
    s.trim().parse::<Decimal>().ok()
}
