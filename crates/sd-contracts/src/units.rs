//! Decimal <-> smallest-unit conversion.

use alloy_primitives::U256;
use thiserror::Error;

use crate::TOKEN_DECIMALS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("amount is empty")]
    Empty,
    #[error("amount must not be negative")]
    Negative,
    #[error("`{0}` is not a decimal number")]
    Malformed(String),
    #[error("amount is too large")]
    Overflow,
}

/// Parses a plain decimal (`12`, `1.5`, `.25`) into `decimals`-scaled units.
///
/// Digits past `decimals` are dropped, which truncates toward zero.
pub fn parse_units(input: &str, decimals: u8) -> Result<U256, UnitsError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UnitsError::Empty);
    }
    if trimmed.starts_with('-') {
        return Err(UnitsError::Negative);
    }
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let is_digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(UnitsError::Malformed(trimmed.to_owned()));
    }

    let scale = usize::from(decimals);
    let kept = &fraction[..fraction.len().min(scale)];

    let mut digits = String::with_capacity(whole.len() + scale);
    digits.push_str(whole);
    digits.push_str(kept);
    digits.extend(std::iter::repeat_n('0', scale - kept.len()));

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|_| UnitsError::Overflow)
}

pub fn parse_ether(input: &str) -> Result<U256, UnitsError> {
    parse_units(input, TOKEN_DECIMALS)
}

fn split_units(amount: U256, decimals: u8) -> (U256, String) {
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let fraction = amount % divisor;
    let padded = format!("{:0>width$}", fraction.to_string(), width = usize::from(decimals));
    (whole, padded)
}

/// `1000000000000000000000` at 18 decimals renders as `1000`; trailing
/// fractional zeros are trimmed and a zero fraction is omitted.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let (whole, fraction) = split_units(amount, decimals);
    let trimmed = fraction.trim_end_matches('0');
    if trimmed.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{trimmed}")
    }
}

pub fn format_token_amount(amount: U256) -> String {
    format_units(amount, TOKEN_DECIMALS)
}

/// ETH display: at most four fractional digits (truncated), at least one.
pub fn format_ether(wei: U256) -> String {
    let (whole, fraction) = split_units(wei, TOKEN_DECIMALS);
    let shown = fraction[..4].trim_end_matches('0');
    if shown.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{shown}")
    }
}
