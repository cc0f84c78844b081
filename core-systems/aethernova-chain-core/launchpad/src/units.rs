//! Decimal <-> fixed-point conversion for native value and token amounts.
//!
//! "0.0001" with 18 decimals is 100_000_000_000_000 smallest units. Parsing is exact:
//! more fractional digits than `decimals` is an error, never a silent truncation.

use thiserror::Error;

use crate::Balance;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in `{0}`")]
    InvalidDigit(String),
    #[error("too many fractional digits in `{0}` (max {1})")]
    TooPrecise(String, u32),
    #[error("amount `{0}` overflows u128")]
    Overflow(String),
}

/// Parse a decimal string such as "10000" or "0.01" into smallest units.
pub fn parse_units(s: &str, decimals: u32) -> Result<Balance, UnitsError> {
    let s = s.trim().replace('_', "");
    if s.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s.as_str(), ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(UnitsError::InvalidDigit(s.clone()));
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(UnitsError::InvalidDigit(s.clone()));
    }
    if frac_part.len() > decimals as usize {
        return Err(UnitsError::TooPrecise(s.clone(), decimals));
    }

    let scale = 10u128
        .checked_pow(decimals)
        .ok_or_else(|| UnitsError::Overflow(s.clone()))?;
    let whole: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| UnitsError::Overflow(s.clone()))?
    };
    let mut frac: u128 = 0;
    if !frac_part.is_empty() {
        let padded = format!("{:0<width$}", frac_part, width = decimals as usize);
        frac = padded.parse().map_err(|_| UnitsError::Overflow(s.clone()))?;
    }
    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac))
        .ok_or(UnitsError::Overflow(s))
}

/// Render smallest units as a decimal string, trailing fractional zeros trimmed.
pub fn format_units(value: Balance, decimals: u32) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let scale = 10u128.pow(decimals);
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}
