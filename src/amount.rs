// src/amount.rs

//! Native amount arithmetic.
//!
//! Wallet APIs express amounts as non-negative decimal integer strings in the
//! asset's smallest unit (e.g. wei). Everything here parses into `u128`, which
//! covers any realistic balance, and fails loudly instead of wrapping.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{ActionQueueError, Result};

/// Decimal integer string in the asset's smallest denomination.
pub type NativeAmount = String;

static NATIVE_AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("static regex"));

/// True if `s` is a syntactically valid native amount.
pub fn is_native_amount(s: &str) -> bool {
    NATIVE_AMOUNT_RE.is_match(s)
}

pub fn parse(s: &str) -> Result<u128> {
    if !is_native_amount(s) {
        return Err(ActionQueueError::InvalidAmount(s.to_string()));
    }
    s.parse::<u128>()
        .map_err(|_| ActionQueueError::InvalidAmount(s.to_string()))
}

pub fn add(a: &str, b: &str) -> Result<NativeAmount> {
    let sum = parse(a)?
        .checked_add(parse(b)?)
        .ok_or_else(|| ActionQueueError::InvalidAmount(format!("{a} + {b} overflows")))?;
    Ok(sum.to_string())
}

/// Scale an amount by `percent / 100`, rounding down.
pub fn scale_percent(a: &str, percent: u32) -> Result<NativeAmount> {
    let value = parse(a)?;
    let scaled = value
        .checked_mul(u128::from(percent))
        .map(|v| v / 100)
        .unwrap_or_else(|| value / 100 * u128::from(percent));
    Ok(scaled.to_string())
}

pub fn gte(a: &str, b: &str) -> Result<bool> {
    Ok(parse(a)? >= parse(b)?)
}

pub fn lte(a: &str, b: &str) -> Result<bool> {
    Ok(parse(a)? <= parse(b)?)
}
