//! Lossless decimal numeric type backed by rust_decimal, plus fixed-point
//! formatting of raw on-chain token units.

use alloy_primitives::U256;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for token amounts.
///
/// Backed by rust_decimal to avoid floating-point drift.
/// Serializes to a JSON string so large amounts survive any consumer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::str")] RustDecimal);

impl Decimal {
    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Convert raw integer token units into a decimal scaled by `10^-decimals`.
    ///
    /// Returns `None` when the amount does not fit rust_decimal's 96-bit mantissa
    /// or `decimals` exceeds its maximum scale of 28.
    pub fn from_raw_units(raw: U256, decimals: u8) -> Option<Self> {
        let mantissa = i128::try_from(raw).ok()?;
        RustDecimal::try_from_i128_with_scale(mantissa, u32::from(decimals))
            .ok()
            .map(|d| Decimal(d.normalize()))
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        // Use normalize() to remove trailing zeros, then format without exponent
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

fn pow10(exp: u32) -> Option<U256> {
    U256::from(10u8).checked_pow(U256::from(exp))
}

/// Render raw token units scaled by `10^-decimals` with exactly `precision`
/// fractional digits, rounding half up.
///
/// Zero renders as `"0"` with no fractional part.
pub fn format_fixed(raw: U256, decimals: u8, precision: u32) -> String {
    if raw.is_zero() {
        return "0".to_string();
    }
    let (Some(unit), Some(precision_unit)) = (pow10(u32::from(decimals)), pow10(precision)) else {
        return raw.to_string();
    };

    let scaled = raw.saturating_mul(precision_unit);
    let mut quotient = scaled / unit;
    let remainder = scaled % unit;
    if remainder >= unit - remainder {
        quotient += U256::from(1u8);
    }

    let integer = quotient / precision_unit;
    if precision == 0 {
        return integer.to_string();
    }
    let fraction = (quotient % precision_unit).to_string();
    format!(
        "{}.{:0>width$}",
        integer,
        fraction,
        width = precision as usize
    )
}
