//! Token amounts held by a concentrated-liquidity position.

use super::tick_math::{sqrt_ratio_at_tick, TickMathError};
use crate::domain::format_fixed;
use alloy_primitives::{U256, U512};

/// Fractional digits used when rendering amounts.
pub const DISPLAY_PRECISION: u32 = 6;

/// Amounts rendered as fixed-precision decimal strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAmounts {
    pub amount0: String,
    pub amount1: String,
}

impl TokenAmounts {
    pub fn zero() -> Self {
        TokenAmounts {
            amount0: "0".to_string(),
            amount1: "0".to_string(),
        }
    }
}

/// Computes `x * y / d` rounding down, widening to 512 bits when the product
/// overflows. Returns `None` on division by zero or a quotient above 256 bits.
fn mul_div(x: U256, y: U256, d: U256) -> Option<U256> {
    if d.is_zero() {
        return None;
    }

    if let Some(product) = x.checked_mul(y) {
        return Some(product / d);
    }

    let quotient = (U512::from(x) * U512::from(y)) / U512::from(d);
    let limbs = quotient.into_limbs();
    if limbs[4..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some(U256::from_limbs_slice(&limbs[..4]))
}

/// `L * 2^96 * (upper - lower) / (upper * lower)`
fn amount0_delta(liquidity: U256, sqrt_lower: U256, sqrt_upper: U256) -> U256 {
    mul_div(liquidity << 96, sqrt_upper - sqrt_lower, sqrt_upper)
        .map(|v| v / sqrt_lower)
        .unwrap_or(U256::ZERO)
}

/// `L * (upper - lower) / 2^96`
fn amount1_delta(liquidity: U256, sqrt_lower: U256, sqrt_upper: U256) -> U256 {
    mul_div(liquidity, sqrt_upper - sqrt_lower, U256::from(1u8) << 96).unwrap_or(U256::ZERO)
}

/// Raw token units (amount0, amount1) held by `liquidity` over
/// `[tick_lower, tick_upper)` with the pool at `current_tick`.
///
/// # Errors
/// Returns an error for ticks outside the valid range or an inverted range.
pub fn raw_amounts(
    liquidity: u128,
    tick_lower: i32,
    tick_upper: i32,
    current_tick: i32,
) -> Result<(U256, U256), TickMathError> {
    if tick_lower > tick_upper {
        return Err(TickMathError::InvertedRange {
            lower: tick_lower,
            upper: tick_upper,
        });
    }
    if liquidity == 0 {
        return Ok((U256::ZERO, U256::ZERO));
    }

    let liquidity = U256::from(liquidity);
    let sqrt_lower = sqrt_ratio_at_tick(tick_lower)?;
    let sqrt_upper = sqrt_ratio_at_tick(tick_upper)?;

    if current_tick < tick_lower {
        return Ok((amount0_delta(liquidity, sqrt_lower, sqrt_upper), U256::ZERO));
    }
    if current_tick >= tick_upper {
        return Ok((U256::ZERO, amount1_delta(liquidity, sqrt_lower, sqrt_upper)));
    }

    let sqrt_current = sqrt_ratio_at_tick(current_tick)?;
    Ok((
        amount0_delta(liquidity, sqrt_current, sqrt_upper),
        amount1_delta(liquidity, sqrt_lower, sqrt_current),
    ))
}

/// Amounts scaled by each token's decimals and rendered with
/// [`DISPLAY_PRECISION`] fractional digits.
///
/// # Errors
/// Same as [`raw_amounts`].
pub fn amounts(
    liquidity: u128,
    tick_lower: i32,
    tick_upper: i32,
    current_tick: i32,
    decimals0: u8,
    decimals1: u8,
) -> Result<TokenAmounts, TickMathError> {
    if liquidity == 0 {
        return Ok(TokenAmounts::zero());
    }
    let (amount0, amount1) = raw_amounts(liquidity, tick_lower, tick_upper, current_tick)?;
    Ok(TokenAmounts {
        amount0: format_fixed(amount0, decimals0, DISPLAY_PRECISION),
        amount1: format_fixed(amount1, decimals1, DISPLAY_PRECISION),
    })
}
