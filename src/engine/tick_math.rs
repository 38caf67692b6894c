//! Tick to Q64.96 square-root price conversion.
//!
//! Bit-exact with the on-chain `TickMath.getSqrtRatioAtTick`: every step is
//! 256-bit integer arithmetic, never floating point.

use alloy_primitives::U256;
use thiserror::Error;

/// Lowest tick whose price fits the Q64.96 sqrt range.
pub const MIN_TICK: i32 = -887_272;
/// Highest tick whose price fits the Q64.96 sqrt range.
pub const MAX_TICK: i32 = 887_272;

/// Fixed-point multipliers `sqrt(1.0001)^(-2^i)` in Q128.128, for bit `i` of |tick|.
const TICK_FACTORS: [u128; 20] = [
    0xfffcb933bd6fad37aa2d162d1a594001,
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TickMathError {
    #[error("tick {0} outside [{MIN_TICK}, {MAX_TICK}]")]
    TickOutOfRange(i32),
    #[error("invalid tick range: lower {lower} > upper {upper}")]
    InvertedRange { lower: i32, upper: i32 },
}

/// `sqrt(1.0001^tick) * 2^96`, rounded up.
///
/// # Errors
/// Returns `TickOutOfRange` when `|tick| > MAX_TICK`.
pub fn sqrt_ratio_at_tick(tick: i32) -> Result<U256, TickMathError> {
    let abs_tick = tick.unsigned_abs();
    if abs_tick > MAX_TICK.unsigned_abs() {
        return Err(TickMathError::TickOutOfRange(tick));
    }

    let mut ratio = if abs_tick & 1 != 0 {
        U256::from(TICK_FACTORS[0])
    } else {
        U256::from(1u8) << 128
    };

    for (bit, factor) in TICK_FACTORS.iter().enumerate().skip(1) {
        if abs_tick & (1 << bit) != 0 {
            ratio = (ratio * U256::from(*factor)) >> 128;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up so the result never understates the price.
    let round_up = !(ratio & U256::from(u32::MAX)).is_zero();
    Ok((ratio >> 32) + U256::from(round_up))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q96() -> U256 {
        U256::from(1u8) << 96
    }

    #[test]
    fn test_tick_zero_is_exactly_one() {
        assert_eq!(sqrt_ratio_at_tick(0).unwrap(), q96());
    }

    #[test]
    fn test_bounds_match_canonical_constants() {
        assert_eq!(
            sqrt_ratio_at_tick(MIN_TICK).unwrap(),
            U256::from(4_295_128_739u64)
        );
        let max: U256 = "1461446703485210103287273052203988822378723970342"
            .parse()
            .unwrap();
        assert_eq!(sqrt_ratio_at_tick(MAX_TICK).unwrap(), max);
    }

    #[test]
    fn test_known_values() {
        assert_eq!(
            sqrt_ratio_at_tick(1).unwrap(),
            "79232123823359799118286999568".parse::<U256>().unwrap()
        );
        assert_eq!(
            sqrt_ratio_at_tick(-1).unwrap(),
            "79224201403219477170569942574".parse::<U256>().unwrap()
        );
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert_eq!(
            sqrt_ratio_at_tick(MAX_TICK + 1),
            Err(TickMathError::TickOutOfRange(MAX_TICK + 1))
        );
        assert_eq!(
            sqrt_ratio_at_tick(MIN_TICK - 1),
            Err(TickMathError::TickOutOfRange(MIN_TICK - 1))
        );
    }

    #[test]
    fn test_monotonic_in_tick() {
        let mut previous = sqrt_ratio_at_tick(-1000).unwrap();
        for tick in -999..=1000 {
            let current = sqrt_ratio_at_tick(tick).unwrap();
            assert!(current > previous, "not increasing at tick {}", tick);
            previous = current;
        }
    }

    #[test]
    fn test_reciprocal_ticks_multiply_to_q192() {
        let q192 = U256::from(1u8) << 192;
        for tick in [1, 60, 887, 10_000, 200_000, 500_000, MAX_TICK] {
            let product = sqrt_ratio_at_tick(tick).unwrap() * sqrt_ratio_at_tick(-tick).unwrap();
            let diff = if product > q192 {
                product - q192
            } else {
                q192 - product
            };
            // relative error below 1e-8; the low end of the range only has ~32 bits
            assert!(
                diff * U256::from(100_000_000u64) <= q192,
                "tick {} diverged: {}",
                tick,
                product
            );
        }
    }
}
