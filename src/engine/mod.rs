//! Pure computation engine(s): fixed-point position math and fee attribution.

pub mod amounts;
pub mod fee_aggregator;
pub mod fee_classifier;
pub mod tick_math;

pub use amounts::{amounts, raw_amounts, TokenAmounts};
pub use fee_aggregator::{aggregate, LegSpec};
pub use fee_classifier::{classify_block, classify_log_search, FeeContracts};
pub use tick_math::{sqrt_ratio_at_tick, TickMathError, MAX_TICK, MIN_TICK};
