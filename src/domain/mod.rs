//! Domain types for position analytics and fee attribution.
//!
//! This module provides:
//! - Lossless decimal handling and fixed-point formatting of raw token units
//! - Domain primitives: TimeMs, TokenId, PoolKey
//! - Position, fee record, and validated chain record types

pub mod chain;
pub mod decimal;
pub mod fee;
pub mod position;
pub mod primitives;

pub use chain::{LogEntry, TransactionEntry};
pub use decimal::{format_fixed, Decimal};
pub use fee::{FeeCollectionRecord, FeeLeg, FeeLegKind};
pub use position::{Position, PositionState, TokenMetadata};
pub use primitives::{PoolKey, TimeMs, TokenId};
