//! Fee harvest records.

use crate::domain::{Decimal, TimeMs};
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which payout leg of a fee harvest an amount belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeeLegKind {
    /// ERC-20 stable token transferred from the position manager to the owner.
    Stable,
    /// Wrapped native token unwrapped by the position manager on the owner's behalf.
    Native,
}

/// One token leg observed in one fee-harvest transaction, in raw units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeLeg {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub timestamp: TimeMs,
    pub kind: FeeLegKind,
    pub amount: U256,
}

/// A fee harvest with all of its legs merged, keyed by leg symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeCollectionRecord {
    pub timestamp: TimeMs,
    pub amounts: BTreeMap<String, Decimal>,
    pub transaction_hash: B256,
    pub block_number: u64,
}

impl FeeCollectionRecord {
    /// Amount for a leg symbol, zero when the leg was not observed.
    pub fn amount(&self, symbol: &str) -> Decimal {
        self.amounts.get(symbol).copied().unwrap_or_else(Decimal::zero)
    }
}
