//! Merges per-transaction fee legs into combined records.

use crate::domain::{Decimal, FeeCollectionRecord, FeeLeg, FeeLegKind, TimeMs};
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// How each leg is labelled and scaled in the combined record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegSpec {
    pub stable_symbol: String,
    pub stable_decimals: u8,
    pub native_symbol: String,
    pub native_decimals: u8,
}

impl LegSpec {
    fn symbol(&self, kind: FeeLegKind) -> &str {
        match kind {
            FeeLegKind::Stable => &self.stable_symbol,
            FeeLegKind::Native => &self.native_symbol,
        }
    }

    fn decimals(&self, kind: FeeLegKind) -> u8 {
        match kind {
            FeeLegKind::Stable => self.stable_decimals,
            FeeLegKind::Native => self.native_decimals,
        }
    }
}

struct Pending {
    block_number: u64,
    timestamp: TimeMs,
    raw: BTreeMap<FeeLegKind, U256>,
}

/// Group legs by transaction, zero-fill missing legs, and sort newest first.
pub fn aggregate(legs: Vec<FeeLeg>, spec: &LegSpec) -> Vec<FeeCollectionRecord> {
    let mut by_tx: HashMap<B256, Pending> = HashMap::new();
    for leg in legs {
        let pending = by_tx.entry(leg.transaction_hash).or_insert_with(|| Pending {
            block_number: leg.block_number,
            timestamp: leg.timestamp,
            raw: BTreeMap::new(),
        });
        let slot = pending.raw.entry(leg.kind).or_insert(U256::ZERO);
        *slot = slot.saturating_add(leg.amount);
    }

    let mut records: Vec<FeeCollectionRecord> = by_tx
        .into_iter()
        .filter_map(|(hash, pending)| {
            let mut amounts = BTreeMap::new();
            for kind in [FeeLegKind::Stable, FeeLegKind::Native] {
                let raw = pending.raw.get(&kind).copied().unwrap_or(U256::ZERO);
                let Some(amount) = Decimal::from_raw_units(raw, spec.decimals(kind)) else {
                    warn!(tx = %hash, raw = %raw, "Fee amount out of decimal range, skipping record");
                    return None;
                };
                amounts.insert(spec.symbol(kind).to_string(), amount);
            }
            Some(FeeCollectionRecord {
                timestamp: pending.timestamp,
                amounts,
                transaction_hash: hash,
                block_number: pending.block_number,
            })
        })
        .collect();

    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.block_number.cmp(&a.block_number))
            .then_with(|| a.transaction_hash.cmp(&b.transaction_hash))
    });
    records
}
