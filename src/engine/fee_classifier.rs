//! Separates genuine fee harvests from principal withdrawals using the
//! events emitted by each transaction.
//!
//! A position manager transaction that also decreases liquidity moves
//! principal along with any fees, so every leg it emits is excluded.

use crate::contracts::{IERC20Metadata, INonfungiblePositionManager, IWrappedNative};
use crate::domain::{FeeLeg, FeeLegKind, LogEntry, TimeMs};
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Contracts that define what counts as a fee payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeContracts {
    /// The fee-collection (position manager) contract.
    pub position_manager: Address,
    pub stable_token: Address,
    pub wrapped_native: Address,
}

impl FeeContracts {
    pub fn is_decrease_liquidity(&self, log: &LogEntry) -> bool {
        log.address == self.position_manager
            && log.topic0() == Some(&INonfungiblePositionManager::DecreaseLiquidity::SIGNATURE_HASH)
    }

    /// Stable-token amount moved from the position manager to `owner` by this log.
    pub fn stable_payout(&self, log: &LogEntry, owner: Address) -> Option<U256> {
        if log.address != self.stable_token
            || log.topic0() != Some(&IERC20Metadata::Transfer::SIGNATURE_HASH)
        {
            return None;
        }
        if log.topic_address(1)? != self.position_manager || log.topic_address(2)? != owner {
            return None;
        }
        first_word(log)
    }

    /// Wrapped-native amount unwrapped by the position manager in this log.
    pub fn native_unwrap(&self, log: &LogEntry) -> Option<U256> {
        if log.address != self.wrapped_native
            || log.topic0() != Some(&IWrappedNative::Withdrawal::SIGNATURE_HASH)
        {
            return None;
        }
        if log.topic_address(1)? != self.position_manager {
            return None;
        }
        first_word(log)
    }
}

fn first_word(log: &LogEntry) -> Option<U256> {
    let word = log.data.get(..32);
    if word.is_none() {
        warn!(
            tx = %log.transaction_hash,
            log_index = log.log_index,
            len = log.data.len(),
            "Skipping log with truncated data"
        );
    }
    word.and_then(U256::try_from_be_slice)
}

#[derive(Debug, Default)]
struct TxTotals {
    block_number: u64,
    timestamp: u64,
    stable: U256,
    native: U256,
}

fn into_legs(totals: BTreeMap<B256, TxTotals>) -> Vec<FeeLeg> {
    let mut legs = Vec::new();
    for (hash, t) in totals {
        // Stable amount is the fee-vs-noise discriminator.
        if t.stable.is_zero() {
            continue;
        }
        let timestamp = TimeMs::from_secs(t.timestamp);
        legs.push(FeeLeg {
            transaction_hash: hash,
            block_number: t.block_number,
            timestamp,
            kind: FeeLegKind::Stable,
            amount: t.stable,
        });
        if !t.native.is_zero() {
            legs.push(FeeLeg {
                transaction_hash: hash,
                block_number: t.block_number,
                timestamp,
                kind: FeeLegKind::Native,
                amount: t.native,
            });
        }
    }
    legs
}

/// Classify all events of one block against the owner's candidate transactions.
///
/// Returns the fee legs of every candidate that did not decrease liquidity and
/// paid a strictly positive stable amount.
pub fn classify_block(
    logs: &[LogEntry],
    candidates: &HashSet<B256>,
    contracts: &FeeContracts,
    owner: Address,
) -> Vec<FeeLeg> {
    let excluded: HashSet<B256> = logs
        .iter()
        .filter(|log| contracts.is_decrease_liquidity(log))
        .map(|log| log.transaction_hash)
        .collect();

    let mut totals: BTreeMap<B256, TxTotals> = BTreeMap::new();
    for log in logs {
        let hash = log.transaction_hash;
        if !candidates.contains(&hash) || excluded.contains(&hash) {
            continue;
        }
        let entry = totals.entry(hash).or_insert_with(|| TxTotals {
            block_number: log.block_number,
            timestamp: log.timestamp,
            ..Default::default()
        });
        if let Some(amount) = contracts.stable_payout(log, owner) {
            entry.stable = entry.stable.saturating_add(amount);
        } else if let Some(amount) = contracts.native_unwrap(log) {
            entry.native = entry.native.saturating_add(amount);
        }
    }

    into_legs(totals)
}

/// Fallback classification from topic-filtered searches: stable transfers
/// from the position manager to the owner, joined with native unwraps that
/// share a transaction hash.
///
/// Cannot see liquidity decreases, so withdrawals that pay stable tokens are
/// reported as fees.
pub fn classify_log_search(
    stable_logs: &[LogEntry],
    native_logs: &[LogEntry],
    contracts: &FeeContracts,
    owner: Address,
) -> Vec<FeeLeg> {
    let mut totals: BTreeMap<B256, TxTotals> = BTreeMap::new();
    for log in stable_logs {
        if let Some(amount) = contracts.stable_payout(log, owner) {
            let entry = totals
                .entry(log.transaction_hash)
                .or_insert_with(|| TxTotals {
                    block_number: log.block_number,
                    timestamp: log.timestamp,
                    ..Default::default()
                });
            entry.stable = entry.stable.saturating_add(amount);
        }
    }
    for log in native_logs {
        if let (Some(entry), Some(amount)) = (
            totals.get_mut(&log.transaction_hash),
            contracts.native_unwrap(log),
        ) {
            entry.native = entry.native.saturating_add(amount);
        }
    }

    into_legs(totals)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn hash(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    #[test]
    fn test_decrease_excludes_whole_transaction() {
        let c = contracts();
        let tx = hash(1);
        let logs = vec![
            decrease_log(tx, 0),
            stable_transfer_log(c.position_manager, owner(), 5_000_000, tx, 1),
            unwrap_log(c.position_manager, 1_000, tx, 2),
        ];
        let candidates = HashSet::from([tx]);
        assert!(classify_block(&logs, &candidates, &c, owner()).is_empty());
    }

    #[test]
    fn test_harvest_produces_both_legs() {
        let c = contracts();
        let tx = hash(2);
        let logs = vec![
            stable_transfer_log(c.position_manager, owner(), 12_500_000, tx, 0),
            unwrap_log(c.position_manager, 3_000, tx, 1),
        ];
        let legs = classify_block(&logs, &HashSet::from([tx]), &c, owner());
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].kind, FeeLegKind::Stable);
        assert_eq!(legs[0].amount, U256::from(12_500_000u64));
        assert_eq!(legs[1].kind, FeeLegKind::Native);
        assert_eq!(legs[1].amount, U256::from(3_000u64));
        assert_eq!(legs[0].timestamp, TimeMs::from_secs(1_700_000_000));
    }

    #[test]
    fn test_native_only_is_treated_as_noise() {
        let c = contracts();
        let tx = hash(3);
        let logs = vec![unwrap_log(c.position_manager, 3_000, tx, 0)];
        assert!(classify_block(&logs, &HashSet::from([tx]), &c, owner()).is_empty());
    }

    #[test]
    fn test_non_candidates_and_foreign_transfers_ignored() {
        let c = contracts();
        let candidate = hash(4);
        let other = hash(5);
        let logs = vec![
            // not sent by the owner
            stable_transfer_log(c.position_manager, owner(), 1_000, other, 0),
            // pays someone else
            stable_transfer_log(c.position_manager, Address::repeat_byte(0x99), 1_000, candidate, 1),
            // not from the position manager
            stable_transfer_log(Address::repeat_byte(0x98), owner(), 1_000, candidate, 2),
        ];
        assert!(classify_block(&logs, &HashSet::from([candidate]), &c, owner()).is_empty());
    }

    #[test]
    fn test_multiple_transfers_accumulate() {
        let c = contracts();
        let tx = hash(6);
        let logs = vec![
            stable_transfer_log(c.position_manager, owner(), 1_000, tx, 0),
            stable_transfer_log(c.position_manager, owner(), 2_000, tx, 1),
        ];
        let legs = classify_block(&logs, &HashSet::from([tx]), &c, owner());
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].amount, U256::from(3_000u64));
    }

    #[test]
    fn test_truncated_data_fails_closed() {
        let c = contracts();
        let tx = hash(7);
        let mut log = stable_transfer_log(c.position_manager, owner(), 1_000, tx, 0);
        log.data = alloy_primitives::Bytes::from(vec![0u8; 8]);
        assert!(classify_block(&[log], &HashSet::from([tx]), &c, owner()).is_empty());
    }

    #[test]
    fn test_log_search_joins_native_by_hash() {
        let c = contracts();
        let stable = vec![stable_transfer_log(c.position_manager, owner(), 1_000, hash(8), 0)];
        let native = vec![
            unwrap_log(c.position_manager, 50, hash(8), 1),
            unwrap_log(c.position_manager, 70, hash(9), 0),
        ];
        let legs = classify_log_search(&stable, &native, &c, owner());
        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|l| l.transaction_hash == hash(8)));
        assert_eq!(legs[1].amount, U256::from(50u8));
    }
}
