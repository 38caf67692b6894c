//! Validated chain records consumed from the indexing API.

use alloy_primitives::{Address, Bytes, B256};

/// A transaction entry from an account transaction listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEntry {
    pub hash: B256,
    pub block_number: u64,
    /// Block timestamp in seconds.
    pub timestamp: u64,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub is_error: bool,
}

/// An event log emitted within a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    /// Block timestamp in seconds.
    pub timestamp: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl LogEntry {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    /// Indexed address argument `n` (1-based topic position).
    pub fn topic_address(&self, n: usize) -> Option<Address> {
        self.topics.get(n).map(|t| Address::from_word(*t))
    }
}
