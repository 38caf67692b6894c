//! Etherscan-compatible indexer client.
//!
//! Every request, including each retry attempt, passes through the shared
//! [`RateLimiter`] so the process as a whole stays under the upstream quota.

use super::{parse_quantity, ChainIndexer, DataSourceError, LogFilter, RateLimiter};
use crate::domain::{LogEntry, TransactionEntry};
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Largest page the indexer serves for log queries.
const LOG_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    hash: String,
    block_number: String,
    time_stamp: String,
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    is_error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: String,
    time_stamp: String,
    transaction_hash: String,
    #[serde(default)]
    log_index: String,
}

fn parse_field<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T, DataSourceError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| DataSourceError::ParseError(format!("Invalid {} {:?}: {}", field, raw, e)))
}

impl TryFrom<RawTransaction> for TransactionEntry {
    type Error = DataSourceError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let to = if raw.to.is_empty() {
            None
        } else {
            Some(parse_field::<Address>(&raw.to, "to")?)
        };
        Ok(TransactionEntry {
            hash: parse_field::<B256>(&raw.hash, "hash")?,
            block_number: parse_quantity(&raw.block_number)?,
            timestamp: parse_quantity(&raw.time_stamp)?,
            from: parse_field::<Address>(&raw.from, "from")?,
            to,
            is_error: raw.is_error == "1",
        })
    }
}

impl TryFrom<RawLog> for LogEntry {
    type Error = DataSourceError;

    fn try_from(raw: RawLog) -> Result<Self, Self::Error> {
        let topics = raw
            .topics
            .iter()
            .map(|t| parse_field::<B256>(t, "topic"))
            .collect::<Result<Vec<_>, _>>()?;
        let log_index = if raw.log_index.is_empty() {
            0
        } else {
            parse_quantity(&raw.log_index)?
        };
        Ok(LogEntry {
            address: parse_field::<Address>(&raw.address, "address")?,
            topics,
            data: parse_field::<Bytes>(&raw.data, "data")?,
            block_number: parse_quantity(&raw.block_number)?,
            timestamp: parse_quantity(&raw.time_stamp)?,
            transaction_hash: parse_field::<B256>(&raw.transaction_hash, "transaction hash")?,
            log_index,
        })
    }
}

/// Decode each array element, dropping (and logging) any that fail validation.
fn decode_records<R, T>(result: serde_json::Value, kind: &str) -> Result<Vec<T>, DataSourceError>
where
    R: for<'de> Deserialize<'de>,
    T: TryFrom<R, Error = DataSourceError>,
{
    let serde_json::Value::Array(items) = result else {
        return Err(DataSourceError::ParseError(format!(
            "Expected array of {} records",
            kind
        )));
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let parsed = serde_json::from_value::<R>(item)
            .map_err(|e| DataSourceError::ParseError(e.to_string()))
            .and_then(T::try_from);
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed {} record: {}", kind, e),
        }
    }
    Ok(records)
}

/// Indexer client speaking the Etherscan `module`/`action` query API.
#[derive(Debug, Clone)]
pub struct EtherscanIndexer {
    client: Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
}

impl EtherscanIndexer {
    pub fn new(base_url: String, api_key: String, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            limiter,
        }
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<serde_json::Value, DataSourceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            self.limiter.acquire().await;

            let response = self
                .client
                .get(&self.base_url)
                .query(params)
                .query(&[("apikey", self.api_key.as_str())])
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            let envelope = response.json::<Envelope>().await.map_err(|e| {
                backoff::Error::permanent(DataSourceError::ParseError(e.to_string()))
            })?;
            interpret(envelope)
        })
        .await
    }
}

/// Map the indexer's status envelope onto a result.
///
/// Status `"0"` with an array result means "no records"; with a string
/// result it is an error message, which is retried only for rate limiting.
fn interpret(envelope: Envelope) -> Result<serde_json::Value, backoff::Error<DataSourceError>> {
    if envelope.status == "1" {
        return Ok(envelope.result);
    }
    match envelope.result {
        serde_json::Value::Array(_) => Ok(serde_json::Value::Array(Vec::new())),
        other => {
            let detail = other.as_str().map(str::to_string).unwrap_or_default();
            let combined = format!("{} {}", envelope.message, detail);
            if combined.to_ascii_lowercase().contains("rate limit") {
                Err(backoff::Error::transient(DataSourceError::RateLimited))
            } else {
                Err(backoff::Error::permanent(DataSourceError::Other(
                    combined.trim().to_string(),
                )))
            }
        }
    }
}

/// Query for one page of an account's transactions, newest first.
///
/// No `endblock` is sent so the indexer searches up to its latest block.
fn txlist_params(address: Address, page: u32, offset: u32) -> Vec<(&'static str, String)> {
    vec![
        ("module", "account".to_string()),
        ("action", "txlist".to_string()),
        ("address", address.to_string()),
        ("startblock", "0".to_string()),
        ("page", page.to_string()),
        ("offset", offset.to_string()),
        ("sort", "desc".to_string()),
    ]
}

#[async_trait]
impl ChainIndexer for EtherscanIndexer {
    async fn account_transactions(
        &self,
        address: Address,
        page: u32,
        offset: u32,
    ) -> Result<Vec<TransactionEntry>, DataSourceError> {
        debug!(%address, page, offset, "Fetching account transactions");
        let result = self.query(&txlist_params(address, page, offset)).await?;
        decode_records::<RawTransaction, TransactionEntry>(result, "transaction")
    }

    async fn block_logs(&self, block: u64) -> Result<Vec<LogEntry>, DataSourceError> {
        debug!(block, "Fetching block logs");
        let mut logs = Vec::new();
        let mut page = 1u32;
        loop {
            let result = self
                .query(&[
                    ("module", "logs".to_string()),
                    ("action", "getLogs".to_string()),
                    ("fromBlock", block.to_string()),
                    ("toBlock", block.to_string()),
                    ("page", page.to_string()),
                    ("offset", LOG_PAGE_SIZE.to_string()),
                ])
                .await?;
            let batch = decode_records::<RawLog, LogEntry>(result, "log")?;
            let len = batch.len();
            logs.extend(batch);
            if len < LOG_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        Ok(logs)
    }

    async fn search_logs(
        &self,
        filter: &LogFilter,
        page: u32,
        offset: u32,
    ) -> Result<Vec<LogEntry>, DataSourceError> {
        debug!(address = %filter.address, page, offset, "Searching logs");
        let mut params = vec![
            ("module", "logs".to_string()),
            ("action", "getLogs".to_string()),
            ("address", filter.address.to_string()),
            ("fromBlock", filter.from_block.to_string()),
            (
                "toBlock",
                filter
                    .to_block
                    .map_or_else(|| "latest".to_string(), |b| b.to_string()),
            ),
            ("page", page.to_string()),
            ("offset", offset.to_string()),
        ];
        const TOPIC_KEYS: [&str; 3] = ["topic0", "topic1", "topic2"];
        let present: Vec<usize> = (0..3).filter(|&i| filter.topics[i].is_some()).collect();
        for &i in &present {
            if let Some(topic) = filter.topics[i] {
                params.push((TOPIC_KEYS[i], topic.to_string()));
            }
        }
        for (n, &i) in present.iter().enumerate() {
            for &j in &present[n + 1..] {
                let key = match (i, j) {
                    (0, 1) => "topic0_1_opr",
                    (0, 2) => "topic0_2_opr",
                    _ => "topic1_2_opr",
                };
                params.push((key, "and".to_string()));
            }
        }

        let result = self.query(&params).await?;
        decode_records::<RawLog, LogEntry>(result, "log")
    }
}
