//! JSON-RPC implementation of the ledger client.
//!
//! Speaks `eth_*` over HTTP via reqwest. Rate-limit responses and network
//! failures map to `Transient`; malformed payloads map to `Fatal` so the
//! scheduler can tell the two apart.

use super::{LedgerClient, RawLog, RawTransaction, TokenMetadata};
use crate::config::LedgerConfig;
use crate::constants::selectors;
use crate::error::{WatchError, WatchResult};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC ledger client over HTTP.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Transaction shape inside `eth_getBlockByNumber` with full transactions.
#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: B256,
    from: Address,
    to: Option<Address>,
    value: U256,
    #[serde(rename = "transactionIndex")]
    transaction_index: U256,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: U256,
    #[serde(rename = "logIndex")]
    log_index: U256,
    #[serde(rename = "transactionHash")]
    transaction_hash: B256,
    #[serde(default)]
    removed: bool,
}

impl HttpLedgerClient {
    pub fn new(config: &LedgerConfig) -> WatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| WatchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.rpc_url.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC call and unwrap the result value.
    async fn call(&self, method: &str, params: Value) -> WatchResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WatchError::from_http(method, e))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(WatchError::Transient(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(WatchError::Fatal(format!("{method}: HTTP {status}")));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| WatchError::Fatal(format!("{method}: invalid JSON-RPC body: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(WatchError::from_rpc_code(method, err.code, &err.message));
        }

        parsed
            .result
            .ok_or_else(|| WatchError::Fatal(format!("{method}: response missing result")))
    }

    /// Decode a typed value out of a JSON-RPC result.
    fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> WatchResult<T> {
        serde_json::from_value(value)
            .map_err(|e| WatchError::Fatal(format!("{method}: malformed result: {e}")))
    }
}

/// Parse a `0x`-prefixed quantity into u64.
fn parse_quantity(method: &str, value: &Value) -> WatchResult<u64> {
    let s = value
        .as_str()
        .ok_or_else(|| WatchError::Fatal(format!("{method}: quantity is not a string")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| WatchError::Fatal(format!("{method}: bad quantity {s}: {e}")))
}

/// Parse a 32-byte hex word into U256. Empty results read as zero, which
/// is what `eth_call` on a non-contract returns.
fn parse_word(method: &str, value: &Value) -> WatchResult<U256> {
    let s = value
        .as_str()
        .ok_or_else(|| WatchError::Fatal(format!("{method}: result is not a string")))?;
    let trimmed = s.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(trimmed, 16)
        .map_err(|e| WatchError::Fatal(format!("{method}: bad word {s}: {e}")))
}

fn height_hex(height: u64) -> String {
    format!("0x{height:x}")
}

/// ABI-encode an `address` argument appended to a selector.
fn encode_call(selector: [u8; 4], address: Option<Address>) -> String {
    let mut data = selector.to_vec();
    if let Some(addr) = address {
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(addr.as_slice());
    }
    format!("0x{}", hex::encode(data))
}

/// Decode an ABI string return value: dynamic string layout, with a
/// fallback for legacy contracts returning bytes32.
fn decode_abi_string(raw: &[u8]) -> Option<String> {
    if raw.len() >= 64 {
        let offset: usize = U256::from_be_slice(&raw[..32]).try_into().ok()?;
        let body_start = offset.checked_add(32)?;
        if let Some(len_word) = raw.get(offset..body_start) {
            let len: usize = U256::from_be_slice(len_word).try_into().ok()?;
            let body = raw.get(body_start..body_start.checked_add(len)?)?;
            return Some(String::from_utf8_lossy(body).into_owned());
        }
    }
    if raw.len() == 32 {
        let trimmed: Vec<u8> = raw.iter().copied().take_while(|b| *b != 0).collect();
        if !trimmed.is_empty() {
            return Some(String::from_utf8_lossy(&trimmed).into_owned());
        }
    }
    None
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn current_height(&self) -> WatchResult<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity("eth_blockNumber", &result)
    }

    async fn block_transactions(&self, height: u64) -> WatchResult<Vec<RawTransaction>> {
        let result = self
            .call("eth_getBlockByNumber", json!([height_hex(height), true]))
            .await?;

        if result.is_null() {
            // Node has not seen this block yet; retryable since we only
            // ask for heights at or below the confirmed tip.
            return Err(WatchError::Transient(format!(
                "eth_getBlockByNumber: block {height} not available yet"
            )));
        }

        let block: RpcBlock = Self::decode("eth_getBlockByNumber", result)?;
        Ok(block
            .transactions
            .into_iter()
            .map(|tx| RawTransaction {
                hash: tx.hash,
                from: tx.from,
                to: tx.to,
                value: tx.value,
                block_number: height,
                index: tx.transaction_index.to::<u64>(),
            })
            .collect())
    }

    async fn logs_in_range(&self, from: u64, to: u64, topics: &[B256]) -> WatchResult<Vec<RawLog>> {
        let topic0: Vec<String> = topics.iter().map(|t| format!("{t}")).collect();
        let filter = json!({
            "fromBlock": height_hex(from),
            "toBlock": height_hex(to),
            "topics": [topic0],
        });

        let result = self.call("eth_getLogs", json!([filter])).await?;
        let logs: Vec<RpcLog> = Self::decode("eth_getLogs", result)?;

        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                continue;
            }
            let data = hex::decode(log.data.trim_start_matches("0x"))
                .map_err(|e| WatchError::Fatal(format!("eth_getLogs: bad data field: {e}")))?;
            out.push(RawLog {
                contract: log.address,
                topics: log.topics,
                data,
                block_number: log.block_number.to::<u64>(),
                log_index: log.log_index.to::<u64>(),
                tx_hash: log.transaction_hash,
            });
        }
        Ok(out)
    }

    async fn native_balance(&self, address: Address) -> WatchResult<U256> {
        let result = self
            .call(
                "eth_getBalance",
                json!([address.to_checksum(None), "latest"]),
            )
            .await?;
        parse_word("eth_getBalance", &result)
    }

    async fn token_balance(&self, contract: Address, address: Address) -> WatchResult<U256> {
        let call = json!({
            "to": contract.to_checksum(None),
            "data": encode_call(selectors::BALANCE_OF, Some(address)),
        });
        let result = self.call("eth_call", json!([call, "latest"])).await?;
        parse_word("eth_call(balanceOf)", &result)
    }

    async fn token_metadata(&self, contract: Address) -> WatchResult<TokenMetadata> {
        let symbol_call = json!({
            "to": contract.to_checksum(None),
            "data": encode_call(selectors::SYMBOL, None),
        });
        let symbol = match self.call("eth_call", json!([symbol_call, "latest"])).await {
            Ok(v) => v
                .as_str()
                .and_then(|s| hex::decode(s.trim_start_matches("0x")).ok())
                .and_then(|raw| decode_abi_string(&raw))
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            Err(e) if e.is_transient() => return Err(e),
            Err(_) => "UNKNOWN".to_string(),
        };

        let decimals_call = json!({
            "to": contract.to_checksum(None),
            "data": encode_call(selectors::DECIMALS, None),
        });
        let decimals = match self.call("eth_call", json!([decimals_call, "latest"])).await {
            Ok(v) => parse_word("eth_call(decimals)", &v)
                .ok()
                .and_then(|w| u8::try_from(w).ok())
                .unwrap_or(18),
            Err(e) if e.is_transient() => return Err(e),
            Err(_) => 18,
        };

        Ok(TokenMetadata { symbol, decimals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn encode_balance_of_call() {
        let addr = Address::from_str("0xdAC17F958D2ee523a2206206994597C13D831ec7").unwrap();
        let call = encode_call(selectors::BALANCE_OF, Some(addr));
        assert!(call.starts_with("0x70a08231"));
        assert_eq!(call.len(), 2 + 8 + 64);
        assert!(call.ends_with("dac17f958d2ee523a2206206994597c13d831ec7"));
    }

    #[test]
    fn decode_dynamic_abi_string() {
        // offset=32, len=4, "USDT"
        let mut raw = vec![0u8; 64];
        raw[31] = 0x20;
        raw[63] = 4;
        raw.extend_from_slice(b"USDT");
        raw.extend_from_slice(&[0u8; 28]);
        assert_eq!(decode_abi_string(&raw).as_deref(), Some("USDT"));
    }

    #[test]
    fn decode_rejects_out_of_range_offset() {
        // Offset word near usize::MAX would wrap if added to unchecked
        let mut raw = U256::from(u64::MAX - 8).to_be_bytes::<32>().to_vec();
        raw.extend_from_slice(&[0u8; 32]);
        assert_eq!(decode_abi_string(&raw), None);

        // Honest offset, length pointing past the payload
        let mut raw = vec![0u8; 64];
        raw[31] = 0x20;
        raw[63] = 200;
        assert_eq!(decode_abi_string(&raw), None);
    }

    #[test]
    fn decode_bytes32_symbol() {
        // Legacy tokens (e.g. MKR) return a right-padded bytes32
        let mut raw = vec![0u8; 32];
        raw[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_abi_string(&raw).as_deref(), Some("MKR"));
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("t", &json!("0x10")).unwrap(), 16);
        assert!(parse_quantity("t", &json!(16)).is_err());
    }

    #[test]
    fn word_parsing_handles_empty() {
        assert_eq!(parse_word("t", &json!("0x")).unwrap(), U256::ZERO);
        assert_eq!(
            parse_word("t", &json!("0x0de0b6b3a7640000")).unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
    }
}
