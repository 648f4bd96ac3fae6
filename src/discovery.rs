//! Enhanced token discovery via an Alchemy-style indexing endpoint.
//!
//! Optional capability: when configured, the aggregator asks the indexer
//! for every fungible-token balance an address holds, instead of probing
//! only the curated list. Failures here reduce coverage, never the whole
//! aggregation.

use crate::config::DiscoveryConfig;
use crate::error::{WatchError, WatchResult};
use alloy_primitives::{Address, U256};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// A token holding reported by the indexer, before metadata enrichment.
#[derive(Debug, Clone)]
pub struct DiscoveredToken {
    pub contract: Address,
    pub raw_balance: U256,
}

/// Client for the `alchemy_getTokenBalances` extension API.
pub struct AlchemyDiscovery {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TokenBalancesResult {
    #[serde(rename = "tokenBalances")]
    token_balances: Vec<TokenBalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenBalanceEntry {
    #[serde(rename = "contractAddress")]
    contract_address: Address,
    #[serde(rename = "tokenBalance")]
    token_balance: Option<String>,
}

impl AlchemyDiscovery {
    /// Build from config; `None` when discovery is disabled or unconfigured.
    pub fn from_config(
        config: &DiscoveryConfig,
        fallback_url: &str,
        timeout_ms: u64,
    ) -> WatchResult<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let url = if config.rpc_url.is_empty() {
            fallback_url.to_string()
        } else {
            config.rpc_url.clone()
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| WatchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Some(Self { client, url }))
    }

    /// All nonzero fungible-token balances for `address`.
    pub async fn token_balances(&self, address: Address) -> WatchResult<Vec<DiscoveredToken>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "alchemy_getTokenBalances",
            "params": [address.to_checksum(None), "erc20"],
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WatchError::from_http("alchemy_getTokenBalances", e))?;

        if !response.status().is_success() {
            return Err(WatchError::Transient(format!(
                "alchemy_getTokenBalances: HTTP {}",
                response.status()
            )));
        }

        let parsed: serde_json::Value = response.json().await.map_err(|e| {
            WatchError::Fatal(format!("alchemy_getTokenBalances: bad body: {e}"))
        })?;

        if let Some(err) = parsed.get("error") {
            return Err(WatchError::Fatal(format!(
                "alchemy_getTokenBalances: {err}"
            )));
        }

        let result: TokenBalancesResult = serde_json::from_value(
            parsed
                .get("result")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        )
        .map_err(|e| WatchError::Fatal(format!("alchemy_getTokenBalances: malformed result: {e}")))?;

        let mut out = Vec::new();
        for entry in result.token_balances {
            let Some(balance_hex) = entry.token_balance else {
                continue;
            };
            let trimmed = balance_hex.trim_start_matches("0x");
            if trimmed.is_empty() {
                continue;
            }
            let Ok(raw) = U256::from_str_radix(trimmed, 16) else {
                tracing::debug!(
                    contract = %entry.contract_address,
                    balance = %balance_hex,
                    "Skipping unparseable discovered balance"
                );
                continue;
            };
            if raw.is_zero() {
                continue;
            }
            out.push(DiscoveredToken {
                contract: entry.contract_address,
                raw_balance: raw,
            });
        }

        Ok(out)
    }
}
