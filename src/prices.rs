//! Price oracle with a TTL cache.
//!
//! Prices token contracts into the native unit (ETH). Lookups hit an
//! in-memory cache first; misses go to the CoinGecko simple-price API for
//! contracts we have an asset id for. A missing or failed price is
//! `None` — the aggregator lists the holding anyway with value unknown.

use crate::config::PriceConfig;
use crate::constants::{COINGECKO_IDS, WETH};
use crate::error::{WatchError, WatchResult};
use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::str::FromStr;

/// Unit price of a token contract in ETH, or `Unknown` when the oracle has
/// no quote.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price_in_eth(&self, contract: Address) -> WatchResult<Option<f64>>;
}

/// Cached price entry
#[derive(Debug, Clone)]
struct PriceEntry {
    price_eth: Option<f64>,
    fetched_at: DateTime<Utc>,
}

/// CoinGecko-backed oracle.
pub struct CoinGeckoOracle {
    client: reqwest::Client,
    base_url: String,
    ttl: Duration,
    cache: RwLock<HashMap<Address, PriceEntry>>,
    ids: HashMap<Address, &'static str>,
    weth: Address,
}

impl CoinGeckoOracle {
    pub fn new(config: &PriceConfig) -> WatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| WatchError::Config(format!("failed to build HTTP client: {e}")))?;

        let ids = COINGECKO_IDS
            .iter()
            .filter_map(|(addr, id)| Address::from_str(addr).ok().map(|a| (a, *id)))
            .collect();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ttl: Duration::seconds(config.cache_ttl_secs),
            cache: RwLock::new(HashMap::new()),
            ids,
            weth: Address::from_str(WETH).expect("WETH constant is a valid address"),
        })
    }

    fn cached(&self, contract: &Address) -> Option<PriceEntry> {
        let cache = self.cache.read();
        let entry = cache.get(contract)?;
        let age = Utc::now().signed_duration_since(entry.fetched_at);
        if age > self.ttl {
            return None;
        }
        Some(entry.clone())
    }

    fn store(&self, contract: Address, price_eth: Option<f64>) {
        self.cache.write().insert(
            contract,
            PriceEntry {
                price_eth,
                fetched_at: Utc::now(),
            },
        );
    }

    async fn fetch(&self, asset_id: &str) -> WatchResult<Option<f64>> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=eth",
            self.base_url, asset_id
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WatchError::from_http("price lookup", e))?;

        if !response.status().is_success() {
            // Price coverage loss is not worth failing an aggregation over.
            tracing::warn!(asset = asset_id, status = %response.status(), "Price lookup failed");
            return Ok(None);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WatchError::Fatal(format!("price lookup: bad body: {e}")))?;

        Ok(body
            .get(asset_id)
            .and_then(|v| v.get("eth"))
            .and_then(|v| v.as_f64()))
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoOracle {
    async fn price_in_eth(&self, contract: Address) -> WatchResult<Option<f64>> {
        // Wrapped ether prices 1:1 by identity.
        if contract == self.weth {
            return Ok(Some(1.0));
        }

        if let Some(entry) = self.cached(&contract) {
            return Ok(entry.price_eth);
        }

        let Some(asset_id) = self.ids.get(&contract) else {
            self.store(contract, None);
            return Ok(None);
        };

        let price = match self.fetch(asset_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(contract = %contract, error = %e, "Price oracle error, reporting unknown");
                None
            }
        };

        self.store(contract, price);
        Ok(price)
    }
}
