//! On-demand balance aggregation.
//!
//! Fetches the native balance, discovers fungible-token holdings (enhanced
//! indexer first, curated list as the floor), prices each holding into ETH
//! and returns an ordered portfolio snapshot. A token whose price is
//! unknown stays in the listing with value unknown; it is excluded only
//! from the priced total.

use crate::constants::{CuratedToken, CURATED_TOKENS};
use crate::discovery::AlchemyDiscovery;
use crate::error::WatchResult;
use crate::ledger::LedgerClient;
use crate::prices::PriceOracle;
use crate::utils::{format_units, wei_to_eth};
use alloy_primitives::{Address, U256};
use futures_util::stream::{self, StreamExt};
use std::str::FromStr;
use std::sync::Arc;

/// One token position inside a snapshot.
#[derive(Debug, Clone)]
pub struct TokenHolding {
    pub contract: Address,
    pub symbol: String,
    pub decimals: u8,
    pub raw: U256,
    /// Raw scaled by decimals, for display
    pub amount: f64,
    /// Position value in ETH; `None` when the oracle has no quote
    pub value_eth: Option<f64>,
}

/// Ephemeral portfolio valuation for one address.
#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub address: Address,
    pub native_raw: U256,
    pub native_eth: f64,
    /// Sorted by descending priced value; unpriced holdings last
    pub tokens: Vec<TokenHolding>,
    /// Native value plus every priced token value
    pub total_eth: f64,
}

/// Computes portfolio snapshots on demand, independent of the poll cycle.
pub struct BalanceAggregator {
    client: Arc<dyn LedgerClient>,
    oracle: Arc<dyn PriceOracle>,
    discovery: Option<Arc<AlchemyDiscovery>>,
    max_concurrency: usize,
}

impl BalanceAggregator {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        oracle: Arc<dyn PriceOracle>,
        discovery: Option<Arc<AlchemyDiscovery>>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            client,
            oracle,
            discovery,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Aggregate balances for `address`. When `contract` is given the query
    /// is restricted to that single token (still listed at zero, since the
    /// caller asked about it explicitly).
    pub async fn get_balance(
        &self,
        address: Address,
        contract: Option<Address>,
    ) -> WatchResult<BalanceSnapshot> {
        let native_raw = self.client.native_balance(address).await?;
        let native_eth = wei_to_eth(native_raw);

        let mut tokens = match contract {
            Some(c) => self.probe_single(address, c).await?,
            None => self.discover_holdings(address).await?,
        };

        for holding in &mut tokens {
            holding.value_eth = match self.oracle.price_in_eth(holding.contract).await {
                Ok(Some(price)) => Some(holding.amount * price),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(contract = %holding.contract, error = %e, "Price lookup failed");
                    None
                }
            };
        }

        // Descending priced value for presentation; unknown values sink.
        tokens.sort_by(|a, b| {
            b.value_eth
                .unwrap_or(f64::MIN)
                .partial_cmp(&a.value_eth.unwrap_or(f64::MIN))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total_eth = native_eth
            + tokens
                .iter()
                .filter_map(|t| t.value_eth)
                .sum::<f64>();

        Ok(BalanceSnapshot {
            address,
            native_raw,
            native_eth,
            tokens,
            total_eth,
        })
    }

    /// Restricted query: one contract, listed even at zero.
    async fn probe_single(
        &self,
        address: Address,
        contract: Address,
    ) -> WatchResult<Vec<TokenHolding>> {
        let raw = self.client.token_balance(contract, address).await?;
        let meta = self.client.token_metadata(contract).await?;
        Ok(vec![TokenHolding {
            contract,
            symbol: meta.symbol,
            decimals: meta.decimals,
            amount: format_units(raw, meta.decimals),
            raw,
            value_eth: None,
        }])
    }

    /// Unrestricted query: enhanced discovery when available, curated-list
    /// probes as the floor. Discovery failure degrades, never fails.
    async fn discover_holdings(&self, address: Address) -> WatchResult<Vec<TokenHolding>> {
        if let Some(discovery) = &self.discovery {
            match discovery.token_balances(address).await {
                Ok(found) => {
                    tracing::debug!(count = found.len(), "Enhanced discovery returned holdings");
                    return self.enrich_discovered(found).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Enhanced discovery failed, falling back to curated list");
                }
            }
        }
        self.probe_curated(address).await
    }

    /// Attach symbol/decimals to indexer results. Per-token metadata
    /// failures drop that token, not the scan.
    async fn enrich_discovered(
        &self,
        found: Vec<crate::discovery::DiscoveredToken>,
    ) -> WatchResult<Vec<TokenHolding>> {
        let client = &self.client;
        let holdings: Vec<Option<TokenHolding>> = stream::iter(found)
            .map(|token| async move {
                match client.token_metadata(token.contract).await {
                    Ok(meta) => Some(TokenHolding {
                        contract: token.contract,
                        symbol: meta.symbol,
                        decimals: meta.decimals,
                        amount: format_units(token.raw_balance, meta.decimals),
                        raw: token.raw_balance,
                        value_eth: None,
                    }),
                    Err(e) => {
                        tracing::warn!(contract = %token.contract, error = %e, "Token metadata fetch failed");
                        None
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        Ok(holdings.into_iter().flatten().collect())
    }

    /// Probe the curated contracts, bounded fan-out, keep nonzero balances.
    async fn probe_curated(&self, address: Address) -> WatchResult<Vec<TokenHolding>> {
        let client = &self.client;
        let holdings: Vec<Option<TokenHolding>> = stream::iter(CURATED_TOKENS.iter().copied())
            .map(|token: CuratedToken| async move {
                let contract = Address::from_str(token.contract).ok()?;
                match client.token_balance(contract, address).await {
                    Ok(raw) if !raw.is_zero() => Some(TokenHolding {
                        contract,
                        symbol: token.symbol.to_string(),
                        decimals: token.decimals,
                        amount: format_units(raw, token.decimals),
                        raw,
                        value_eth: None,
                    }),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(symbol = token.symbol, error = %e, "Token probe failed");
                        None
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        Ok(holdings.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;
    use crate::ledger::{RawLog, RawTransaction, TokenMetadata};
    use alloy_primitives::B256;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MockLedger {
        native: U256,
        token_balances: HashMap<Address, U256>,
        metadata: HashMap<Address, TokenMetadata>,
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        async fn current_height(&self) -> WatchResult<u64> {
            Ok(0)
        }

        async fn block_transactions(&self, _height: u64) -> WatchResult<Vec<RawTransaction>> {
            Ok(vec![])
        }

        async fn logs_in_range(
            &self,
            _from: u64,
            _to: u64,
            _topics: &[B256],
        ) -> WatchResult<Vec<RawLog>> {
            Ok(vec![])
        }

        async fn native_balance(&self, _address: Address) -> WatchResult<U256> {
            Ok(self.native)
        }

        async fn token_balance(&self, contract: Address, _address: Address) -> WatchResult<U256> {
            Ok(self
                .token_balances
                .get(&contract)
                .copied()
                .unwrap_or(U256::ZERO))
        }

        async fn token_metadata(&self, contract: Address) -> WatchResult<TokenMetadata> {
            self.metadata
                .get(&contract)
                .cloned()
                .ok_or_else(|| WatchError::Fatal("no metadata".into()))
        }
    }

    struct FixedOracle {
        prices: HashMap<Address, f64>,
    }

    #[async_trait]
    impl PriceOracle for FixedOracle {
        async fn price_in_eth(&self, contract: Address) -> WatchResult<Option<f64>> {
            Ok(self.prices.get(&contract).copied())
        }
    }

    fn usdt() -> Address {
        Address::from_str("0xdAC17F958D2ee523a2206206994597C13D831ec7").unwrap()
    }

    fn link() -> Address {
        Address::from_str("0x514910771AF9Ca656af840dff83E8264EcF986CA").unwrap()
    }

    fn aggregator(ledger: MockLedger, prices: HashMap<Address, f64>) -> BalanceAggregator {
        BalanceAggregator::new(
            Arc::new(ledger),
            Arc::new(FixedOracle { prices }),
            None,
            4,
        )
    }

    #[tokio::test]
    async fn empty_address_totals_zero() {
        let agg = aggregator(
            MockLedger {
                native: U256::ZERO,
                token_balances: HashMap::new(),
                metadata: HashMap::new(),
            },
            HashMap::new(),
        );

        let snapshot = agg.get_balance(Address::repeat_byte(1), None).await.unwrap();
        assert_eq!(snapshot.native_eth, 0.0);
        assert_eq!(snapshot.total_eth, 0.0);
        assert!(snapshot.tokens.is_empty());
    }

    #[tokio::test]
    async fn priced_tokens_sort_descending_and_total() {
        // 1 ETH native, 2000 USDT @ 0.0005, 10 LINK @ 0.01
        let agg = aggregator(
            MockLedger {
                native: U256::from(10u64).pow(U256::from(18u64)),
                token_balances: HashMap::from([
                    (usdt(), U256::from(2_000_000_000u64)),
                    (link(), U256::from(10u64) * U256::from(10u64).pow(U256::from(18u64))),
                ]),
                metadata: HashMap::new(),
            },
            HashMap::from([(usdt(), 0.0005), (link(), 0.01)]),
        );

        let snapshot = agg.get_balance(Address::repeat_byte(1), None).await.unwrap();
        assert_eq!(snapshot.tokens.len(), 2);
        // USDT position (1.0 ETH) sorts above LINK (0.1 ETH)
        assert_eq!(snapshot.tokens[0].symbol, "USDT");
        assert_eq!(snapshot.tokens[0].value_eth, Some(1.0));
        assert_eq!(snapshot.tokens[1].value_eth, Some(0.1));
        assert!((snapshot.total_eth - 2.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unpriced_token_listed_but_excluded_from_total() {
        let agg = aggregator(
            MockLedger {
                native: U256::ZERO,
                token_balances: HashMap::from([(usdt(), U256::from(5_000_000u64))]),
                metadata: HashMap::new(),
            },
            HashMap::new(), // no quotes at all
        );

        let snapshot = agg.get_balance(Address::repeat_byte(1), None).await.unwrap();
        assert_eq!(snapshot.tokens.len(), 1);
        assert_eq!(snapshot.tokens[0].value_eth, None);
        assert_eq!(snapshot.tokens[0].amount, 5.0);
        assert_eq!(snapshot.total_eth, 0.0);
    }

    #[tokio::test]
    async fn restricted_query_lists_zero_balance() {
        let target = Address::repeat_byte(0x77);
        let agg = aggregator(
            MockLedger {
                native: U256::ZERO,
                token_balances: HashMap::new(),
                metadata: HashMap::from([(
                    target,
                    TokenMetadata { symbol: "XYZ".into(), decimals: 8 },
                )]),
            },
            HashMap::new(),
        );

        let snapshot = agg
            .get_balance(Address::repeat_byte(1), Some(target))
            .await
            .unwrap();
        assert_eq!(snapshot.tokens.len(), 1);
        assert_eq!(snapshot.tokens[0].symbol, "XYZ");
        assert!(snapshot.tokens[0].raw.is_zero());
    }
}
