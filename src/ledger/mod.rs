//! Thin abstraction over the remote ledger.
//!
//! The trait is the seam mocked by tests; `HttpLedgerClient` is the JSON-RPC
//! implementation used in production. Every call carries a deliberate
//! timeout and classifies failures as `Transient` or `Fatal`.

pub mod rpc;

pub use rpc::HttpLedgerClient;

use crate::error::WatchResult;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

/// A transaction as carried in a block, reduced to the fields the detector
/// needs for native-transfer classification.
#[derive(Debug, Clone)]
pub struct RawTransaction {
    pub hash: B256,
    pub from: Address,
    /// None for contract creation
    pub to: Option<Address>,
    pub value: U256,
    pub block_number: u64,
    /// Position within the block
    pub index: u64,
}

/// An event-log entry matching one of the transfer topic filters.
#[derive(Debug, Clone)]
pub struct RawLog {
    /// Emitting contract
    pub contract: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

/// symbol/decimals read from a token contract.
#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

/// Contract over the remote data source.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current chain height.
    async fn current_height(&self) -> WatchResult<u64>;

    /// All transactions in the block at `height`.
    async fn block_transactions(&self, height: u64) -> WatchResult<Vec<RawTransaction>>;

    /// Log entries in `[from, to]` whose topic0 matches any of `topics`.
    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        topics: &[B256],
    ) -> WatchResult<Vec<RawLog>>;

    /// Native balance in the smallest unit (wei).
    async fn native_balance(&self, address: Address) -> WatchResult<U256>;

    /// ERC-20 `balanceOf(address)` on `contract`.
    async fn token_balance(&self, contract: Address, address: Address) -> WatchResult<U256>;

    /// ERC-20 `symbol()`/`decimals()`; best-effort defaults for contracts
    /// that do not implement the optional interface.
    async fn token_metadata(&self, contract: Address) -> WatchResult<TokenMetadata>;
}
