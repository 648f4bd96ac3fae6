//! Transfer detection over a block-height range.
//!
//! Two passes per range: block transactions for native transfers, then one
//! filtered log query for the token standards. Classification is a tagged
//! decoder against each known signature's fixed layout; an entry that does
//! not decode is skipped and logged, never fatal to the cycle.

use crate::constants::topics;
use crate::error::WatchResult;
use crate::ledger::{LedgerClient, RawLog};
use crate::registry::RegistrySnapshot;
use alloy_primitives::{Address, B256, U256};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::str::FromStr;
use std::sync::Arc;

/// A classified transfer touching at least one watched address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub block_number: u64,
    pub tx_hash: B256,
    pub from: Address,
    pub to: Address,
    pub kind: TransferKind,
}

/// The transfer variants we classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    /// Base-currency movement carried directly on a transaction.
    Native { value: U256 },
    /// ERC-20 Transfer log.
    Fungible { contract: Address, amount: U256 },
    /// ERC-721 Transfer or ERC-1155 TransferSingle log.
    NonFungibleSingle {
        contract: Address,
        token_id: U256,
        amount: U256,
    },
    /// ERC-1155 TransferBatch log; carries the full id/quantity list from
    /// one log entry and is never split into multiple events.
    NonFungibleBatch {
        contract: Address,
        ids: Vec<U256>,
        amounts: Vec<U256>,
    },
}

impl TransferEvent {
    /// Sort key: block ascending, native transactions before logs within a
    /// block, then in-source position.
    fn sort_key(&self, index: u64) -> (u64, u8, u64) {
        let rank = match self.kind {
            TransferKind::Native { .. } => 0,
            _ => 1,
        };
        (self.block_number, rank, index)
    }
}

/// Builds classified transfer events from a height range and a registry
/// snapshot.
pub struct TransferDetector {
    client: Arc<dyn LedgerClient>,
    max_concurrency: usize,
}

impl TransferDetector {
    pub fn new(client: Arc<dyn LedgerClient>, max_concurrency: usize) -> Self {
        Self {
            client,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Scan `[from, to]` (inclusive) and return events ordered by
    /// (block height, in-block position).
    pub async fn scan(
        &self,
        from: u64,
        to: u64,
        snapshot: &RegistrySnapshot,
    ) -> WatchResult<Vec<TransferEvent>> {
        if to < from || snapshot.is_empty() {
            return Ok(Vec::new());
        }

        // Native pass: fetch each block once, bounded fan-out, then a map
        // membership test per endpoint.
        let client = &self.client;
        let blocks: Vec<_> = stream::iter(from..=to)
            .map(|height| async move { client.block_transactions(height).await })
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        let mut keyed: Vec<((u64, u8, u64), TransferEvent)> = Vec::new();

        for txs in blocks {
            for tx in txs {
                if tx.value.is_zero() {
                    // Zero-value contract calls are not transfers.
                    continue;
                }
                let to_addr = tx.to.unwrap_or(Address::ZERO);
                if snapshot.is_watched(&tx.from) || snapshot.is_watched(&to_addr) {
                    let event = TransferEvent {
                        block_number: tx.block_number,
                        tx_hash: tx.hash,
                        from: tx.from,
                        to: to_addr,
                        kind: TransferKind::Native { value: tx.value },
                    };
                    keyed.push((event.sort_key(tx.index), event));
                }
            }
        }

        // Log pass: one filtered query over the whole range. Each log entry
        // decodes at most once, so a transfer between two watched addresses
        // yields a single event; fan-out happens at dispatch.
        let filter = transfer_topics();
        let logs = self.client.logs_in_range(from, to, &filter).await?;

        for log in logs {
            match decode_log(&log) {
                Ok(Some(event)) => {
                    if snapshot.is_watched(&event.from) || snapshot.is_watched(&event.to) {
                        let key = event.sort_key(log.log_index);
                        keyed.push((key, event));
                    }
                }
                Ok(None) => {}
                Err(reason) => {
                    tracing::warn!(
                        tx = %log.tx_hash,
                        log_index = log.log_index,
                        contract = %log.contract,
                        reason,
                        "Skipping undecodable log entry"
                    );
                }
            }
        }

        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, e)| e).collect())
    }
}

/// The topic0 filter covering every standard we decode.
pub fn transfer_topics() -> Vec<B256> {
    [topics::TRANSFER, topics::TRANSFER_SINGLE, topics::TRANSFER_BATCH]
        .iter()
        .map(|t| B256::from_str(t).expect("static topic constants are valid"))
        .collect()
}

/// Decode a raw log against the known transfer layouts.
///
/// `Ok(None)` means the log matched no layout we track (foreign topic0);
/// `Err` means it matched a signature but its shape was wrong, which the
/// caller skips and logs.
pub fn decode_log(log: &RawLog) -> Result<Option<TransferEvent>, &'static str> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let sigs = transfer_topics();

    if *topic0 == sigs[0] {
        return decode_transfer(log).map(Some);
    }
    if *topic0 == sigs[1] {
        return decode_transfer_single(log).map(Some);
    }
    if *topic0 == sigs[2] {
        return decode_transfer_batch(log).map(Some);
    }
    Ok(None)
}

fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic.as_slice()[12..])
}

/// ERC-20 and ERC-721 share topic0; the indexed-topic count tells them
/// apart (ERC-721 indexes the token id as a fourth topic).
fn decode_transfer(log: &RawLog) -> Result<TransferEvent, &'static str> {
    match log.topics.len() {
        3 => {
            if log.data.len() < 32 {
                return Err("fungible transfer data shorter than one word");
            }
            Ok(TransferEvent {
                block_number: log.block_number,
                tx_hash: log.tx_hash,
                from: topic_address(&log.topics[1]),
                to: topic_address(&log.topics[2]),
                kind: TransferKind::Fungible {
                    contract: log.contract,
                    amount: U256::from_be_slice(&log.data[..32]),
                },
            })
        }
        4 => Ok(TransferEvent {
            block_number: log.block_number,
            tx_hash: log.tx_hash,
            from: topic_address(&log.topics[1]),
            to: topic_address(&log.topics[2]),
            kind: TransferKind::NonFungibleSingle {
                contract: log.contract,
                token_id: U256::from_be_bytes(log.topics[3].0),
                amount: U256::from(1u8),
            },
        }),
        _ => Err("transfer log with unexpected topic count"),
    }
}

/// ERC-1155 TransferSingle: operator indexed, from/to indexed, (id, value)
/// in data.
fn decode_transfer_single(log: &RawLog) -> Result<TransferEvent, &'static str> {
    if log.topics.len() != 4 {
        return Err("TransferSingle with unexpected topic count");
    }
    if log.data.len() < 64 {
        return Err("TransferSingle data shorter than two words");
    }
    Ok(TransferEvent {
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        from: topic_address(&log.topics[2]),
        to: topic_address(&log.topics[3]),
        kind: TransferKind::NonFungibleSingle {
            contract: log.contract,
            token_id: U256::from_be_slice(&log.data[..32]),
            amount: U256::from_be_slice(&log.data[32..64]),
        },
    })
}

/// ERC-1155 TransferBatch: two dynamic uint256 arrays in data.
fn decode_transfer_batch(log: &RawLog) -> Result<TransferEvent, &'static str> {
    if log.topics.len() != 4 {
        return Err("TransferBatch with unexpected topic count");
    }
    let ids = decode_word_array(&log.data, 0).ok_or("TransferBatch ids array malformed")?;
    let amounts = decode_word_array(&log.data, 32).ok_or("TransferBatch values array malformed")?;
    if ids.len() != amounts.len() {
        return Err("TransferBatch id/value length mismatch");
    }
    Ok(TransferEvent {
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        from: topic_address(&log.topics[2]),
        to: topic_address(&log.topics[3]),
        kind: TransferKind::NonFungibleBatch {
            contract: log.contract,
            ids,
            amounts,
        },
    })
}

/// Read a dynamic `uint256[]` whose offset word sits at `head_pos`.
fn decode_word_array(data: &[u8], head_pos: usize) -> Option<Vec<U256>> {
    let head_end = head_pos.checked_add(32)?;
    let offset: usize = U256::from_be_slice(data.get(head_pos..head_end)?)
        .try_into()
        .ok()?;
    let len_end = offset.checked_add(32)?;
    let len: usize = U256::from_be_slice(data.get(offset..len_end)?)
        .try_into()
        .ok()?;
    // An honest length fits in the payload; reject before allocating.
    if len > data.len() / 32 {
        return None;
    }
    let mut out = Vec::with_capacity(len);
    let mut pos = len_end;
    for _ in 0..len {
        let end = pos.checked_add(32)?;
        out.push(U256::from_be_slice(data.get(pos..end)?));
        pos = end;
    }
    Some(out)
}
