//! Notification rendering and fan-out.
//!
//! Turns a transfer event or balance snapshot into user-facing text and
//! hands it to the transport, one message per affected user. Delivery is
//! fire-and-forget: transport failures are logged, never retried here, and
//! never fail the cycle.

use crate::aggregator::BalanceSnapshot;
use crate::detector::{TransferEvent, TransferKind};
use crate::error::WatchResult;
use crate::ledger::{LedgerClient, TokenMetadata};
use crate::registry::{Owner, RegistrySnapshot};
use crate::utils::{format_amount, format_units, short_address, short_hash, wei_to_eth};
use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Outbound message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `text` to `user_id`. Best-effort; the dispatcher only logs
    /// failures.
    async fn send(&self, user_id: i64, text: &str) -> anyhow::Result<()>;
}

/// Telegram Bot API transport.
pub struct TelegramTransport {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { bot_token, client })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, user_id: i64, text: &str) -> anyhow::Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let payload = serde_json::json!({
            "chat_id": user_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error: {} - {}", status, body);
        }
        Ok(())
    }
}

/// Transport that only logs; used when no chat transport is configured.
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, user_id: i64, text: &str) -> anyhow::Result<()> {
        tracing::info!(user_id, message = text, "Notification (log transport)");
        Ok(())
    }
}

/// Cached token metadata, stamped for expiry.
struct MetadataEntry {
    meta: TokenMetadata,
    fetched_at: DateTime<Utc>,
}

/// Renders events and snapshots, fans out one message per affected user.
pub struct NotificationDispatcher {
    transport: Arc<dyn Transport>,
    ledger: Arc<dyn LedgerClient>,
    /// symbol/decimals cache so a busy token is fetched once per TTL window;
    /// expiry also picks up the rare symbol change and keeps the map from
    /// accumulating one-off contracts forever
    metadata: Mutex<HashMap<Address, MetadataEntry>>,
    metadata_ttl: chrono::Duration,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn Transport>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            transport,
            ledger,
            metadata: Mutex::new(HashMap::new()),
            metadata_ttl: chrono::Duration::hours(1),
        }
    }

    /// Dispatch every event to the owners of each watched endpoint. A
    /// transfer between two watched addresses fans out to both owner sets,
    /// each side worded for its own address.
    pub async fn dispatch_transfers(
        &self,
        events: &[TransferEvent],
        snapshot: &RegistrySnapshot,
    ) -> WatchResult<()> {
        for event in events {
            let meta = self.metadata_for(event).await;

            let mut endpoints: Vec<(Address, Direction)> = Vec::with_capacity(2);
            if snapshot.is_watched(&event.from) {
                endpoints.push((event.from, Direction::Sent));
            }
            if event.to != event.from && snapshot.is_watched(&event.to) {
                endpoints.push((event.to, Direction::Received));
            }

            for (address, direction) in endpoints {
                let Some(owners) = snapshot.owners_of(&address) else {
                    continue;
                };
                for owner in owners {
                    let text = render_transfer(event, owner, direction, meta.as_ref());
                    if let Err(e) = self.transport.send(owner.user_id, &text).await {
                        tracing::warn!(
                            user_id = owner.user_id,
                            tx = %event.tx_hash,
                            error = %e,
                            "Notification delivery failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Send a rendered balance summary to one user.
    pub async fn dispatch_balance(&self, user_id: i64, snapshot: &BalanceSnapshot) {
        let text = render_balance(snapshot);
        if let Err(e) = self.transport.send(user_id, &text).await {
            tracing::warn!(user_id, error = %e, "Balance notification delivery failed");
        }
    }

    /// Token metadata for display, cached; a fetch failure falls back to
    /// generic metadata rather than blocking the notification.
    async fn metadata_for(&self, event: &TransferEvent) -> Option<TokenMetadata> {
        let contract = match &event.kind {
            TransferKind::Native { .. } => return None,
            TransferKind::Fungible { contract, .. }
            | TransferKind::NonFungibleSingle { contract, .. }
            | TransferKind::NonFungibleBatch { contract, .. } => *contract,
        };

        if let Some(entry) = self.metadata.lock().get(&contract) {
            let age = Utc::now().signed_duration_since(entry.fetched_at);
            if age <= self.metadata_ttl {
                return Some(entry.meta.clone());
            }
        }

        let meta = match self.ledger.token_metadata(contract).await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(contract = %contract, error = %e, "Metadata fetch failed, using defaults");
                TokenMetadata {
                    symbol: short_address(&contract),
                    decimals: 18,
                }
            }
        };
        self.metadata.lock().insert(
            contract,
            MetadataEntry { meta: meta.clone(), fetched_at: Utc::now() },
        );
        Some(meta)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }

    fn emoji(self) -> &'static str {
        match self {
            Direction::Sent => "📤",
            Direction::Received => "📥",
        }
    }
}

/// Labels and symbols are free text; keep them from breaking the HTML
/// parse mode.
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Render one event for one owner, worded for that owner's address.
pub fn render_transfer(
    event: &TransferEvent,
    owner: &Owner,
    direction: Direction,
    meta: Option<&TokenMetadata>,
) -> String {
    let counterparty = match direction {
        Direction::Sent => format!("to {}", short_address(&event.to)),
        Direction::Received => format!("from {}", short_address(&event.from)),
    };

    let what = match &event.kind {
        TransferKind::Native { value } => {
            format!("{} ETH", format_amount(wei_to_eth(*value)))
        }
        TransferKind::Fungible { amount, contract } => {
            let (symbol, decimals) = meta
                .map(|m| (escape_html(&m.symbol), m.decimals))
                .unwrap_or_else(|| (short_address(contract), 18));
            format!("{} {}", format_amount(format_units(*amount, decimals)), symbol)
        }
        TransferKind::NonFungibleSingle { token_id, amount, contract } => {
            let symbol = meta
                .map(|m| escape_html(&m.symbol))
                .unwrap_or_else(|| short_address(contract));
            if *amount > alloy_primitives::U256::from(1u8) {
                format!("{amount}x {symbol} #{token_id}")
            } else {
                format!("{symbol} #{token_id}")
            }
        }
        TransferKind::NonFungibleBatch { ids, contract, .. } => {
            let symbol = meta
                .map(|m| escape_html(&m.symbol))
                .unwrap_or_else(|| short_address(contract));
            format!("{} {} items (batch)", ids.len(), symbol)
        }
    };

    format!(
        "{} <b>{}</b> {} {} {}\nBlock {} | {}",
        direction.emoji(),
        escape_html(&owner.label),
        direction.verb(),
        what,
        counterparty,
        event.block_number,
        short_hash(&event.tx_hash),
    )
}

/// Render a portfolio snapshot.
pub fn render_balance(snapshot: &BalanceSnapshot) -> String {
    let mut text = format!(
        "💰 <b>Balance for {}</b>\nETH: {}\n",
        short_address(&snapshot.address),
        format_amount(snapshot.native_eth),
    );

    if snapshot.tokens.is_empty() {
        text.push_str("No token holdings found\n");
    } else {
        text.push_str(&format!("Tokens: {}\n", snapshot.tokens.len()));
        for token in &snapshot.tokens {
            match token.value_eth {
                Some(value) => text.push_str(&format!(
                    "• {}: {} (~{} ETH)\n",
                    escape_html(&token.symbol),
                    format_amount(token.amount),
                    format_amount(value),
                )),
                None => text.push_str(&format!(
                    "• {}: {} (value unknown)\n",
                    escape_html(&token.symbol),
                    format_amount(token.amount),
                )),
            }
        }
    }

    text.push_str(&format!(
        "<b>Total: {} ETH</b>",
        format_amount(snapshot.total_eth)
    ));
    text
}
