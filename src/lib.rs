//! Etherwatch Library
//!
//! Watches registered Ethereum addresses for native and token transfers and
//! aggregates priced balances on demand.
//! This library exposes core modules for testing.

pub mod aggregator;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod db;
pub mod detector;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod prices;
pub mod registry;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types for tests
pub use aggregator::{BalanceAggregator, BalanceSnapshot, TokenHolding};
pub use config::AppConfig;
pub use cursor::{CursorStore, MemoryCursorStore, SqliteCursorStore};
pub use db::DbPool;
pub use detector::{TransferDetector, TransferEvent, TransferKind};
pub use dispatch::{NotificationDispatcher, Transport};
pub use error::{WatchError, WatchResult};
pub use ledger::{LedgerClient, TokenMetadata};
pub use registry::{Owner, RegistrySnapshot};
pub use scheduler::{PollScheduler, SchedulerHandle};
