//! Cursor store: the last fully-dispatched block height.
//!
//! The scheduler is the only writer. `commit` must be durable before the
//! next cycle reads it; a crash between dispatch and commit re-dispatches
//! the same range on restart, which is the accepted at-least-once bound.

use crate::db::{self, DbPool};
use crate::error::WatchResult;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Injected read/commit contract for the scan cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last committed height, `None` if never committed.
    async fn read(&self) -> WatchResult<Option<u64>>;

    /// Durably record `height` as fully dispatched. Called only after every
    /// event in `[previous + 1, height]` was handed to the dispatcher.
    async fn commit(&self, height: u64) -> WatchResult<()>;
}

/// SQLite-backed cursor, co-located with the wallet store.
pub struct SqliteCursorStore {
    pool: DbPool,
}

impl SqliteCursorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn read(&self) -> WatchResult<Option<u64>> {
        db::read_cursor(&self.pool).await
    }

    async fn commit(&self, height: u64) -> WatchResult<()> {
        db::commit_cursor(&self.pool, height).await
    }
}

/// In-memory cursor for tests and dry runs.
#[derive(Default)]
pub struct MemoryCursorStore {
    height: Mutex<Option<u64>>,
}

impl MemoryCursorStore {
    pub fn new(initial: Option<u64>) -> Self {
        Self {
            height: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(&self) -> WatchResult<Option<u64>> {
        Ok(*self.height.lock())
    }

    async fn commit(&self, height: u64) -> WatchResult<()> {
        *self.height.lock() = Some(height);
        Ok(())
    }
}
