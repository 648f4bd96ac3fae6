//! The poll loop.
//!
//! Runs one cycle at a time: snapshot the registry, scan the confirmed
//! range, dispatch notifications, then commit the cursor. The cursor only
//! moves after dispatch, so a crash mid-cycle replays the range rather than
//! dropping it. Transient ledger errors retry with capped exponential
//! backoff; fatal errors abandon the cycle without advancing.

use crate::config::PollConfig;
use crate::cursor::CursorStore;
use crate::db::DbPool;
use crate::detector::TransferDetector;
use crate::dispatch::NotificationDispatcher;
use crate::error::{WatchError, WatchResult};
use crate::ledger::LedgerClient;
use crate::registry::RegistrySnapshot;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Handle for poking the scheduler between ticks (SIGHUP, admin commands).
#[derive(Clone)]
pub struct SchedulerHandle {
    notify: Arc<Notify>,
}

impl SchedulerHandle {
    /// Request an immediate cycle. Coalesces with an already-pending
    /// request; never interrupts a cycle in flight.
    pub fn trigger_scan(&self) {
        self.notify.notify_one();
    }
}

pub struct PollScheduler {
    ledger: Arc<dyn LedgerClient>,
    cursor: Arc<dyn CursorStore>,
    detector: TransferDetector,
    dispatcher: Arc<NotificationDispatcher>,
    pool: DbPool,
    config: PollConfig,
    notify: Arc<Notify>,
}

impl PollScheduler {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        cursor: Arc<dyn CursorStore>,
        detector: TransferDetector,
        dispatcher: Arc<NotificationDispatcher>,
        pool: DbPool,
        config: PollConfig,
    ) -> Self {
        Self {
            ledger,
            cursor,
            detector,
            dispatcher,
            pool,
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            notify: self.notify.clone(),
        }
    }

    /// Run cycles until cancelled. Cycles never overlap: the next one waits
    /// for the previous to finish, whether triggered by the interval or by
    /// the handle.
    pub async fn run(self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.interval_secs);
        tracing::info!(
            interval_secs = self.config.interval_secs,
            confirmation_lag = self.config.confirmation_lag,
            "Poll scheduler started"
        );

        loop {
            if let Err(e) = self.run_cycle(&cancel).await {
                if cancel.is_cancelled() {
                    tracing::info!("Cycle abandoned for shutdown, cursor not advanced");
                } else {
                    tracing::error!(error = %e, "Poll cycle failed, cursor not advanced");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Poll scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
                _ = self.notify.notified() => {
                    tracing::info!("Immediate scan requested");
                }
            }
        }
    }

    /// One full cycle. Returns without committing on any error, so the
    /// range is retried in full next tick. Cancellation is observed between
    /// steps and during backoff waits; in-flight ledger calls finish or
    /// time out, and a cancelled cycle never commits.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> WatchResult<()> {
        let snapshot = RegistrySnapshot::load(&self.pool).await?;

        let tip = self
            .with_retries("current_height", cancel, || self.ledger.current_height())
            .await?;
        let to = tip.saturating_sub(self.config.confirmation_lag);

        let from = match self.cursor.read().await? {
            Some(committed) => committed + 1,
            None => self.initial_height(to),
        };

        if to < from {
            tracing::debug!(from, to, "Confirmed tip has not advanced, skipping");
            return Ok(());
        }

        if snapshot.is_empty() {
            // Nothing to match against; still advance so a later
            // registration does not trigger a huge catch-up scan.
            tracing::debug!(from, to, "No watched addresses, advancing cursor");
            self.cursor.commit(to).await?;
            return Ok(());
        }

        tracing::debug!(from, to, watched = snapshot.len(), "Scanning range");
        let events = self
            .with_retries("scan", cancel, || self.detector.scan(from, to, &snapshot))
            .await?;

        // Abandoning here is safe: nothing was dispatched, the range is
        // rescanned in full on the next start.
        if cancel.is_cancelled() {
            return Ok(());
        }

        if !events.is_empty() {
            tracing::info!(from, to, count = events.len(), "Detected transfers");
            self.dispatcher.dispatch_transfers(&events, &snapshot).await?;
        }

        self.cursor.commit(to).await?;
        Ok(())
    }

    /// First-run starting height: explicit override, else a bounded window
    /// behind the confirmed tip.
    fn initial_height(&self, confirmed_tip: u64) -> u64 {
        match self.config.start_height {
            Some(h) => h,
            None => confirmed_tip.saturating_sub(self.config.bootstrap_window) + 1,
        }
    }

    /// Retry a transient-failing operation with capped exponential backoff
    /// and jitter. Fatal and config errors pass through immediately; a
    /// shutdown request interrupts the backoff wait instead of sleeping it
    /// out.
    async fn with_retries<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> WatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = WatchResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(
                        attempt,
                        self.config.backoff_base_ms,
                        self.config.backoff_max_ms,
                    );
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::info!(operation = what, "Shutdown requested, abandoning retries");
                            return Err(e);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        return Err(WatchError::Transient(format!(
                            "{what}: retries exhausted after {attempt} attempts: {e}"
                        )));
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Exponential backoff, capped, with up to 25% random jitter added.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped.saturating_add(jitter).min(max_ms.saturating_mul(2)))
}
