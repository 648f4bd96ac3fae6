//! Error types for the watcher.
//!
//! Upstream failures fall into two buckets the scheduler cares about:
//! `Transient` (retry with backoff, then abort the cycle without advancing
//! the cursor) and `Fatal` (abort the cycle immediately). `Config` errors
//! surface straight to the caller and are never retried.

use thiserror::Error;

/// Application-level errors
#[derive(Error, Debug)]
pub enum WatchError {
    /// Recoverable upstream failure: network timeout, rate limit,
    /// temporary node unavailability. Retried with backoff.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Unrecoverable failure for this cycle: malformed response shape,
    /// unsupported chain data. Never retried within the cycle.
    #[error("fatal upstream error: {0}")]
    Fatal(String),

    /// Invalid input supplied by a caller (bad address, bad contract).
    /// Surfaced immediately, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl WatchError {
    /// Whether the scheduler should retry this error with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, WatchError::Transient(_))
    }

    /// Classify a reqwest failure. Timeouts and connection-level failures
    /// are retryable; body/decode failures mean the upstream answered with
    /// something we do not understand.
    pub fn from_http(context: &str, e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            if status.as_u16() == 429 || status.is_server_error() {
                return WatchError::Transient(format!("{context}: HTTP {status}"));
            }
            return WatchError::Fatal(format!("{context}: HTTP {status}"));
        }
        if e.is_timeout() || e.is_connect() {
            WatchError::Transient(format!("{context}: {e}"))
        } else {
            WatchError::Fatal(format!("{context}: {e}"))
        }
    }

    /// Classify a JSON-RPC error object by its code.
    pub fn from_rpc_code(context: &str, code: i64, message: &str) -> Self {
        // -32005 is the conventional "limit exceeded" code; -32000..-32003
        // are used by major providers for throttling and missing data.
        match code {
            -32005 | -32003..=-32000 => {
                WatchError::Transient(format!("{context}: rpc {code}: {message}"))
            }
            _ => WatchError::Fatal(format!("{context}: rpc {code}: {message}")),
        }
    }
}

/// Result type alias for convenience
pub type WatchResult<T> = Result<T, WatchError>;
