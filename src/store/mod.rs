//! Counter and session store.
//!
//! # Data Flow
//! ```text
//! defense managers / gatekeeper
//!     → timed.rs (bound every call with a short deadline)
//!     → CounterStore implementation (memory.rs, or an external KV service)
//! ```
//!
//! # Design Decisions
//! - The store owns all lockout, throttle and CSRF state; components hold no
//!   process-wide caches and receive the store through their constructors
//! - `increment` is the only way counters change. Implementations must make it
//!   atomic together with its TTL; emulating it with get + set reintroduces the
//!   race the lockout and throttle managers exist to close
//! - Expiry is TTL-driven; nothing here knows about lockout semantics

pub mod memory;
pub mod timed;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use timed::TimedStore;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend cannot be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Operation did not complete within the configured deadline.
    #[error("store operation `{op}` timed out after {millis} ms")]
    Timeout { op: &'static str, millis: u64 },

    /// A key holds a value of the wrong shape.
    #[error("corrupt value under key `{key}`")]
    Corrupt { key: String },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store with TTLs and atomic counters.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Fetch a live value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store a value that expires after `ttl_secs`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    /// Atomically add one to a counter and return the new value.
    ///
    /// A missing or expired counter starts at zero and receives `ttl_secs`;
    /// an existing counter keeps its original expiry (fixed window).
    async fn increment(&self, key: &str, ttl_secs: u64) -> StoreResult<i64>;

    /// Whether a live value exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Seconds until the key expires, rounded up. `None` when absent.
    async fn ttl_secs(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Shared handle to a store.
pub type SharedStore = Arc<dyn CounterStore>;

/// Parse a stored integer, mapping garbage to [`StoreError::Corrupt`].
pub(crate) fn parse_u64(key: &str, value: Option<String>) -> StoreResult<Option<u64>> {
    value
        .map(|v| {
            v.parse::<u64>().map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
            })
        })
        .transpose()
}
