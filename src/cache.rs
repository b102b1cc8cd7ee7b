//! Short-lived keyed state shared by the rate limiter and webhook dedupe.
//!
//! The in-memory backend is enough for a single instance. Several instances behind a
//! load balancer need the Redis backend so counters and dedupe keys are shared.

pub mod memory;
pub mod redis_store;

use crate::error::app_error::AppError;
use std::time::Duration;

/// State of a fixed-window counter after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub expires_in: Duration,
}

#[async_trait::async_trait]
pub trait TtlCache: Send + Sync {
    /// Increments the counter at `key`, starting a new window of length `window` if the
    /// key is absent or its window has elapsed.
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, AppError>;

    /// Stores `key` for `ttl` unless it is already present. Returns true when stored.
    async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, AppError>;

    async fn remove(&self, key: &str) -> Result<(), AppError>;
}
