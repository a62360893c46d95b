// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: retry logic, backoff, rate limiting, bulkheads.
//!
//! - [`RetryConfig`] + [`retry_with_backoff`]: the store client's transport
//!   retry policy (the engine itself never retries a failed batch)
//! - [`RateLimiter`]: optional token bucket on bulk requests to the target
//! - [`Bulkhead`]: semaphore-backed worker pools (collection pool, document
//!   pool, process-wide in-flight bulk ceiling)
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), index_replicator::resilience::BulkheadFull> {
//! use index_replicator::resilience::{RateLimiter, Bulkhead, RateLimitConfig};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::per_second(200));
//! limiter.acquire().await;
//!
//! let document_pool = Bulkhead::new(100);
//! let _slot = document_pool.acquire().await?;
//! // slot dropped = worker released
//! # Ok(())
//! # }
//! ```

use crate::error::{ReplicationError, Result};
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Retry policy for requests against a cluster.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: usize,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual request.
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// Policy for a store client: `max_retries` retries after the first attempt.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Retry  Delay
    /// -----  -----
    /// 1      500ms
    /// 2      1s
    /// 3      2s
    /// ...    capped at 30s
    /// ```
    pub fn for_store(max_retries: usize, request_timeout: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            request_timeout,
            ..Self::default()
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            request_timeout: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let delay = Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()));

        std::cmp::min(delay, self.max_delay)
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                crate::metrics::record_store_retry(operation);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Configuration for rate limiting.
///
/// Token bucket: tokens refill at `refill_rate` per second, up to
/// `burst_size` tokens. Each bulk request consumes one token.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl RateLimitConfig {
    /// Limit bulk requests to `per_sec`, allowing a burst of the same size.
    pub fn per_second(per_sec: u32) -> Self {
        Self {
            burst_size: per_sec.max(1),
            refill_rate: per_sec.max(1),
        }
    }
}

/// Token bucket rate limiter shared by every loader of a pass.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: GovLimiter::direct(quota),
        }
    }

    /// Wait for a bulk-request token. Cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

// =============================================================================
// Bulkhead (Concurrency Limiter)
// =============================================================================

/// Error when the bulkhead semaphore has been closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead full: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

impl From<BulkheadFull> for ReplicationError {
    fn from(e: BulkheadFull) -> Self {
        ReplicationError::Internal(e.to_string())
    }
}

/// Bounded worker pool slot allocator.
///
/// Permits are acquired *before* a task is spawned, so a full pool applies
/// backpressure to the producer instead of growing an unbounded queue.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit (at least 1).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if necessary.
    ///
    /// Returns a permit that releases the slot when dropped.
    pub async fn acquire(&self) -> std::result::Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
