//! # Rate Limiter Module
//!
//! Throttling for outbound calls to the completion service.
//!
//! - **Per-user sliding window**: each user owns a queue of request instants.
//!   Expired instants are evicted before every check; a full window rejects the
//!   call with the delay until its oldest entry expires. A successful check
//!   reserves a slot up front, and a failed call gives the slot back.
//! - **Global concurrency cap**: a semaphore bounds the number of in-flight
//!   calls across all users.
//! - **Menu cooldown**: a coarse one-request-per-period gate evaluated against
//!   a persisted timestamp so it survives restarts.
//!
//! Locks are taken in a fixed order: the user's window (reserve, then
//! released), the global semaphore, the call itself, then the user's window
//! again only if the reservation has to be rolled back.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::errors::NutritionError;

/// The caller has to wait before the next request is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limit exceeded, retry after {retry_after_secs}s")]
pub struct RateLimitExceeded {
    pub retry_after_secs: u64,
}

type Window = Arc<AsyncMutex<VecDeque<Instant>>>;

/// Sliding-window plus concurrency limiter, constructed once and shared by handle
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<i64, Window>>,
    permits: Semaphore,
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    millis.div_ceil(1000).max(1)
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            permits,
        }
    }

    /// Window for the user, created on first use
    fn user_window(&self, user_id: i64) -> Window {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        windows
            .entry(user_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(VecDeque::new())))
            .clone()
    }

    /// Reserve a slot for the user at the current instant
    pub async fn reserve(&self, user_id: i64) -> Result<Instant, RateLimitExceeded> {
        self.reserve_at(user_id, Instant::now()).await
    }

    /// Reserve a slot for the user as if the request arrived at `now`
    pub async fn reserve_at(&self, user_id: i64, now: Instant) -> Result<Instant, RateLimitExceeded> {
        let window = self.user_window(user_id);
        let mut queue = window.lock().await;

        while let Some(oldest) = queue.front() {
            if now.saturating_duration_since(*oldest) >= self.config.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= self.config.max_requests {
            let oldest = queue.front().copied().unwrap_or(now);
            let remaining = self
                .config
                .window
                .saturating_sub(now.saturating_duration_since(oldest));
            let retry_after_secs = ceil_secs(remaining);
            debug!(user_id, retry_after_secs, "User rate-limited");
            return Err(RateLimitExceeded { retry_after_secs });
        }

        queue.push_back(now);
        debug!(user_id, count = queue.len(), "Reserved request slot");
        Ok(now)
    }

    /// Give back a slot previously returned by `reserve`
    pub async fn rollback(&self, user_id: i64, reserved: Instant) {
        let window = self.user_window(user_id);
        let mut queue = window.lock().await;
        if let Some(index) = queue.iter().rposition(|instant| *instant == reserved) {
            queue.remove(index);
            debug!(user_id, "Rolled back reserved request slot");
        }
    }

    /// Number of reservations currently held for the user (expired ones included
    /// until the next check evicts them)
    pub async fn reserved_count(&self, user_id: i64) -> usize {
        let window = self.user_window(user_id);
        let queue = window.lock().await;
        queue.len()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `operation` under the per-user window and the global cap.
    ///
    /// A failing or timed-out operation does not consume the user's quota.
    pub async fn call<T, F, Fut>(&self, user_id: i64, operation: F) -> Result<T, NutritionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NutritionError>>,
    {
        let reserved = self.reserve(user_id).await?;

        let result = match self.permits.acquire().await {
            Ok(_permit) => {
                debug!(user_id, "Acquired global request permit");
                match tokio::time::timeout(self.config.call_timeout, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(NutritionError::Timeout(self.config.call_timeout.as_secs())),
                }
            }
            Err(_) => Err(NutritionError::Network("request limiter is closed".to_string())),
        };

        if let Err(e) = &result {
            warn!(user_id, error = %e, "Rate-limited call failed, releasing reservation");
            self.rollback(user_id, reserved).await;
        }

        result
    }
}

/// One generation per user per cooldown period, judged from a persisted timestamp
#[derive(Debug, Clone, Copy)]
pub struct MenuCooldown {
    period: chrono::Duration,
}

impl MenuCooldown {
    pub fn new(hours: i64) -> Self {
        Self {
            period: chrono::Duration::hours(hours),
        }
    }

    /// Fails when the last successful request is still inside the cooldown
    pub fn check(
        &self,
        last_request: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitExceeded> {
        let Some(last) = last_request else {
            return Ok(());
        };

        let elapsed = now.signed_duration_since(last);
        if elapsed < self.period {
            let remaining = (self.period - elapsed).num_seconds().max(1) as u64;
            return Err(RateLimitExceeded {
                retry_after_secs: remaining,
            });
        }
        Ok(())
    }
}
