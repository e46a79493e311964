use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::{num::NonZeroU32, time::Duration};

use crate::modules::auth::interface::AuthError;

/// Attempt counter shared by the login, 2FA and recovery endpoints.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Counts one attempt against `key`. `Ok(false)` once the key is over its limit.
    async fn hit(&self, key: &str) -> Result<bool, AuthError>;
}

/// Counts an attempt and rejects it when over the limit. A broken backend lets
/// the request through.
pub async fn enforce(store: &dyn RateLimitStore, key: &str) -> Result<(), AuthError> {
    match store.hit(key).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!(key, "rate limit exceeded");
            Err(AuthError::RateLimited)
        }
        Err(e) => {
            tracing::warn!(key, error = %e, "rate limit backend unavailable, allowing request");
            Ok(())
        }
    }
}

// =============================================================================
// IN-MEMORY (single instance only)
// =============================================================================

pub struct InMemoryRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl InMemoryRateLimiter {
    /// Allows a burst of `max_attempts` per key, refilled evenly over `window`.
    pub fn new(max_attempts: u32, window: Duration) -> Result<Self, AuthError> {
        let burst = NonZeroU32::new(max_attempts)
            .ok_or_else(|| AuthError::Internal("rate limit must allow at least one attempt".into()))?;
        let quota = Quota::with_period(window / max_attempts)
            .ok_or_else(|| AuthError::Internal("rate limit window must be non-zero".into()))?
            .allow_burst(burst);

        Ok(Self {
            limiter: RateLimiter::keyed(quota),
        })
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimiter {
    async fn hit(&self, key: &str) -> Result<bool, AuthError> {
        Ok(self.limiter.check_key(&key.to_string()).is_ok())
    }
}

// =============================================================================
// REDIS (shared across instances)
// =============================================================================

/// Fixed-window counter: the first hit creates the key with a TTL, every hit
/// increments it.
pub struct RedisRateLimiter {
    client: redis::Client,
    max_attempts: u64,
    window_secs: u64,
}

impl RedisRateLimiter {
    pub fn new(url: &str, max_attempts: u32, window: Duration) -> Result<Self, AuthError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            max_attempts: u64::from(max_attempts),
            window_secs: window.as_secs().max(1),
        })
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimiter {
    async fn hit(&self, key: &str) -> Result<bool, AuthError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("ratelimit:{}", key);

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(0)
            .arg("NX")
            .arg("EX")
            .arg(self.window_secs)
            .ignore()
            .cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        Ok(count <= self.max_attempts)
    }
}
