//! Fixed-window request limiting.
//!
//! Counting is delegated to a [`CounterStore`], which must increment a key and
//! start its expiry window in one atomic step. [`RateLimiter`] turns the count
//! into an allow/deny decision for a [`RateTier`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryCounterStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCounterStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Counter state right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits in the current window, including this one.
    pub count: u64,
    /// Time until the window closes.
    pub resets_in: Duration,
}

#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one hit to `key`. The first hit of a window sets its
    /// expiry to `window`.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError>;

    /// Read `key` without counting a hit. `None` when no window is open.
    async fn current(&self, key: &str) -> Result<Option<WindowCount>, CounterError>;
}

/// One limiter tier: at most `max` requests per `window`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTier {
    pub name: String,
    pub window: Duration,
    pub max: u64,
    pub message: String,
}

impl RateTier {
    pub fn new(name: impl Into<String>, window: Duration, max: u64, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            window,
            max,
            message: message.into(),
        }
    }

    /// Login and registration.
    pub fn auth() -> Self {
        Self::new(
            "auth",
            Duration::from_secs(15 * 60),
            30,
            "too many authentication attempts, try again later",
        )
    }

    /// Animal CRUD.
    pub fn general() -> Self {
        Self::new(
            "general",
            Duration::from_secs(5 * 60),
            100,
            "too many requests, try again later",
        )
    }

    /// Production CRUD and reports.
    pub fn sensitive() -> Self {
        Self::new(
            "sensitive",
            Duration::from_secs(10 * 60),
            50,
            "too many requests on production data, try again later",
        )
    }

    /// Retry hint in whole minutes, rounded up from the window length.
    pub fn retry_after_minutes(&self) -> u64 {
        self.window.as_secs().div_ceil(60).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub auth: RateTier,
    pub general: RateTier,
    pub sensitive: RateTier,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth: RateTier::auth(),
            general: RateTier::general(),
            sensitive: RateTier::sensitive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: u64, remaining: u64 },
    Limited {
        limit: u64,
        retry_after_minutes: u64,
        resets_in: Duration,
    },
}

/// Tier-aware limiter over an injected counter store.
#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()))
    }

    /// Count one request for `client_key` against `tier`.
    ///
    /// Keys are namespaced per tier, so the same client has independent
    /// budgets on each tier.
    pub async fn check(&self, tier: &RateTier, client_key: &str) -> Result<RateDecision, CounterError> {
        let hit = self
            .counters
            .increment(&tier_key(tier, client_key), tier.window)
            .await?;
        if hit.count > tier.max {
            return Ok(limited(tier, hit.resets_in));
        }
        Ok(RateDecision::Allowed {
            limit: tier.max,
            remaining: tier.max - hit.count,
        })
    }

    /// Decide whether one more request would be allowed, without counting it.
    pub async fn peek(&self, tier: &RateTier, client_key: &str) -> Result<RateDecision, CounterError> {
        let Some(hit) = self.counters.current(&tier_key(tier, client_key)).await? else {
            return Ok(RateDecision::Allowed {
                limit: tier.max,
                remaining: tier.max,
            });
        };
        if hit.count >= tier.max {
            return Ok(limited(tier, hit.resets_in));
        }
        Ok(RateDecision::Allowed {
            limit: tier.max,
            remaining: tier.max - hit.count,
        })
    }
}

fn tier_key(tier: &RateTier, client_key: &str) -> String {
    format!("rl:{}:{}", tier.name, client_key)
}

fn limited(tier: &RateTier, resets_in: Duration) -> RateDecision {
    RateDecision::Limited {
        limit: tier.max,
        retry_after_minutes: tier.retry_after_minutes(),
        resets_in,
    }
}

impl core::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_hint_rounds_up_to_minutes() {
        assert_eq!(RateTier::general().retry_after_minutes(), 5);
        assert_eq!(RateTier::auth().retry_after_minutes(), 15);
        let odd = RateTier::new("odd", Duration::from_secs(61), 1, "x");
        assert_eq!(odd.retry_after_minutes(), 2);
        let tiny = RateTier::new("tiny", Duration::from_millis(200), 1, "x");
        assert_eq!(tiny.retry_after_minutes(), 1);
    }

    #[tokio::test]
    async fn limits_after_max_hits() {
        let limiter = RateLimiter::in_memory();
        let tier = RateTier::new("t", Duration::from_secs(60), 3, "slow down");

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check(&tier, "1.2.3.4").await.unwrap();
            assert_eq!(
                decision,
                RateDecision::Allowed {
                    limit: 3,
                    remaining: expected_remaining
                }
            );
        }
        assert!(matches!(
            limiter.check(&tier, "1.2.3.4").await.unwrap(),
            RateDecision::Limited { retry_after_minutes: 1, .. }
        ));
    }

    #[tokio::test]
    async fn tiers_and_clients_have_separate_budgets() {
        let limiter = RateLimiter::in_memory();
        let a = RateTier::new("a", Duration::from_secs(60), 1, "x");
        let b = RateTier::new("b", Duration::from_secs(60), 1, "x");

        assert!(matches!(limiter.check(&a, "ip").await.unwrap(), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check(&b, "ip").await.unwrap(), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check(&a, "ip:user").await.unwrap(), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check(&a, "ip").await.unwrap(), RateDecision::Limited { .. }));
    }

    #[tokio::test]
    async fn peek_reports_without_counting() {
        let limiter = RateLimiter::in_memory();
        let tier = RateTier::new("failed", Duration::from_secs(120), 2, "slow down");

        for _ in 0..5 {
            assert_eq!(
                limiter.peek(&tier, "ip").await.unwrap(),
                RateDecision::Allowed { limit: 2, remaining: 2 }
            );
        }

        limiter.check(&tier, "ip").await.unwrap();
        assert_eq!(
            limiter.peek(&tier, "ip").await.unwrap(),
            RateDecision::Allowed { limit: 2, remaining: 1 }
        );

        limiter.check(&tier, "ip").await.unwrap();
        assert!(matches!(
            limiter.peek(&tier, "ip").await.unwrap(),
            RateDecision::Limited { retry_after_minutes: 2, .. }
        ));
        assert!(matches!(limiter.peek(&tier, "other").await.unwrap(), RateDecision::Allowed { .. }));
    }
}
