use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{emit, Telemetry};
use crate::store::{load_json, save_json, DurableStore};

// ============================================================================
// Fixed-Window Rate Limiter
// ============================================================================
//
// One counter per client key, reset when its window has elapsed. Counters
// live in the durable store with a TTL of twice the window so idle keys
// disappear on their own.
//
// The limiter fails open: if the store cannot be read or written the request
// is allowed. Concurrent requests from one key can over- or under-count
// slightly; no locking is done around the read-modify-write.
//
// ============================================================================

pub const DEFAULT_LIMIT: u32 = 100;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Stored per key. `reset_at` is epoch milliseconds.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    pub count: u32,
    pub reset_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        /// Epoch seconds at which the window resets
        reset_at: i64,
    },
    Limited {
        limit: u32,
        retry_after_secs: u64,
        reset_at: i64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

pub struct RateLimiter {
    store: Arc<dyn DurableStore>,
    telemetry: Arc<dyn Telemetry>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn DurableStore>,
        telemetry: Arc<dyn Telemetry>,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            store,
            telemetry,
            policy,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn storage_key(client: &str) -> String {
        format!("ratelimit:{client}")
    }

    pub async fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Utc::now()).await
    }

    /// Count one request from `client` at `now`.
    pub async fn check_at(&self, client: &str, now: DateTime<Utc>) -> RateDecision {
        let key = Self::storage_key(client);
        let now_ms = now.timestamp_millis();
        let window_ms = self.policy.window.as_millis() as i64;

        let stored = match load_json::<RateLimitCounter>(self.store.as_ref(), &key).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(client = %client, error = %e, "Rate limit store unavailable, allowing request");
                return self.open_decision(now_ms + window_ms);
            }
        };

        let mut counter = match stored {
            Some(counter) if now_ms <= counter.reset_at => counter,
            _ => RateLimitCounter {
                count: 0,
                reset_at: now_ms + window_ms,
            },
        };

        if counter.count >= self.policy.limit {
            let retry_after_secs = ((counter.reset_at - now_ms).max(0) as u64).div_ceil(1000);
            tracing::debug!(
                client = %client,
                count = counter.count,
                retry_after_secs,
                "🚦 Rate limit exceeded"
            );
            emit(
                self.telemetry.as_ref(),
                "rate_limited",
                &[("client", client.to_string())],
            );
            return RateDecision::Limited {
                limit: self.policy.limit,
                retry_after_secs,
                reset_at: epoch_secs(counter.reset_at),
            };
        }

        counter.count += 1;
        let ttl = self.policy.window * 2;
        if let Err(e) = save_json(self.store.as_ref(), &key, &counter, Some(ttl)).await {
            tracing::warn!(client = %client, error = %e, "Failed to persist rate limit counter, allowing request");
            return self.open_decision(counter.reset_at);
        }

        RateDecision::Allowed {
            limit: self.policy.limit,
            remaining: self.policy.limit - counter.count,
            reset_at: epoch_secs(counter.reset_at),
        }
    }

    fn open_decision(&self, reset_at_ms: i64) -> RateDecision {
        RateDecision::Allowed {
            limit: self.policy.limit,
            remaining: self.policy.limit,
            reset_at: epoch_secs(reset_at_ms),
        }
    }
}

fn epoch_secs(millis: i64) -> i64 {
    millis.div_euclid(1000) + i64::from(millis.rem_euclid(1000) > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::RecordingTelemetry;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn limiter(store: &MemoryStore, limit: u32) -> (RateLimiter, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let limiter = RateLimiter::new(
            Arc::new(store.clone()),
            telemetry.clone(),
            RateLimitPolicy {
                limit,
                window: Duration::from_secs(60),
            },
        );
        (limiter, telemetry)
    }

    #[tokio::test]
    async fn test_sixth_request_in_window_is_limited() {
        let store = MemoryStore::new();
        let (limiter, telemetry) = limiter(&store, 5);
        let start = Utc::now();

        for i in 0..5u32 {
            let decision = limiter.check_at("1.2.3.4", start).await;
            match decision {
                RateDecision::Allowed { remaining, .. } => assert_eq!(remaining, 4 - i),
                other => panic!("request {} unexpectedly limited: {other:?}", i + 1),
            }
        }

        let later = start + ChronoDuration::seconds(10);
        match limiter.check_at("1.2.3.4", later).await {
            RateDecision::Limited {
                retry_after_secs, ..
            } => {
                assert!(retry_after_secs <= 60);
                assert_eq!(retry_after_secs, 50);
            }
            other => panic!("expected limit, got {other:?}"),
        }
        assert_eq!(telemetry.events(), vec!["rate_limited"]);
    }

    #[tokio::test]
    async fn test_window_reset_starts_fresh_count() {
        let store = MemoryStore::new();
        let (limiter, _) = limiter(&store, 5);
        let start = Utc::now();

        for _ in 0..6 {
            limiter.check_at("client", start).await;
        }
        assert!(!limiter.check_at("client", start).await.is_allowed());

        let after_reset = start + ChronoDuration::seconds(61);
        let decision = limiter.check_at("client", after_reset).await;
        assert_eq!(
            decision,
            RateDecision::Allowed {
                limit: 5,
                remaining: 4,
                reset_at: epoch_secs(
                    after_reset.timestamp_millis() + Duration::from_secs(60).as_millis() as i64
                ),
            }
        );

        let stored: RateLimitCounter = load_json(&store, &RateLimiter::storage_key("client"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.count, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();
        let (limiter, _) = limiter(&store, 1);
        let now = Utc::now();

        assert!(limiter.check_at("a", now).await.is_allowed());
        assert!(!limiter.check_at("a", now).await.is_allowed());
        assert!(limiter.check_at("b", now).await.is_allowed());
    }

    #[tokio::test]
    async fn test_fails_open_when_store_is_down() {
        let store = MemoryStore::new();
        let (limiter, _) = limiter(&store, 1);
        store.set_fail_reads(true);

        let now = Utc::now();
        for _ in 0..3 {
            assert!(limiter.check_at("client", now).await.is_allowed());
        }
    }

    #[tokio::test]
    async fn test_fails_open_when_write_fails() {
        let store = MemoryStore::new();
        let (limiter, _) = limiter(&store, 1);
        store.set_fail_writes(true);

        let now = Utc::now();
        assert!(limiter.check_at("client", now).await.is_allowed());
        assert!(limiter.check_at("client", now).await.is_allowed());
    }

    #[test]
    fn test_epoch_secs_rounds_up() {
        assert_eq!(epoch_secs(1_000), 1);
        assert_eq!(epoch_secs(1_001), 2);
    }
}
