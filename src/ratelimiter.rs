//! Outbound token-bucket rate limiter shared by every venue adapter.
//!
//! Buckets are keyed by `(venue, endpoint)`. Each bucket refills continuously
//! at `refill_rate` tokens/second up to `capacity`. `acquire` suspends the
//! caller cooperatively until enough tokens are available; it never rejects.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_rate: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 1000.0,
            refill_rate: 1000.0,
        }
    }
}

struct Bucket {
    config: BucketConfig,
    inner: AsyncMutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn new(config: BucketConfig) -> Self {
        Self {
            config,
            inner: AsyncMutex::new(BucketState {
                tokens: config.capacity,
                last: Instant::now(),
            }),
        }
    }

    async fn consume(&self, weight: f64) {
        loop {
            let wait = {
                let mut state = self.inner.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.config.refill_rate).min(self.config.capacity);
                state.last = now;

                if state.tokens >= weight {
                    state.tokens -= weight;
                    None
                } else {
                    let deficit = weight - state.tokens;
                    let secs = if self.config.refill_rate > 0.0 {
                        deficit / self.config.refill_rate
                    } else {
                        0.05
                    };
                    Some(Duration::from_secs_f64(secs.max(0.001)))
                }
            };

            match wait {
                None => return,
                Some(d) => sleep(d).await,
            }
        }
    }
}

/// Per-(venue, endpoint) token-bucket table. `update` replaces the whole
/// table behind an `ArcSwap`, so readers never block on a writer; waiters
/// already consuming against the old table simply finish against it.
pub struct RateLimiter {
    buckets: ArcSwap<HashMap<String, Arc<Bucket>>>,
}

fn key(venue: &str, endpoint: &str) -> String {
    format!("{venue}:{endpoint}")
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn with_config(config: HashMap<String, BucketConfig>) -> Self {
        let limiter = Self::new();
        limiter.update(config);
        limiter
    }

    /// Replace bucket parameters wholesale. Accumulated tokens in any
    /// existing bucket are discarded; this is a deliberate simplification
    /// (see DESIGN.md) rather than an in-place parameter mutation.
    pub fn update(&self, config: HashMap<String, BucketConfig>) {
        let mut table = HashMap::with_capacity(config.len());
        for (k, cfg) in config {
            table.insert(k, Arc::new(Bucket::new(cfg)));
        }
        self.buckets.store(Arc::new(table));
    }

    /// Acquire `weight` tokens for `(venue, endpoint)`, falling back to
    /// `(venue, "global")` and finally a permissive default bucket.
    pub async fn acquire(&self, venue: &str, endpoint: &str, weight: f64) {
        let table = self.buckets.load();

        if let Some(bucket) = table.get(&key(venue, endpoint)) {
            bucket.consume(weight).await;
            return;
        }
        if let Some(bucket) = table.get(&key(venue, "global")) {
            bucket.consume(weight).await;
            return;
        }

        // No configured bucket at all: build a permissive default and use it
        // for this call only (does not mutate the shared table).
        let fallback = Bucket::new(BucketConfig::default());
        fallback.consume(weight).await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn acquire_under_capacity_does_not_block() {
        let mut cfg = HashMap::new();
        cfg.insert("aster:global".to_string(), BucketConfig { capacity: 5.0, refill_rate: 1.0 });
        let limiter = RateLimiter::with_config(cfg);

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire("aster", "global", 1.0).await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn acquire_falls_back_to_permissive_default() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.acquire("unknown-venue", "unknown-endpoint", 1.0).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn update_replaces_bucket_wholesale() {
        let mut cfg = HashMap::new();
        cfg.insert("aster:global".to_string(), BucketConfig { capacity: 1.0, refill_rate: 100.0 });
        let limiter = RateLimiter::with_config(cfg);
        limiter.acquire("aster", "global", 1.0).await;

        let mut new_cfg = HashMap::new();
        new_cfg.insert("aster:global".to_string(), BucketConfig { capacity: 10.0, refill_rate: 100.0 });
        limiter.update(new_cfg);

        let start = Instant::now();
        limiter.acquire("aster", "global", 5.0).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
