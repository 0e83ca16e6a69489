//! Token bucket rate limiter
//!
//! Bounds calls/second to one dependency. Non-blocking: a caller that finds the
//! bucket empty is told so immediately and decides for itself whether to retry,
//! fall back, or fail.

use crate::resilience::RateLimiterConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with fractional refill.
///
/// Capacity is `burst`; tokens refill continuously at `rate_per_second`.
/// Refill and consume happen in one critical section.
#[derive(Debug)]
pub struct TokenBucket {
    name: String,
    capacity: f64,
    rate_per_second: f64,
    bucket: Mutex<Bucket>,
    granted: AtomicU64,
    rejected: AtomicU64,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let capacity = f64::from(config.burst);
        Self {
            name: name.into(),
            capacity,
            rate_per_second: config.rate_per_second,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            granted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Try to take one token. Returns `false` if the bucket is empty.
    pub fn acquire(&self) -> bool {
        let acquired = {
            let mut bucket = self.bucket.lock();
            self.refill(&mut bucket);

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                true
            } else {
                false
            }
        };

        if acquired {
            self.granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(limiter = %self.name, "Rate limit token unavailable");
        }
        acquired
    }

    /// Tokens currently available (after refill)
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Refill the bucket to capacity
    pub fn reset(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens = self.capacity;
        bucket.last_refill = Instant::now();
    }

    /// Total tokens handed out
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Total acquire attempts refused
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Bucket capacity
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.rate_per_second).min(self.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn limiter(rate: f64, burst: u32) -> TokenBucket {
        TokenBucket::new(
            "test",
            RateLimiterConfig {
                rate_per_second: rate,
                burst,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_reject() {
        let bucket = limiter(10.0, 3);

        assert!(bucket.acquire());
        assert!(bucket.acquire());
        assert!(bucket.acquire());
        assert!(!bucket.acquire());
        assert_eq!(bucket.granted(), 3);
        assert_eq!(bucket.rejected(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_one_token_per_interval() {
        let bucket = limiter(4.0, 2);

        assert!(bucket.acquire());
        assert!(bucket.acquire());
        assert!(!bucket.acquire());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(bucket.acquire());
        assert!(!bucket.acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let bucket = limiter(100.0, 2);
        assert!(bucket.acquire());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(bucket.available_tokens(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_refills() {
        let bucket = limiter(1.0, 2);
        assert!(bucket.acquire());
        assert!(bucket.acquire());
        bucket.reset();
        assert_eq!(bucket.available_tokens(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_never_exceeds_capacity() {
        let bucket = Arc::new(limiter(0.001, 50));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let bucket = Arc::clone(&bucket);
            handles.push(tokio::spawn(async move {
                (0..20).filter(|_| bucket.acquire()).count()
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 50);
    }

    proptest! {
        #[test]
        fn prop_exactly_burst_acquisitions_without_elapsed_time(burst in 1u32..64) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            runtime.block_on(async {
                let bucket = limiter(5.0, burst);
                for _ in 0..burst {
                    assert!(bucket.acquire());
                }
                assert!(!bucket.acquire());

                tokio::time::advance(Duration::from_millis(200)).await;
                assert!(bucket.acquire());
                assert!(!bucket.acquire());
            });
        }
    }
}
