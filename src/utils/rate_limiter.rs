/// Token bucket rate limiter shared by every outbound subgraph request
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: u32,
    refill_rate: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let capacity = requests_per_second.max(1);
        RateLimiter {
            capacity,
            refill_rate: Duration::from_secs(1),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to acquire a token, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then acquire it
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire().await {
                return;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let elapsed = bucket.last_refill.elapsed();

        if elapsed >= self.refill_rate {
            let periods = (elapsed.as_secs_f64() / self.refill_rate.as_secs_f64()) as u64;
            let refill = (periods * u64::from(self.capacity)).min(u64::from(self.capacity)) as u32;
            bucket.tokens = (bucket.tokens + refill).min(self.capacity);
            bucket.last_refill = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(2); // 2 requests per second

        // Should get 2 tokens immediately
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);

        // Third should fail
        assert!(!limiter.try_acquire().await);

        // Wait for refill
        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Should work again
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(1);
        limiter.acquire().await;

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let limiter = RateLimiter::new(0);
        assert_eq!(limiter.capacity, 1);
    }
}
