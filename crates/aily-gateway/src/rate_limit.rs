use std::net::IpAddr;
use std::time::Instant;

use dashmap::DashMap;

/// Sustained request rate per client IP.
const RATE_PER_SEC: f64 = 20.0;
/// Bucket capacity (burst).
const BURST: f64 = 40.0;

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket per client IP. `check` spends one token; when empty, the
/// caller gets the number of seconds to advertise in `Retry-After`.
pub struct RateLimiter {
    buckets: DashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// `Ok(())` admits the request; `Err(retry_after_secs)` rejects it.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(ip).or_insert_with(|| Bucket {
            tokens: BURST,
            refilled_at: now,
        });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * RATE_PER_SEC).min(BURST);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err((deficit / RATE_PER_SEC).ceil().max(1.0) as u64)
        }
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

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn burst_is_admitted_then_limited() {
        let limiter = RateLimiter::new();
        for _ in 0..40 {
            assert!(limiter.check(ip(1)).is_ok());
        }
        let retry = limiter.check(ip(1)).unwrap_err();
        assert!(retry >= 1);
    }

    #[test]
    fn clients_are_isolated() {
        let limiter = RateLimiter::new();
        for _ in 0..40 {
            let _ = limiter.check(ip(2));
        }
        assert!(limiter.check(ip(2)).is_err());
        assert!(limiter.check(ip(3)).is_ok());
    }
}
