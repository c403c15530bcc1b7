//! Component B: a lazily-refilling token bucket, one per provider
//! (spec.md §4.2).
//!
//! Unlike the teacher crate, which hands this off to the `leaky_bucket`
//! crate, the market engine needs to *inspect* bucket state for the
//! health surface (spec.md §6, `ProviderClient.Inspect`) and needs
//! deterministic, monotonic-clock arithmetic it can unit test against
//! the laws in spec.md §8 — so this is a small hand-rolled
//! implementation rather than a black box. The parsing convenience
//! (`"10/s"`) is kept in the same shape the teacher used for its
//! command-line rate limit flag.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use crate::prelude::*;

/// The period over which a [`RateLimit`] is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitPeriod {
    Second,
    Minute,
}

impl RateLimitPeriod {
    pub fn to_duration(self) -> Duration {
        match self {
            RateLimitPeriod::Second => Duration::from_secs(1),
            RateLimitPeriod::Minute => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for RateLimitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitPeriod::Second => write!(f, "s"),
            RateLimitPeriod::Minute => write!(f, "m"),
        }
    }
}

impl FromStr for RateLimitPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s" => Ok(RateLimitPeriod::Second),
            "m" => Ok(RateLimitPeriod::Minute),
            _ => Err(anyhow!("unsupported rate limit period: {:?}", s)),
        }
    }
}

/// A configured rate limit, e.g. `"10/s"` or `"5/m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimit {
    pub max_requests: u32,
    pub per_period: RateLimitPeriod,
}

impl RateLimit {
    pub fn new(max_requests: u32, per_period: RateLimitPeriod) -> Self {
        Self {
            max_requests,
            per_period,
        }
    }

    /// Build the runtime [`TokenBucket`] this limit describes: a full
    /// bucket that refills completely once per period.
    pub fn to_token_bucket(self) -> TokenBucket {
        TokenBucket::new(self.max_requests as f64, self.per_period.to_duration())
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.per_period)
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let mut parts = s.splitn(2, '/');
            let max_requests = parts
                .next()
                .ok_or_else(|| anyhow!("missing max requests"))?
                .parse::<u32>()?;
            let per_period = parts
                .next()
                .ok_or_else(|| anyhow!("missing period"))?
                .parse::<RateLimitPeriod>()?;
            Ok(Self {
                max_requests,
                per_period,
            })
        };
        parse(s).with_context(|| format!("failed to parse rate limit: {:?}", s))
    }
}

/// Whether a bucket had a token available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Acquired,
    RateLimited,
}

/// A single-writer token bucket with lazy refill on a monotonic clock
/// (spec.md §3, §4.2).
///
/// "Single-writer" means callers are expected to serialize access (the
/// per-provider [`crate::client::ProviderClient`] actor does this); the
/// bucket itself uses no internal locking.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_per_interval: f64,
    refill_interval: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a new bucket, starting full, that refills completely once
    /// per `interval`.
    pub fn new(max_tokens: f64, interval: Duration) -> Self {
        Self::with_refill_rate(max_tokens, max_tokens, interval)
    }

    /// Create a new bucket with an explicit refill amount per interval
    /// (which need not equal `max_tokens`).
    pub fn with_refill_rate(
        max_tokens: f64,
        refill_per_interval: f64,
        interval: Duration,
    ) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_per_interval,
            refill_interval: interval,
            last_refill: Instant::now(),
        }
    }

    /// Refill lazily based on elapsed time, per spec.md §4.2.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed >= self.refill_interval {
            self.tokens = self.max_tokens;
        } else {
            let interval_secs = self.refill_interval.as_secs_f64();
            if interval_secs > 0.0 {
                let fraction = elapsed.as_secs_f64() / interval_secs;
                self.tokens =
                    (self.tokens + fraction * self.refill_per_interval).min(self.max_tokens);
            }
        }
        self.last_refill = now;
    }

    /// Refill, then attempt to take one token. Never lets `tokens` go
    /// negative or above `max_tokens` (spec.md invariant 6).
    pub fn acquire(&mut self) -> Acquire {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Acquire::Acquired
        } else {
            Acquire::RateLimited
        }
    }

    /// Refill-then-peek, without decrementing.
    pub fn available(&mut self) -> f64 {
        self.refill(Instant::now());
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let rate_limit = RateLimit::from_str("10/s").unwrap();
        assert_eq!(rate_limit.max_requests, 10);
        assert_eq!(rate_limit.per_period, RateLimitPeriod::Second);

        let rate_limit = RateLimit::from_str("5/m").unwrap();
        assert_eq!(rate_limit.max_requests, 5);
        assert_eq!(rate_limit.per_period, RateLimitPeriod::Minute);
    }

    #[test]
    fn test_failed_parse() {
        assert!(RateLimit::from_str("10/invalid").is_err());
        assert!(RateLimit::from_str("invalid").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(RateLimit::from_str("10/s").unwrap().to_string(), "10/s");
        assert_eq!(RateLimit::from_str("5/m").unwrap().to_string(), "5/m");
    }

    /// Token bucket monotonicity: without time advancing, tokens never
    /// increase and never go negative (spec.md §8).
    #[test]
    fn test_monotonicity_without_time_advancement() {
        let mut bucket = TokenBucket::new(3.0, Duration::from_secs(1));
        let mut last = bucket.available();
        for _ in 0..10 {
            let before = last;
            let result = bucket.acquire();
            let after = bucket.available();
            assert!(after <= before);
            assert!(after >= 0.0);
            if result == Acquire::RateLimited {
                // Once we're out of tokens, we stay out (without time passing).
                assert_eq!(after, before);
            }
            last = after;
        }
    }

    #[test]
    fn test_never_exceeds_max() {
        let mut bucket = TokenBucket::new(5.0, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(bucket.available(), 5.0);
    }

    /// After draining a bucket, acquiring at `t0 + k*interval` succeeds and
    /// leaves `max - 1` tokens, for any `k >= 1` (spec.md §8).
    #[test]
    fn test_refill_after_k_intervals() {
        for k in 1..=4u32 {
            let max = 4.0;
            let interval = Duration::from_millis(20);
            let mut bucket = TokenBucket::new(max, interval);
            // Drain it completely.
            for _ in 0..max as u32 {
                assert_eq!(bucket.acquire(), Acquire::Acquired);
            }
            assert_eq!(bucket.acquire(), Acquire::RateLimited);

            std::thread::sleep(interval * k);
            assert_eq!(bucket.acquire(), Acquire::Acquired);
            assert_eq!(bucket.available(), max - 1.0);
        }
    }
}
