//! Token bucket shared by every outbound request of a crawl.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct BucketState {
    /// May go negative: each waiter reserves its token before sleeping.
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket sized to a requests-per-second ceiling.
///
/// Callers reserve a token under the lock and then sleep outside it, so
/// concurrent tasks are served in arrival order and total throughput never
/// exceeds `rate` (after the initial burst).
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket refilling at `rate_per_second`, holding at most `burst` tokens
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            rate: rate_per_second.max(f64::MIN_POSITIVE),
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Wait until a token is available and consume it
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            log::debug!("Rate limit: waiting {:?} for a token", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token (possibly on credit) and report how long to wait for it
    fn reserve(&self) -> Duration {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
        state.tokens -= 1.0;

        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            // Absurdly slow rates saturate instead of overflowing
            Duration::try_from_secs_f64(-state.tokens / self.rate).unwrap_or(Duration::MAX)
        }
    }

    /// Tokens currently available (negative when callers are queued)
    pub fn available(&self) -> f64 {
        let state = self.state.lock().unwrap();
        let elapsed = Instant::now().duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.rate).min(self.capacity)
    }
}
