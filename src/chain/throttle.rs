use governor::{state::NotKeyed, state::InMemoryState, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

/// Client-side RPC rate limit shared by every watcher on one endpoint
#[derive(Clone)]
pub struct RpcThrottle {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, governor::clock::DefaultClock>>,
}

impl RpcThrottle {
    pub fn new(requests_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        }
    }

    /// Wait until one more request fits in the quota
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            debug!("RPC throttle engaged, waiting for quota");
            self.limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_within_quota_is_immediate() {
        let throttle = RpcThrottle::new(5);
        let start = std::time::Instant::now();
        for _ in 0..5 {
            throttle.acquire().await;
        }
        assert!(start.elapsed() < std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        // Must not panic on a zero quota
        let _ = RpcThrottle::new(0);
    }
}
