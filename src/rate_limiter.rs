//! Provider-scoped request budget.
//!
//! [`SlidingWindow`] owns the FIFO of issue timestamps and makes the
//! proceed-or-wait decision. [`RateLimiter`] guards one window behind a mutex so
//! several workers can share a provider, and optionally smooths bursts with a
//! `governor` quota before the window check. The quota from [`global_quota`]
//! is shared by every provider's limiter.

use crate::metrics;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub type DirectRateLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Usage windows kept for observability before the oldest are pruned.
const USAGE_WINDOWS_RETAINED: u64 = 60;

/// Decision for one request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Proceed,
    Wait(Duration),
}

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    buffer: Duration,
    issued: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration, buffer: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            buffer,
            issued: VecDeque::with_capacity(limit as usize),
        }
    }

    /// Decides without recording anything.
    ///
    /// Timestamps at least `window` old no longer count. When the budget is
    /// spent the wait is `window - (now - oldest) + buffer`.
    pub fn decide(&self, now: Instant) -> Acquire {
        let is_live = |t: &&Instant| now.saturating_duration_since(**t) < self.window;
        if self.issued.iter().filter(is_live).count() < self.limit {
            return Acquire::Proceed;
        }
        match self.issued.iter().find(is_live).copied() {
            Some(oldest) => {
                let elapsed = now.saturating_duration_since(oldest);
                Acquire::Wait(self.window.saturating_sub(elapsed) + self.buffer)
            }
            None => Acquire::Proceed,
        }
    }

    /// Drops expired timestamps, decides, and records `now` on proceed.
    pub fn try_acquire(&mut self, now: Instant) -> Acquire {
        self.evict(now);
        let decision = self.decide(now);
        if decision == Acquire::Proceed {
            self.issued.push_back(now);
        }
        decision
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.issued.front() {
            if now.saturating_duration_since(*front) >= self.window {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.issued.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Per-second quota for all providers together. `None` when `qps` is zero.
pub fn global_quota(qps: u32) -> Option<Arc<DirectRateLimiter>> {
    NonZeroU32::new(qps).map(|q| Arc::new(GovernorLimiter::direct(Quota::per_second(q))))
}

/// Shared, provider-scoped limiter.
pub struct RateLimiter {
    provider: String,
    window: Mutex<SlidingWindow>,
    smoothing: Option<Arc<DirectRateLimiter>>,
    /// Requests issued per window index (unix millis / window).
    usage: DashMap<u64, u64>,
}

impl RateLimiter {
    pub fn new(provider: impl Into<String>, limit: u32, window: Duration, buffer: Duration) -> Self {
        Self {
            provider: provider.into(),
            window: Mutex::new(SlidingWindow::new(limit, window, buffer)),
            smoothing: None,
            usage: DashMap::new(),
        }
    }

    /// Waits on `smoothing` before every window check. Pass the same quota to
    /// several limiters to cap their combined rate.
    pub fn with_smoothing(mut self, smoothing: Option<Arc<DirectRateLimiter>>) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Suspends until a request may be issued, then records it.
    ///
    /// Re-checks after every wait rather than sleeping a fixed amount, so a
    /// burst of expiring timestamps releases waiters as early as possible.
    pub async fn acquire(&self) {
        if let Some(smoothing) = &self.smoothing {
            smoothing.until_ready().await;
        }

        loop {
            let decision = {
                let mut window = self.window.lock().await;
                window.try_acquire(Instant::now())
            };
            match decision {
                Acquire::Proceed => {
                    self.record_usage().await;
                    return;
                }
                Acquire::Wait(wait) => {
                    debug!(provider = %self.provider, wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
                    metrics::increment_rate_limit_wait(&self.provider);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn record_usage(&self) {
        let window_ms = self.window.lock().await.window().as_millis().max(1) as u64;
        let index = chrono::Utc::now().timestamp_millis().max(0) as u64 / window_ms;
        *self.usage.entry(index).or_insert(0) += 1;
        if index > USAGE_WINDOWS_RETAINED {
            self.usage.retain(|k, _| *k + USAGE_WINDOWS_RETAINED >= index);
        }
        metrics::increment_provider_request(&self.provider);
    }

    /// Requests issued per usage window, oldest first.
    pub fn usage(&self) -> Vec<(u64, u64)> {
        let mut usage: Vec<(u64, u64)> = self.usage.iter().map(|e| (*e.key(), *e.value())).collect();
        usage.sort_unstable();
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_proceeds_until_limit() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(3, Duration::from_millis(1_000), Duration::ZERO);
        for _ in 0..3 {
            assert_eq!(window.try_acquire(start), Acquire::Proceed);
        }
        assert_eq!(window.try_acquire(start), Acquire::Wait(Duration::from_millis(1_000)));
        assert_eq!(window.in_flight(), 3);
    }

    #[test]
    fn test_wait_accounts_for_elapsed_and_buffer() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(2, Duration::from_millis(1_000), Duration::from_millis(50));
        window.try_acquire(start);
        window.try_acquire(start + Duration::from_millis(400));

        let now = start + Duration::from_millis(600);
        assert_eq!(window.decide(now), Acquire::Wait(Duration::from_millis(450)));
        // The first timestamp leaves the window exactly at 1s
        assert_eq!(window.try_acquire(start + Duration::from_millis(1_000)), Acquire::Proceed);
    }

    #[test]
    fn test_decide_is_pure() {
        let start = Instant::now();
        let window = SlidingWindow::new(1, Duration::from_millis(100), Duration::ZERO);
        assert_eq!(window.decide(start), Acquire::Proceed);
        assert_eq!(window.decide(start), Acquire::Proceed);
        assert_eq!(window.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_global_quota_is_shared_between_providers() {
        let quota = global_quota(2);
        let gecko = RateLimiter::new("gecko", 100, Duration::from_secs(60), Duration::ZERO)
            .with_smoothing(quota.clone());
        let llama = RateLimiter::new("llama", 100, Duration::from_secs(60), Duration::ZERO)
            .with_smoothing(quota);

        let start = std::time::Instant::now();
        gecko.acquire().await;
        llama.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(250), "burst of two is immediate");

        // Both cells are spent, so a third request on either provider waits for a refill
        gecko.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(400), "waited {:?}", start.elapsed());
    }

    #[test]
    fn test_zero_qps_disables_quota() {
        assert!(global_quota(0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_never_exceeds_budget() {
        let limit = 3u32;
        let window = Duration::from_millis(1_000);
        let limiter = RateLimiter::new("test", limit, window, Duration::ZERO);

        let mut issued = Vec::new();
        for _ in 0..(limit * 3 + 1) {
            limiter.acquire().await;
            issued.push(Instant::now());
        }

        for (i, t) in issued.iter().enumerate() {
            let in_window = issued[..=i]
                .iter()
                .filter(|s| t.saturating_duration_since(**s) < window)
                .count();
            assert!(in_window <= limit as usize, "request {} saw {} in window", i, in_window);
        }
        // The (limit + 1)th request had to wait a full window
        assert!(issued[limit as usize].duration_since(issued[0]) >= window);
        assert_eq!(limiter.usage().iter().map(|(_, c)| c).sum::<u64>(), (limit * 3 + 1) as u64);
    }
}
