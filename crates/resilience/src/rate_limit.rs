//! Sliding-window admission control.
//!
//! Every admitted request leaves a timestamp in the window. A request is
//! admitted only while fewer than `requests_per_window` timestamps are
//! younger than `window`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on the window buffer reserved up front; it grows on demand.
const INITIAL_WINDOW_CAPACITY: usize = 1024;

/// Configuration for the sliding-window limiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admissions inside one window.
    pub requests_per_window: u32,
    /// Window length in milliseconds.
    #[serde(with = "crate::serde_millis")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 600,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Limit expressed per minute, the usual way operators configure it.
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests_per_window: requests,
            window: Duration::from_secs(60),
        }
    }

    pub fn with_requests_per_window(mut self, requests: u32) -> Self {
        self.requests_per_window = requests;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Sliding-window rate limiter.
///
/// The prune, check and append steps run inside one critical section, so
/// concurrent callers can never both observe the last free slot.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    admitted: Mutex<VecDeque<Instant>>,
    total_requests: AtomicU64,
    total_rejected: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            admitted: Mutex::new(VecDeque::with_capacity(
                (config.requests_per_window as usize).min(INITIAL_WINDOW_CAPACITY),
            )),
            total_requests: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Try to admit one request. Never waits.
    ///
    /// `false` is an ordinary outcome; callers turn it into a rate-limited
    /// response without touching any upstream.
    pub fn try_acquire(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut admitted = self
            .admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while let Some(oldest) = admitted.front() {
            if now.duration_since(*oldest) >= self.config.window {
                admitted.pop_front();
            } else {
                break;
            }
        }

        if admitted.len() >= self.config.requests_per_window as usize {
            drop(admitted);
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        admitted.push_back(now);
        true
    }

    /// Time until the oldest admission leaves the window, if the window is full.
    pub fn retry_after(&self) -> Option<Duration> {
        let now = Instant::now();
        let admitted = self
            .admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let live = admitted
            .iter()
            .filter(|at| now.duration_since(**at) < self.config.window)
            .count();
        if live < self.config.requests_per_window as usize {
            return None;
        }
        admitted
            .iter()
            .find(|at| now.duration_since(**at) < self.config.window)
            .map(|oldest| self.config.window - now.duration_since(*oldest))
    }

    pub fn stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let in_window = self
            .admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|at| now.duration_since(**at) < self.config.window)
            .count();

        RateLimitStats {
            in_window: in_window as u64,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Statistics for the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    /// Admissions currently counted against the window.
    pub in_window: u64,
    pub total_requests: u64,
    pub total_rejected: u64,
}

impl RateLimitStats {
    /// Calculate rejection rate (0.0 to 1.0).
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_rejected as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn admits_up_to_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(5));

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        let stats = limiter.stats();
        assert_eq!(stats.in_window, 5);
        assert_eq!(stats.total_requests, 6);
        assert_eq!(stats.total_rejected, 1);
    }

    #[test]
    fn huge_limit_reserves_a_bounded_buffer() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(u32::MAX));
        let capacity = limiter.admitted.lock().unwrap().capacity();
        assert!(capacity >= INITIAL_WINDOW_CAPACITY);
        assert!(capacity < 4 * INITIAL_WINDOW_CAPACITY);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn rejection_does_not_consume_a_slot() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(1));
        assert!(limiter.try_acquire());
        for _ in 0..10 {
            assert!(!limiter.try_acquire());
        }
        assert_eq!(limiter.stats().in_window, 1);
    }

    #[test]
    fn concurrent_burst_admits_exactly_limit() {
        let limit = 50;
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_minute(limit)));
        let barrier = Arc::new(std::sync::Barrier::new((limit * 2) as usize));

        let handles: Vec<_> = (0..limit * 2)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    limiter.try_acquire()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, limit as usize);
        assert_eq!(limiter.stats().total_rejected, limit as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(2));
        assert!(limiter.try_acquire());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // First admission ages out at t=60s, the second one is still live.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_reports_oldest_expiry() {
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(1));
        assert_eq!(limiter.retry_after(), None);
        assert!(limiter.try_acquire());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.retry_after(), Some(Duration::from_secs(40)));
    }

    #[test]
    fn config_roundtrips_window_as_millis() {
        let cfg = RateLimitConfig::per_minute(10);
        let json = serde_json::to_value(cfg).unwrap();
        assert_eq!(json["window"], 60_000);
        let back: RateLimitConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn stats_rejection_rate() {
        let stats = RateLimitStats {
            in_window: 0,
            total_requests: 100,
            total_rejected: 25,
        };
        assert_eq!(stats.rejection_rate(), 0.25);
    }
}
