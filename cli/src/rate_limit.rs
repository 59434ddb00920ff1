use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Checks and consumes one request for `key`.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateDecision;
}

/// Per-key fixed window counter. Stale keys are swept lazily once the map
/// grows past `cleanup_threshold`, so no background task is needed.
pub struct FixedWindowLimiter {
    state: DashMap<String, (u32, Instant)>,
    limit: u32,
    window: Duration,
    cleanup_threshold: usize,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            state: DashMap::new(),
            limit: settings.max_requests,
            window: settings.window,
            cleanup_threshold: 10_000,
        }
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut entry = self.state.entry(key.to_string()).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        let elapsed = now.saturating_duration_since(*window_start);
        if elapsed >= self.window {
            *count = 0;
            *window_start = now;
        }

        let decision = if *count >= self.limit {
            let elapsed = now.saturating_duration_since(*window_start);
            RateDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            }
        } else {
            *count += 1;
            RateDecision::Allowed {
                remaining: self.limit - *count,
            }
        };
        drop(entry);

        if self.state.len() > self.cleanup_threshold {
            self.cleanup(now);
        }
        decision
    }

    fn cleanup(&self, now: Instant) {
        let before = self.state.len();
        self.state
            .retain(|_, (_, start)| now.saturating_duration_since(*start) < self.window);
        tracing::debug!(removed = before - self.state.len(), "Swept expired rate limit windows");
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.state.len()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, secs: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::new(RateLimitSettings {
            max_requests,
            window: Duration::from_secs(secs),
        })
    }

    fn allowed(decision: RateDecision) -> bool {
        matches!(decision, RateDecision::Allowed { .. })
    }

    #[test]
    fn test_limits_within_window() {
        let limiter = limiter(2, 60);
        let now = Instant::now();

        assert_eq!(limiter.check_at("1", now), RateDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at("1", now), RateDecision::Allowed { remaining: 0 });
        let later = now + Duration::from_secs(15);
        assert_eq!(
            limiter.check_at("1", later),
            RateDecision::Limited {
                retry_after: Duration::from_secs(45)
            }
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        assert!(allowed(limiter.check_at("1", now)));
        assert!(!allowed(limiter.check_at("1", now)));
        assert!(allowed(limiter.check_at("2", now)));
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(1, 10);
        let now = Instant::now();
        assert!(allowed(limiter.check_at("1", now)));
        assert!(!allowed(limiter.check_at("1", now + Duration::from_secs(9))));
        assert!(allowed(limiter.check_at("1", now + Duration::from_secs(10))));
    }

    #[test]
    fn test_lazy_cleanup_drops_expired_keys() {
        let mut limiter = limiter(5, 10);
        limiter.cleanup_threshold = 2;
        let now = Instant::now();
        limiter.check_at("a", now);
        limiter.check_at("b", now);
        assert_eq!(limiter.tracked_keys(), 2);

        // Third key pushes the map past the threshold; a and b have expired.
        limiter.check_at("c", now + Duration::from_secs(30));
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
