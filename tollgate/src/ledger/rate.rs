//! Fixed-window rate limiting.
//!
//! Windows reset lazily on the first request after expiry; nothing ticks in
//! the background except the shared eviction sweep that drops windows whose
//! identity went quiet.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::RateLimitError;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests allowed per window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Time until the current window rolls over.
    pub resets_in: Duration,
}

impl RateDecision {
    /// Converts a denial into the error carried back to the caller.
    #[must_use]
    pub const fn as_error(&self) -> RateLimitError {
        RateLimitError {
            retry_after: self.resets_in,
            limit: self.limit,
        }
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counter keyed by an opaque identity string.
///
/// The server layers two of these: a coarse per-origin limiter and a fine
/// per-agent limiter. Both must pass for admission.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    windows: DashMap<String, Window>,
    max_requests: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    /// Creates a limiter allowing `max_requests` per `window` per identity.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Checks and counts a request for `key`.
    ///
    /// The count is only incremented when the request is allowed, so denied
    /// requests do not extend the caller's lockout.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut window = self.windows.entry(key.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            return RateDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                resets_in: self
                    .window
                    .saturating_sub(now.saturating_duration_since(window.started)),
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests - window.count,
            resets_in: self
                .window
                .saturating_sub(now.saturating_duration_since(window.started)),
        }
    }

    /// Drops windows that expired and were never touched again.
    pub fn evict_expired(&self) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| w.started.elapsed() < self.window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities with a live window.
    #[must_use]
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixth_request_in_window_is_denied() {
        let limiter = FixedWindowLimiter::new(5, Duration::from_secs(60));
        for i in 0..5 {
            let decision = limiter.check("agent_b");
            assert!(decision.allowed, "request {} should pass", i + 1);
            assert_eq!(decision.remaining, 4 - i);
        }
        let denied = limiter.check("agent_b");
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 5);
        assert_eq!(denied.remaining, 0);
        assert!(denied.resets_in <= Duration::from_secs(60));
        assert!(denied.resets_in > Duration::ZERO);
        let err = denied.as_error();
        assert_eq!(err.limit, 5);
        assert_eq!(err.retry_after, denied.resets_in);
    }

    #[test]
    fn window_rollover_admits_again() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_millis(30));
        assert!(limiter.check("k").allowed);
        assert!(limiter.check("k").allowed);
        assert!(!limiter.check("k").allowed);

        std::thread::sleep(Duration::from_millis(40));
        let after = limiter.check("k");
        assert!(after.allowed);
        assert_eq!(after.remaining, 1);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
        assert!(!limiter.check("a").allowed);
    }

    #[test]
    fn denied_requests_do_not_extend_lockout() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.check("k").allowed);
        for _ in 0..10 {
            assert!(!limiter.check("k").allowed);
        }
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("k").allowed);
    }

    #[test]
    fn eviction_drops_idle_windows() {
        let limiter = FixedWindowLimiter::new(5, Duration::from_millis(10));
        limiter.check("idle");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(limiter.evict_expired(), 1);
        assert_eq!(limiter.tracked_identities(), 0);
    }
}
